mod common;

use rand::RngCore;
use telemetry::{
    compression::{compress, Level},
    framing::{read_frames, recv_frame, send_frame},
    link::{decode_payload, encode_payload},
    Error, TelemetryPacket,
};
use test_case::test_case;

use common::{simulated_packets, Chunked};

#[test_case(0; "empty")]
#[test_case(1; "single byte")]
#[test_case(TelemetryPacket::LEN; "packet sized")]
#[test_case(8 * 1024; "multi kib")]
fn frames_survive_one_byte_reads(size: usize) {
    let mut payload = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut payload);

    let mut wire = Vec::new();
    send_frame(&mut wire, &payload).unwrap();
    send_frame(&mut wire, &payload).unwrap();

    let mut reader = Chunked::new(&wire[..], 1);
    assert_eq!(recv_frame(&mut reader).unwrap(), payload);
    assert_eq!(recv_frame(&mut reader).unwrap(), payload);
    assert!(matches!(
        recv_frame(&mut reader),
        Err(Error::ConnectionClosed)
    ));
}

#[test]
fn packets_through_full_codec_stack() {
    let packets = simulated_packets(11, 250);

    let mut wire = Vec::new();
    for packet in &packets {
        send_frame(&mut wire, &encode_payload(packet, Level::default())).unwrap();
    }

    let received: Vec<TelemetryPacket> = read_frames(Chunked::new(&wire[..], 7))
        .map(|payload| decode_payload(&payload.unwrap()).unwrap())
        .collect();
    assert_eq!(received, packets);
}

#[test]
fn compressed_packet_declares_its_length() {
    let packet = simulated_packets(3, 1)[0];
    let payload = compress(&packet.encode());

    let mut wire = Vec::new();
    send_frame(&mut wire, &payload).unwrap();

    let declared = u32::from_be_bytes([wire[0], wire[1], wire[2], wire[3]]) as usize;
    assert_eq!(declared, payload.len());
    assert_eq!(wire.len(), 4 + payload.len());
}

#[test]
fn peer_closing_mid_message_is_truncation() {
    let mut wire = Vec::new();
    send_frame(&mut wire, &[5u8; 100]).unwrap();

    for cut in [1, 3, 4, 50, 103] {
        let zult = recv_frame(&mut Chunked::new(&wire[..cut], 1));
        assert!(
            matches!(zult, Err(Error::TruncatedMessage { .. })),
            "cut at {cut}: {zult:?}"
        );
    }
}
