//! Length prefixed message framing over byte streams.
//!
//! Each message on the wire is a 4 byte big-endian unsigned length followed by exactly that
//! many payload bytes. There is no other framing metadata; the prefix alone defines message
//! boundaries on a stream transport such as TCP.
//!
//! ```text
//! +----------------+---------------------+
//! | length (u32 BE)| payload (length)    |
//! +----------------+---------------------+
//! ```
use std::io::{ErrorKind, Read, Write};

use tracing::trace;

use crate::{Error, Result};

/// Size of the length prefix in bytes.
pub const PREFIX_LEN: usize = 4;

/// Largest payload accepted for sending or receiving.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Write `payload` as a single length prefixed message.
///
/// Partial writes are retried until every byte has been written, then the writer is flushed.
///
/// # Errors
/// [Error::PayloadTooLarge] if `payload` is longer than [MAX_FRAME_LEN], in which case nothing
/// is written. [Error::Io] for any write failure.
pub fn send_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: Write + ?Sized,
{
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|_| payload.len() <= MAX_FRAME_LEN)
        .ok_or_else(|| Error::PayloadTooLarge {
            size: payload.len(),
            max: MAX_FRAME_LEN,
        })?;

    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(payload)?;
    writer.flush()?;
    trace!(len, "sent frame");
    Ok(())
}

/// Read until `buf` is full or the reader reports end-of-file, returning the number of bytes
/// read. Short reads and interrupts are retried.
fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> Result<usize>
where
    R: Read + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(filled)
}

/// Read a single length prefixed message and return its payload.
///
/// Never reads beyond the end of the message.
///
/// # Errors
/// - [Error::ConnectionClosed] if the stream ends cleanly before any prefix byte
/// - [Error::TruncatedMessage] if the stream ends part way through the prefix or payload
/// - [Error::PayloadTooLarge] if the prefix declares more than [MAX_FRAME_LEN] bytes
/// - [Error::Io] for any read failure
pub fn recv_frame<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: Read + ?Sized,
{
    let mut prefix = [0u8; PREFIX_LEN];
    match read_full(reader, &mut prefix)? {
        0 => return Err(Error::ConnectionClosed),
        PREFIX_LEN => {}
        n => {
            return Err(Error::TruncatedMessage {
                expected: PREFIX_LEN,
                actual: n,
            })
        }
    }

    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_FRAME_LEN {
        return Err(Error::PayloadTooLarge {
            size: len,
            max: MAX_FRAME_LEN,
        });
    }

    let mut payload = vec![0u8; len];
    let n = read_full(reader, &mut payload)?;
    if n != len {
        return Err(Error::TruncatedMessage {
            expected: len,
            actual: n,
        });
    }
    trace!(len, "received frame");
    Ok(payload)
}

/// Iterator over the payloads of messages read from a stream.
///
/// Iteration ends without an error when the peer closes the connection between messages.
/// Any other error is returned once, after which the iterator is exhausted, since the
/// stream position can no longer be trusted.
pub struct FrameReader<R>
where
    R: Read,
{
    reader: R,
    done: bool,
}

impl<R> FrameReader<R>
where
    R: Read,
{
    pub fn new(reader: R) -> Self {
        FrameReader {
            reader,
            done: false,
        }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R> Iterator for FrameReader<R>
where
    R: Read,
{
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match recv_frame(&mut self.reader) {
            Ok(payload) => Some(Ok(payload)),
            Err(Error::ConnectionClosed) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

/// Return an iterator of message payloads read from `reader`.
///
/// # Examples
/// ```
/// use telemetry::framing::{read_frames, send_frame};
///
/// let mut wire = Vec::new();
/// send_frame(&mut wire, b"abc").unwrap();
/// send_frame(&mut wire, b"").unwrap();
///
/// let frames: Vec<Vec<u8>> = read_frames(&wire[..]).map(Result::unwrap).collect();
/// assert_eq!(frames, vec![b"abc".to_vec(), vec![]]);
/// ```
pub fn read_frames<R>(reader: R) -> FrameReader<R>
where
    R: Read,
{
    FrameReader::new(reader)
}

#[cfg(test)]
mod tests {
    use std::io::{self, Cursor};

    use super::*;

    /// Reader that hands out at most one byte per read and interrupts every other call.
    struct Trickle {
        dat: Vec<u8>,
        pos: usize,
        interrupt: bool,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.interrupt = !self.interrupt;
            if self.interrupt {
                return Err(io::Error::from(ErrorKind::Interrupted));
            }
            if self.pos >= self.dat.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.dat[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    /// Writer that accepts at most 3 bytes per write.
    struct ShortWriter(Vec<u8>);

    impl Write for ShortWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len().min(3);
            self.0.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_wire_format() {
        let mut wire = Vec::new();
        send_frame(&mut wire, &[0xaa, 0xbb, 0xcc]).unwrap();
        assert_eq!(wire, [0, 0, 0, 3, 0xaa, 0xbb, 0xcc]);
    }

    #[test]
    fn test_partial_writes() {
        let payload: Vec<u8> = (0..=255).collect();
        let mut writer = ShortWriter(Vec::new());
        send_frame(&mut writer, &payload).unwrap();

        assert_eq!(&writer.0[..4], &256u32.to_be_bytes());
        assert_eq!(&writer.0[4..], &payload[..]);
    }

    #[test]
    fn test_does_not_over_read() {
        let mut wire = Vec::new();
        send_frame(&mut wire, b"first").unwrap();
        send_frame(&mut wire, b"second").unwrap();

        let mut cursor = Cursor::new(wire);
        assert_eq!(recv_frame(&mut cursor).unwrap(), b"first");
        assert_eq!(cursor.position(), 9);
        assert_eq!(recv_frame(&mut cursor).unwrap(), b"second");
        assert!(matches!(recv_frame(&mut cursor), Err(Error::ConnectionClosed)));
    }

    #[test]
    fn test_trickle_reader() {
        let mut wire = Vec::new();
        send_frame(&mut wire, &[1u8; 300]).unwrap();
        let mut reader = Trickle {
            dat: wire,
            pos: 0,
            interrupt: false,
        };
        assert_eq!(recv_frame(&mut reader).unwrap(), vec![1u8; 300]);
        assert!(matches!(recv_frame(&mut reader), Err(Error::ConnectionClosed)));
    }

    #[test]
    fn test_truncated_prefix() {
        let zult = recv_frame(&mut &[0u8, 0][..]);
        assert!(
            matches!(zult, Err(Error::TruncatedMessage { expected: 4, actual: 2 })),
            "{zult:?}"
        );
    }

    #[test]
    fn test_truncated_payload() {
        let dat = [0u8, 0, 0, 10, 1, 2, 3];
        let zult = recv_frame(&mut &dat[..]);
        assert!(
            matches!(zult, Err(Error::TruncatedMessage { expected: 10, actual: 3 })),
            "{zult:?}"
        );
    }

    #[test]
    fn test_declared_length_too_large() {
        let dat = (MAX_FRAME_LEN as u32 + 1).to_be_bytes();
        let zult = recv_frame(&mut &dat[..]);
        assert!(matches!(zult, Err(Error::PayloadTooLarge { .. })), "{zult:?}");
    }

    #[test]
    fn test_send_too_large_writes_nothing() {
        let payload = vec![0u8; MAX_FRAME_LEN + 1];
        let mut wire = Vec::new();
        let zult = send_frame(&mut wire, &payload);

        assert!(
            matches!(zult, Err(Error::PayloadTooLarge { size, max: MAX_FRAME_LEN }) if size == MAX_FRAME_LEN + 1),
            "{zult:?}"
        );
        assert!(wire.is_empty());
    }

    #[test]
    fn test_frame_reader_stops_after_error() {
        let mut wire = Vec::new();
        send_frame(&mut wire, b"ok").unwrap();
        wire.extend_from_slice(&[0, 0, 0, 9, 1]);

        let mut frames = read_frames(&wire[..]);
        assert_eq!(frames.next().unwrap().unwrap(), b"ok");
        assert!(matches!(
            frames.next(),
            Some(Err(Error::TruncatedMessage { .. }))
        ));
        assert!(frames.next().is_none());
    }
}
