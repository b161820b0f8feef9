#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Encoded packet bytes were not exactly [TelemetryPacket::LEN](crate::TelemetryPacket::LEN)
    /// bytes long.
    #[error("malformed payload: expected {expected} bytes, got {actual}")]
    MalformedPayload { actual: usize, expected: usize },

    /// Compressed stream is corrupt, truncated, or does not inflate to the expected size.
    #[error("decompression failed: {0}")]
    DecompressionFailed(String),

    /// Peer closed the connection cleanly between messages.
    #[error("connection closed")]
    ConnectionClosed,

    /// Peer closed the connection part way through a message.
    #[error("truncated message: expected {expected} bytes, got {actual}")]
    TruncatedMessage { expected: usize, actual: usize },

    #[error("payload of {size} bytes exceeds maximum frame length {max}")]
    PayloadTooLarge { size: usize, max: usize },

    /// Receiver gave up after this many consecutive undecodable messages.
    #[error("too many consecutive failures ({0})")]
    TooManyFailures(usize),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for errors that end a connection, as opposed to errors scoped to a
    /// single message.
    #[must_use]
    pub fn is_connection_level(&self) -> bool {
        matches!(
            self,
            Error::ConnectionClosed | Error::TruncatedMessage { .. } | Error::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
