use std::io;

/// Errors surfaced while encoding or decoding a SASL frame.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An I/O error bubbled up from the underlying buffer.
    #[error("IO Error {0:?}")]
    Io(#[from] io::Error),

    /// The frame body could not be deserialized from the described-list encoding.
    #[error("Decode Error")]
    DecodeError,

    /// The frame used a `doff`/frame-type combination this codec doesn't implement.
    #[error("AmqpError: NotImplemented")]
    NotImplemented,
}

impl From<serde_amqp::Error> for Error {
    fn from(err: serde_amqp::Error) -> Self {
        match err {
            serde_amqp::Error::Io(e) => Self::Io(e),
            _ => Self::DecodeError,
        }
    }
}
