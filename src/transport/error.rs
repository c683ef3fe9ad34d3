use std::io;

use fe2o3_amqp_types::definitions::AmqpError;

use crate::frames;

/// Errors surfaced while driving the transport.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error bubbled up from a buffer operation.
    #[error("IO Error {0:?}")]
    Io(#[from] io::Error),

    /// AMQP-level error.
    #[error("AMQP error {:?}, {:?}", .condition, .description)]
    AmqpError {
        /// Error condition
        condition: AmqpError,

        /// Error description
        description: Option<String>,
    },

    /// The 8-byte protocol preamble did not match any known protocol ID, or the
    /// connection reached EOS before a complete preamble arrived.
    #[error("Connection error: framing error")]
    FramingError,
}

impl From<serde_amqp::Error> for Error {
    fn from(err: serde_amqp::Error) -> Self {
        match err {
            serde_amqp::Error::Io(e) => Self::Io(e),
            e => {
                let description = e.to_string();
                Self::AmqpError {
                    condition: AmqpError::DecodeError,
                    description: Some(description),
                }
            }
        }
    }
}

impl From<AmqpError> for Error {
    fn from(err: AmqpError) -> Self {
        Self::AmqpError {
            condition: err,
            description: None,
        }
    }
}

impl From<frames::Error> for Error {
    fn from(err: frames::Error) -> Self {
        match err {
            frames::Error::Io(io) => Self::Io(io),
            frames::Error::DecodeError => Self::AmqpError {
                condition: AmqpError::DecodeError,
                description: None,
            },
            frames::Error::NotImplemented => Self::AmqpError {
                condition: AmqpError::NotImplemented,
                description: None,
            },
        }
    }
}
