//! The connection-wide transport state shared by every layer in the pipeline.
//!
//! This is not a socket wrapper: the engine performs no I/O. `Transport` is the place
//! the layer pipeline and the SASL state machine record facts the host cares about —
//! the error condition, whether SASL authentication succeeded, and simple trace flags
//! — without needing a back-reference to the driver that owns them.

pub mod error;
pub mod protocol_header;

pub use error::Error;

use tracing::warn;

/// A transport-level error condition, as reported to the host.
///
/// Named conditions mirror AMQP 1.0's `amqp-error` / connection-error symbols; the
/// engine only ever produces `amqp:connection:framing-error` and `exception`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorCondition {
    /// The condition's symbolic name, e.g. `"amqp:connection:framing-error"`.
    pub name: &'static str,

    /// A human-readable description, when one is available.
    pub description: Option<String>,
}

impl ErrorCondition {
    /// The framing-error condition, with a description built from the offending bytes.
    pub fn framing_error(description: impl Into<String>) -> Self {
        Self {
            name: "amqp:connection:framing-error",
            description: Some(description.into()),
        }
    }

    /// The condition raised when a handler callback returns an error during dispatch.
    pub fn exception(description: impl Into<String>) -> Self {
        Self {
            name: "exception",
            description: Some(description.into()),
        }
    }
}

/// Bit flags controlling what the transport logs, mirroring the source's trace mask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraceFlags {
    /// Trace raw bytes as they cross the wire boundary.
    pub raw: bool,
    /// Trace decoded frames.
    pub frm: bool,
}

/// Connection-wide transport state.
#[derive(Debug, Default)]
pub struct Transport {
    condition: Option<ErrorCondition>,
    /// Set once a SASL `OUTCOME` of `Ok` has been received (client) or posted (server).
    pub authenticated: bool,
    /// Whether the output half has already sent a close/EOS marker.
    pub close_sent: bool,
    /// Logging verbosity flags, set by the host via `configure`.
    pub trace: TraceFlags,
    /// Maximum number of bytes the engine will buffer before backing off; `0` means
    /// unbounded. Accounted for by the driver when growing its buffers.
    pub max_frame_size: usize,
}

impl Transport {
    /// Creates a fresh transport with no condition set and default trace flags.
    pub fn new() -> Self {
        Self {
            condition: None,
            authenticated: false,
            close_sent: false,
            trace: TraceFlags::default(),
            max_frame_size: fe2o3_amqp_types::definitions::MIN_MAX_FRAME_SIZE,
        }
    }

    /// The condition currently recorded on this transport, if any.
    pub fn condition(&self) -> Option<&ErrorCondition> {
        self.condition.as_ref()
    }

    /// Sets the error condition, but only if one is not already set — first condition
    /// wins, matching `disconnected`'s idempotence requirement.
    pub fn set_condition_if_unset(&mut self, condition: ErrorCondition) {
        if self.condition.is_none() {
            warn!(name = condition.name, "transport condition set");
            self.condition = Some(condition);
        }
    }

    /// True once any error condition has been recorded.
    pub fn has_condition(&self) -> bool {
        self.condition.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_condition_wins() {
        let mut t = Transport::new();
        t.set_condition_if_unset(ErrorCondition::framing_error("bad header"));
        t.set_condition_if_unset(ErrorCondition::exception("should not replace"));
        assert_eq!(t.condition().unwrap().name, "amqp:connection:framing-error");
    }
}
