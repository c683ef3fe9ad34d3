//! The messaging handler surface invoked during [`super::ConnectionDriver::dispatch`].
//!
//! The reference implementation's `dispatch` hands each event to a C++
//! `messaging_handler` through a try/catch that converts a thrown exception into a
//! transport condition. Rust has no exceptions to catch, so the handler returns a
//! `Result` instead; a returned `Err` plays the role of the source's caught exception.

use crate::event::Event;

/// Installed via [`super::options::ConnectionOptions::handler`] and driven by
/// [`super::ConnectionDriver::dispatch`].
pub trait Handler: std::fmt::Debug {
    /// Handles one drained event. An `Err` is caught by `dispatch` and converted into
    /// a transport condition of kind `"exception"` if one is not already set.
    fn handle(&mut self, event: &Event) -> Result<(), HandlerError>;
}

/// The error a [`Handler`] returns to signal it could not process an event.
///
/// Carries only a description, matching the source's use of `std::exception::what()`
/// as the condition's description.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    /// Builds a handler error from any displayable message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct RecordingHandler {
        seen: usize,
    }

    impl Handler for RecordingHandler {
        fn handle(&mut self, _event: &Event) -> Result<(), HandlerError> {
            self.seen += 1;
            Ok(())
        }
    }

    #[test]
    fn handler_can_be_invoked_directly() {
        let mut handler = RecordingHandler::default();
        handler.handle(&Event::transport()).unwrap();
        assert_eq!(handler.seen, 1);
    }
}
