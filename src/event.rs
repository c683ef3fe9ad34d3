//! Events the driver posts to the host's event collector.

use crate::transport::ErrorCondition;

/// An event drained from the driver during [`dispatch`](crate::driver::ConnectionDriver::dispatch).
///
/// A single observable event kind, `Transport`, posted on every SASL state
/// transition and on error-condition changes; this enum carries the minimal payload a
/// handler needs to react to one.
#[derive(Debug, Clone)]
pub enum Event {
    /// The transport changed: either a SASL state transition occurred, or the
    /// transport's error condition was set. `condition` is populated in the latter
    /// case.
    Transport {
        /// The error condition that was just set, if this event was triggered by one.
        condition: Option<ErrorCondition>,
    },
}

impl Event {
    /// A transport event carrying no error condition, e.g. a plain state transition.
    pub fn transport() -> Self {
        Event::Transport { condition: None }
    }

    /// A transport event reporting that `condition` was just set.
    pub fn transport_error(condition: ErrorCondition) -> Self {
        Event::Transport {
            condition: Some(condition),
        }
    }
}
