//! Errors surfaced by [`super::ConnectionDriver`] itself, as distinct from the
//! wire-level [`crate::transport::Error`] recorded on the transport's condition.

/// Failures that can occur while driving a connection through the layer pipeline.
///
/// Framing errors and negotiation failures are *not* represented here: those are
/// reported on the transport's [`ErrorCondition`](crate::transport::ErrorCondition)
/// and surfaced to the host through [`crate::event::Event`], never by returning `Err`
/// from a driver method. This enum covers the narrower set of calls that have a
/// genuine success/failure split.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A SASL frame could not be decoded from the bytes the host delivered.
    #[error("failed to decode SASL frame: {0}")]
    Frame(#[from] crate::frames::Error),

    /// `connect`/`accept` was called a second time on an already-configured driver.
    #[error("connection is already configured")]
    AlreadyConfigured,
}
