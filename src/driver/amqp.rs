//! The interface through which the (out-of-scope) AMQP session/link layer is wired
//! underneath the pipeline once SASL negotiation completes, or immediately for a
//! connection that never uses SASL at all.
//!
//! The higher-level AMQP connection/session/link state machine is explicitly out of
//! scope for this crate; the driver still needs *somewhere* to hand off bytes once the
//! pipeline reaches [`crate::layer::LayerSlot::Passthru`]. This trait is that seam,
//! mirroring how the reference implementation's `pn_io_layer_t` forwards to the AMQP
//! frame layer beneath it without knowing anything about its internals.

use bytes::BytesMut;

/// Receives bytes once the layer pipeline has bypassed SASL (or never needed it).
///
/// A host embedding this crate without the higher AMQP layer can use
/// [`NullAmqpLayer`]; a host that links the full AMQP engine implements this trait
/// over its own frame reader/writer.
pub trait AmqpLayer: std::fmt::Debug {
    /// Consumes as many leading bytes of `input` as the layer can use right now,
    /// returning the count consumed. Returning fewer than `input.len()` leaves the
    /// remainder in the driver's read buffer for the next call.
    fn process_input(&mut self, input: &[u8]) -> usize;

    /// Appends any bytes the layer wants transmitted to `output`.
    fn process_output(&mut self, output: &mut BytesMut);
}

/// A stand-in AMQP layer for hosts that only need this crate's SASL/header-sniffing
/// core: it accepts and discards all input and never produces output.
#[derive(Debug, Default)]
pub struct NullAmqpLayer {
    /// Total bytes handed to this layer, exposed for tests that want to assert
    /// passthrough actually happened without needing a real AMQP parser.
    pub bytes_seen: usize,
}

impl AmqpLayer for NullAmqpLayer {
    fn process_input(&mut self, input: &[u8]) -> usize {
        self.bytes_seen += input.len();
        input.len()
    }

    fn process_output(&mut self, _output: &mut BytesMut) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_layer_consumes_everything_and_emits_nothing() {
        let mut layer = NullAmqpLayer::default();
        assert_eq!(layer.process_input(b"open frame bytes"), 16);
        assert_eq!(layer.bytes_seen, 16);
        let mut out = BytesMut::new();
        layer.process_output(&mut out);
        assert!(out.is_empty());
    }
}
