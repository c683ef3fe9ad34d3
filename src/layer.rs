//! The layer pipeline: header sniffing and the slot that rewires itself as protocols
//! are detected.
//!
//! The reference implementation swaps a pair of function pointers (`process_input`,
//! `process_output`) inside a fixed-size `pn_io_layer_t` array slot. This
//! reimplementation models the same "rewrite in place" behavior as a single tagged
//! enum the driver matches on, per the design notes: no layer is ever reallocated,
//! only its discriminant changes.

use crate::transport::protocol_header::{quote_hex, ProtocolId};

/// The literal 8-byte SASL protocol header, `"AMQP" 0x03 0x01 0x00 0x00`.
pub const SASL_HEADER: [u8; 8] = *b"AMQP\x03\x01\x00\x00";

/// The pipeline slot shared by the header sniffer and the SASL layer.
///
/// Progresses monotonically: `HeaderSniffer -> {SaslWriteHeader | SaslReadHeader} ->
/// Sasl -> Passthru`. The two middle states exist because the input (reading the
/// peer's header) and output (writing ours) directions can complete in either order;
/// whichever finishes first advances the shared slot to the variant that still has
/// work to do on the other side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerSlot {
    /// Neither direction has exchanged a protocol header yet.
    HeaderSniffer,
    /// The peer's header has been read and classified as SASL; our header has not
    /// been written yet.
    SaslWriteHeader,
    /// Our header has been written; the peer's has not been read yet.
    SaslReadHeader,
    /// Both headers have been exchanged; SASL frames flow in both directions.
    Sasl,
    /// Negotiation is complete (or bypassed). Bytes flow unchanged to the AMQP layer.
    Passthru,
}

impl LayerSlot {
    /// Whether the input direction still needs to see the peer's header.
    pub fn awaits_input_header(self) -> bool {
        matches!(self, LayerSlot::HeaderSniffer | LayerSlot::SaslReadHeader)
    }

    /// Whether the output direction still needs to write our header.
    pub fn awaits_output_header(self) -> bool {
        matches!(self, LayerSlot::HeaderSniffer | LayerSlot::SaslWriteHeader)
    }

    /// The slot reached once the input direction's header requirement is satisfied.
    pub fn after_input_header(self) -> LayerSlot {
        match self {
            LayerSlot::HeaderSniffer => LayerSlot::SaslWriteHeader,
            LayerSlot::SaslReadHeader => LayerSlot::Sasl,
            other => other,
        }
    }

    /// The slot reached once the output direction's header requirement is satisfied.
    pub fn after_output_header(self) -> LayerSlot {
        match self {
            LayerSlot::HeaderSniffer => LayerSlot::SaslReadHeader,
            LayerSlot::SaslWriteHeader => LayerSlot::Sasl,
            other => other,
        }
    }
}

/// The result of classifying an 8-byte protocol preamble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderKind {
    /// Plain AMQP.
    Amqp,
    /// AMQP over SASL.
    Sasl,
    /// AMQP over TLS.
    Tls,
    /// Fewer than 8 bytes are available so far; wait for more.
    Insufficient,
    /// 8 bytes were available but didn't match any known protocol header.
    Other,
}

/// Classifies a preamble. `buf` may hold fewer than 8 bytes; in that case the result
/// is always [`HeaderKind::Insufficient`] regardless of content.
pub fn classify_header(buf: &[u8]) -> HeaderKind {
    if buf.len() < 8 {
        return HeaderKind::Insufficient;
    }
    let mut array = [0u8; 8];
    array.copy_from_slice(&buf[..8]);
    match <[u8; 8] as TryInto<crate::transport::protocol_header::ProtocolHeader>>::try_into(array)
    {
        Ok(header) => match header.id {
            ProtocolId::Amqp => HeaderKind::Amqp,
            ProtocolId::Sasl => HeaderKind::Sasl,
            ProtocolId::Tls => HeaderKind::Tls,
        },
        Err(_) => HeaderKind::Other,
    }
}

/// Builds the framing-error description for a rejected preamble: a quoted hex
/// rendering of the offending bytes plus the protocol name that was detected (if
/// any).
pub fn framing_error_description(bytes: &[u8], detected: &str) -> String {
    format!(
        "unexpected protocol header {}, expected one of AMQP/AMQP-SASL/AMQP-TLS (detected: {})",
        quote_hex(bytes),
        detected
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_bytes_never_classify() {
        assert_eq!(classify_header(b"AMQP\x03"), HeaderKind::Insufficient);
    }

    #[test]
    fn sasl_header_classifies_as_sasl() {
        assert_eq!(classify_header(&SASL_HEADER), HeaderKind::Sasl);
    }

    #[test]
    fn non_amqp_bytes_classify_as_other() {
        assert_eq!(classify_header(b"HTTP/1.1"), HeaderKind::Other);
    }

    #[test]
    fn slot_progresses_regardless_of_completion_order() {
        // Input completes first.
        let slot = LayerSlot::HeaderSniffer.after_input_header();
        assert_eq!(slot, LayerSlot::SaslWriteHeader);
        assert_eq!(slot.after_output_header(), LayerSlot::Sasl);

        // Output completes first.
        let slot = LayerSlot::HeaderSniffer.after_output_header();
        assert_eq!(slot, LayerSlot::SaslReadHeader);
        assert_eq!(slot.after_input_header(), LayerSlot::Sasl);
    }
}
