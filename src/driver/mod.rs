//! The connection driver: owns the host-facing buffers, runs the layer pipeline, and
//! drains events to an installed [`Handler`].
//!
//! This is the core entry point of the crate. A host alternates
//! `read_buffer`/`read_done`, `write_buffer`/`write_done`, and `dispatch` until
//! [`ConnectionDriver::dispatch`] reports the driver is no longer live. The driver
//! performs no I/O itself — every byte in or out passes through buffers the host
//! owns the timing of.

pub mod amqp;
pub mod error;
pub mod handler;
pub mod options;

pub use amqp::{AmqpLayer, NullAmqpLayer};
pub use error::Error;
pub use handler::{Handler, HandlerError};
pub use options::ConnectionOptions;

use std::collections::VecDeque;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, instrument, trace, warn};

use crate::{
    event::Event,
    frames::sasl::{Frame, FrameCodec},
    layer::{classify_header, framing_error_description, HeaderKind, LayerSlot, SASL_HEADER},
    sasl::{Role, SaslContext, SaslState},
    transport::{protocol_header::ProtocolHeader, ErrorCondition, Transport},
};

/// How much spare capacity [`ConnectionDriver::read_buffer`] reserves for the host
/// before handing the buffer back, matching the reference implementation's use of a
/// fixed-size scratch region per read.
const READ_CHUNK: usize = 4096;

/// Drives a single AMQP connection through header sniffing, SASL negotiation, and
/// passthrough to the (out-of-scope) AMQP layer underneath.
///
/// Owns every buffer the host touches. The host must not call any other driver
/// method while holding the slice returned by `read_buffer`/`write_buffer` — Rust's
/// borrow checker enforces this directly, since both return a reference borrowed from
/// `self`.
pub struct ConnectionDriver {
    read_buf: BytesMut,
    write_buf: BytesMut,
    events: VecDeque<Event>,
    layer: LayerSlot,
    transport: Transport,
    sasl: Option<SaslContext>,
    handler: Option<Box<dyn Handler>>,
    amqp: Box<dyn AmqpLayer>,

    is_server: bool,
    configured: bool,
    read_closed: bool,
    write_closed: bool,

    container_id: Option<String>,
    channel_max: Option<u16>,
    idle_timeout: Option<Duration>,
}

impl std::fmt::Debug for ConnectionDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionDriver")
            .field("layer", &self.layer)
            .field("transport", &self.transport)
            .field("sasl", &self.sasl)
            .field("is_server", &self.is_server)
            .field("configured", &self.configured)
            .field("read_closed", &self.read_closed)
            .field("write_closed", &self.write_closed)
            .field("read_buf_len", &self.read_buf.len())
            .field("write_buf_len", &self.write_buf.len())
            .finish()
    }
}

impl Default for ConnectionDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionDriver {
    /// Creates a driver whose passthrough bytes are discarded by [`NullAmqpLayer`].
    pub fn new() -> Self {
        Self::with_amqp_layer(Box::new(NullAmqpLayer::default()))
    }

    /// Creates a driver that hands passthrough bytes to `amqp` (the out-of-scope AMQP
    /// session/link engine) instead of discarding them.
    pub fn with_amqp_layer(amqp: Box<dyn AmqpLayer>) -> Self {
        Self {
            read_buf: BytesMut::new(),
            write_buf: BytesMut::new(),
            events: VecDeque::new(),
            layer: LayerSlot::HeaderSniffer,
            transport: Transport::new(),
            sasl: None,
            handler: None,
            amqp,
            is_server: false,
            configured: false,
            read_closed: false,
            write_closed: false,
            container_id: None,
            channel_max: None,
            idle_timeout: None,
        }
    }

    /// The connection-wide transport state: error condition, `authenticated` flag,
    /// trace configuration.
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// The SASL negotiation context, once SASL has been referenced (via `configure`
    /// or because the header sniffer detected an `AMQP-SASL` preamble).
    pub fn sasl(&self) -> Option<&SaslContext> {
        self.sasl.as_ref()
    }

    /// The current layer slot, mostly useful for tests asserting the pipeline
    /// advanced monotonically.
    pub fn layer(&self) -> LayerSlot {
        self.layer
    }

    /// The region the host should copy received bytes into. Empty once the read tail
    /// is closed.
    pub fn read_buffer(&mut self) -> &mut BytesMut {
        if !self.read_closed {
            self.read_buf.reserve(READ_CHUNK);
        }
        &mut self.read_buf
    }

    /// Commits `n` bytes appended to the buffer returned by [`Self::read_buffer`] and
    /// runs the top of the pipeline over them.
    #[instrument(skip(self))]
    pub fn read_done(&mut self, n: usize) {
        trace!(n, "read_done");
        self.process_input();
    }

    /// Signals orderly input EOS: no more bytes will ever arrive.
    pub fn read_close(&mut self) {
        self.read_closed = true;
        self.process_input();
    }

    /// Bytes the host must transmit, drawn from the output pipeline on demand.
    pub fn write_buffer(&mut self) -> &[u8] {
        if self.write_buf.is_empty() && !self.write_closed {
            self.process_output();
        }
        &self.write_buf
    }

    /// Consumes `n` bytes the host has transmitted; may enable generation of more on
    /// the next [`Self::write_buffer`] call.
    pub fn write_done(&mut self, n: usize) {
        let n = n.min(self.write_buf.len());
        self.write_buf.advance(n);
    }

    /// Signals output EOS: no more bytes will ever be produced.
    pub fn write_close(&mut self) {
        self.write_closed = true;
    }

    /// Drains pending events to the installed handler. Returns whether the driver is
    /// still live.
    #[instrument(skip(self))]
    pub fn dispatch(&mut self) -> bool {
        self.drain_sasl_events();
        let mut events = std::mem::take(&mut self.events);
        if let Some(handler) = self.handler.as_mut() {
            for event in events.drain(..) {
                if let Err(err) = handler.handle(&event) {
                    debug!(%err, "handler returned an error during dispatch");
                    self.transport
                        .set_condition_if_unset(ErrorCondition::exception(err.to_string()));
                }
            }
        } else {
            events.clear();
        }
        !self.is_finished()
    }

    fn is_finished(&self) -> bool {
        self.read_closed && self.write_closed
    }

    /// Records an involuntary disconnect: sets the transport condition if unset, and
    /// closes both halves. Idempotent — the first condition wins.
    #[instrument(skip(self, condition))]
    pub fn disconnected(&mut self, condition: ErrorCondition) {
        self.transport.set_condition_if_unset(condition);
        self.read_closed = true;
        self.write_closed = true;
    }

    /// Binds an options bundle to the connection: applies container-level fields,
    /// flips server mode if asked, lazily creates the SASL context if any SASL field
    /// was set, and stores the handler.
    ///
    /// Fails with [`Error::AlreadyConfigured`] if called twice on the same driver;
    /// the reference implementation's `configure` is likewise a one-shot setup step.
    pub fn configure(&mut self, options: ConnectionOptions, is_server: bool) -> Result<(), Error> {
        if self.configured {
            return Err(Error::AlreadyConfigured);
        }
        self.is_server = is_server;
        self.container_id = options.container_id;
        self.channel_max = options.channel_max;
        self.idle_timeout = options.idle_timeout;

        let wants_sasl = options.allowed_mechs.is_some()
            || options.config_name.is_some()
            || options.config_path.is_some()
            || options.user_password.is_some()
            || options.remote_hostname.is_some()
            || options.done_outcome.is_some();

        if wants_sasl {
            let ctx = self.ensure_sasl();
            if let Some(mechs) = options.allowed_mechs {
                ctx.included_mechanisms = Some(mechs);
            }
            if options.config_name.is_some() {
                ctx.config_name = options.config_name;
            }
            if let Some(dir) = options.config_path {
                ctx.config_dir = Some(dir);
            }
            if let Some((user, password)) = options.user_password {
                ctx.username = Some(user);
                ctx.password = Some(password);
                ctx.set_backend(Box::new(crate::mechanism::PlainMechanism));
            }
            if let Some(fqdn) = options.remote_hostname {
                ctx.remote_fqdn = Some(fqdn);
            }
            // A server always advertises first; nothing else will ever prompt it to
            // post SASL_MECHANISMS, since it has no frame from the client to react to
            // yet.
            if is_server {
                ctx.begin_server_advertise();
            }
            if let Some(outcome) = options.done_outcome {
                ctx.outcome = outcome;
                ctx.set_desired_state(SaslState::PostedOutcome);
            }
        }

        self.handler = options.handler;
        self.configured = true;
        Ok(())
    }

    /// Merges container defaults with `options`, configures as a client, and opens
    /// the connection. Container-level merging is a host responsibility out of this
    /// crate's scope; callers pass the fully-merged bundle.
    pub fn connect(&mut self, options: ConnectionOptions) -> Result<(), Error> {
        self.configure(options, false)
    }

    /// Merges container defaults with `options` and configures as a server.
    pub fn accept(&mut self, options: ConnectionOptions) -> Result<(), Error> {
        self.configure(options, true)
    }

    fn ensure_sasl(&mut self) -> &mut SaslContext {
        let role = if self.is_server {
            Role::Server
        } else {
            Role::Client
        };
        self.sasl.get_or_insert_with(|| SaslContext::new(role))
    }

    fn drain_sasl_events(&mut self) {
        if let Some(ctx) = self.sasl.as_mut() {
            self.events.extend(ctx.take_events());
        }
    }

    fn fail_framing(&mut self, bytes: &[u8], detected: &str) {
        let description = framing_error_description(bytes, detected);
        let condition = ErrorCondition::framing_error(description);
        self.transport.close_sent = true;
        self.transport.set_condition_if_unset(condition.clone());
        self.events.push_back(Event::transport_error(condition));
        self.read_closed = true;
        self.write_closed = true;
    }

    /// Runs the top of the input pipeline over whatever bytes `read_done`/`read_close`
    /// just committed, rewiring the layer slot as protocols are detected.
    #[instrument(skip(self))]
    fn process_input(&mut self) {
        loop {
            match self.layer {
                LayerSlot::HeaderSniffer | LayerSlot::SaslReadHeader => match classify_header(&self.read_buf) {
                    HeaderKind::Insufficient => {
                        if self.read_closed {
                            let bytes = self.read_buf.to_vec();
                            self.fail_framing(&bytes, "incomplete protocol header");
                        }
                        break;
                    }
                    HeaderKind::Sasl => {
                        self.read_buf.advance(8);
                        self.ensure_sasl();
                        self.layer = self.layer.after_input_header();
                        continue;
                    }
                    HeaderKind::Amqp => {
                        let header = self.read_buf.split_to(8);
                        self.amqp.process_input(&header);
                        self.layer = LayerSlot::Passthru;
                        continue;
                    }
                    HeaderKind::Tls => {
                        let bytes = self.read_buf[..8].to_vec();
                        self.fail_framing(&bytes, "AMQP-TLS");
                        break;
                    }
                    HeaderKind::Other => {
                        let bytes = self.read_buf[..8].to_vec();
                        self.fail_framing(&bytes, "unrecognized");
                        break;
                    }
                },
                LayerSlot::SaslWriteHeader | LayerSlot::Sasl => {
                    self.process_sasl_input();
                    break;
                }
                LayerSlot::Passthru => {
                    if !self.read_buf.is_empty() {
                        let n = self.amqp.process_input(&self.read_buf);
                        self.read_buf.advance(n);
                    }
                    break;
                }
            }
        }
        self.drain_sasl_events();
    }

    /// Pulls complete length-delimited SASL frames out of the read buffer and hands
    /// each to [`SaslContext`]'s received-frame handlers, in FIFO order.
    fn process_sasl_input(&mut self) {
        loop {
            let Some(mut frame_bytes) = self.take_length_delimited_frame() else {
                break;
            };
            let mut codec = FrameCodec {};
            match codec.decode(&mut frame_bytes) {
                Ok(Some(frame)) => self.handle_sasl_frame(frame),
                Ok(None) => {
                    warn!("SASL frame claimed a size that did not contain a full performative");
                    let bytes = frame_bytes.to_vec();
                    self.fail_framing(&bytes, "truncated SASL frame");
                    break;
                }
                Err(err) => {
                    warn!(%err, "failed to decode SASL frame");
                    let bytes = frame_bytes.to_vec();
                    self.fail_framing(&bytes, "malformed SASL frame");
                    break;
                }
            }
            if self.sasl.as_ref().is_some_and(SaslContext::is_bypassed) {
                self.layer = LayerSlot::Passthru;
                break;
            }
        }
    }

    /// Splits one complete AMQP-framed (4-byte big-endian size, size inclusive of
    /// itself) frame off the front of the read buffer, stripping the size field. Waits
    /// for more bytes if the buffer doesn't yet hold a full frame.
    fn take_length_delimited_frame(&mut self) -> Option<BytesMut> {
        if self.read_buf.len() < 4 {
            return None;
        }
        let size = u32::from_be_bytes(self.read_buf[..4].try_into().unwrap()) as usize;
        // 4-byte size field + 2-byte doff/ftype + 2-byte reserved is the smallest a
        // frame `FrameCodec::decode` can read without panicking on a short buffer.
        if size < 8 || self.read_buf.len() < size {
            return None;
        }
        let mut frame = self.read_buf.split_to(size);
        frame.advance(4);
        Some(frame)
    }

    fn handle_sasl_frame(&mut self, frame: Frame) {
        let Some(ctx) = self.sasl.as_mut() else {
            return;
        };
        match frame {
            Frame::Init(init) => ctx.on_init(init),
            Frame::Mechanisms(mechanisms) => ctx.on_mechanisms(mechanisms),
            Frame::Challenge(challenge) => ctx.on_challenge(challenge),
            Frame::Response(response) => ctx.on_response(response),
            Frame::Outcome(outcome) => {
                let authenticated = ctx.on_outcome(outcome);
                self.transport.authenticated = authenticated;
            }
        }
        if ctx.is_terminal_input_state() {
            ctx.set_input_bypass();
        }
        self.drain_sasl_events();
    }

    /// Runs the top of the output pipeline, producing bytes into the write buffer.
    #[instrument(skip(self))]
    fn process_output(&mut self) {
        loop {
            match self.layer {
                LayerSlot::HeaderSniffer => {
                    if self.is_server {
                        // A server doesn't choose unilaterally; it mirrors whatever
                        // the client's header turns out to be, so it must wait for
                        // the input side to classify it first.
                        break;
                    }
                    if self.sasl.is_some() {
                        self.write_buf.extend_from_slice(&SASL_HEADER);
                        self.layer = self.layer.after_output_header();
                        self.try_anonymous_short_circuit();
                        continue;
                    }
                    let header: [u8; 8] = ProtocolHeader::amqp().into();
                    self.write_buf.extend_from_slice(&header);
                    self.layer = LayerSlot::Passthru;
                    continue;
                }
                LayerSlot::SaslWriteHeader => {
                    // Input already classified SASL (and created the context); echo
                    // our own header back now.
                    self.write_buf.extend_from_slice(&SASL_HEADER);
                    self.layer = self.layer.after_output_header();
                    continue;
                }
                LayerSlot::SaslReadHeader | LayerSlot::Sasl => {
                    self.drain_sasl_output();
                    break;
                }
                LayerSlot::Passthru => {
                    self.amqp.process_output(&mut self.write_buf);
                    break;
                }
            }
        }
    }

    fn drain_sasl_output(&mut self) {
        let Some(ctx) = self.sasl.as_mut() else {
            return;
        };
        let frames = ctx.drain();
        let mut codec = FrameCodec {};
        for frame in frames {
            let mut body = BytesMut::new();
            if let Err(err) = codec.encode(frame, &mut body) {
                warn!(%err, "failed to encode SASL frame");
                continue;
            }
            let total_len = (body.len() as u32) + 4;
            self.write_buf.extend_from_slice(&total_len.to_be_bytes());
            self.write_buf.extend_from_slice(&body);
        }
        if ctx.is_terminal_output_state() {
            ctx.set_output_bypass();
        }
        if ctx.is_bypassed() {
            self.layer = LayerSlot::Passthru;
        }
        self.drain_sasl_events();
    }

    /// Client-only proactive optimization: if the configured allow-list is exactly
    /// `"ANONYMOUS"`, skip waiting for the peer's `MECHANISMS` frame.
    fn try_anonymous_short_circuit(&mut self) {
        if let Some(ctx) = self.sasl.as_mut() {
            ctx.try_anonymous_short_circuit();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(driver: &mut ConnectionDriver, bytes: &[u8]) {
        driver.read_buffer().extend_from_slice(bytes);
        driver.read_done(bytes.len());
    }

    #[test]
    fn client_without_sasl_writes_plain_amqp_header_and_goes_passthru() {
        let mut driver = ConnectionDriver::new();
        driver.configure(ConnectionOptions::new(), false).unwrap();
        let out = driver.write_buffer().to_vec();
        let expected: [u8; 8] = ProtocolHeader::amqp().into();
        assert_eq!(out, expected);
        assert_eq!(driver.layer(), LayerSlot::Passthru);
    }

    #[test]
    fn partial_header_is_not_classified_until_complete() {
        let mut driver = ConnectionDriver::new();
        driver.configure(ConnectionOptions::new().allowed_mechs("ANONYMOUS"), false).unwrap();
        let _ = driver.write_buffer();

        feed(&mut driver, b"AMQP");
        assert_eq!(driver.layer(), LayerSlot::SaslReadHeader);

        feed(&mut driver, &[0x03, 0x01, 0x00, 0x00]);
        assert_eq!(driver.layer(), LayerSlot::Sasl);
    }

    #[test]
    fn server_framing_error_on_non_amqp_bytes() {
        let mut driver = ConnectionDriver::new();
        driver.configure(ConnectionOptions::new(), true).unwrap();
        feed(&mut driver, b"HTTP/1.1");
        assert!(driver.transport().condition().is_some());
        assert_eq!(
            driver.transport().condition().unwrap().name,
            "amqp:connection:framing-error"
        );
        assert!(!driver.dispatch());
    }

    #[test]
    fn server_waits_for_client_header_before_writing() {
        let mut driver = ConnectionDriver::new();
        driver.configure(ConnectionOptions::new(), true).unwrap();
        assert!(driver.write_buffer().is_empty());
        feed(&mut driver, &SASL_HEADER);
        assert_eq!(driver.write_buffer(), &SASL_HEADER[..]);
    }

    /// Shuttles bytes between two drivers until neither produces any more, as a
    /// stand-in for the socket a real host would own.
    fn pump(a: &mut ConnectionDriver, b: &mut ConnectionDriver) {
        for _ in 0..16 {
            let mut progressed = false;
            let out = a.write_buffer().to_vec();
            if !out.is_empty() {
                a.write_done(out.len());
                b.read_buffer().extend_from_slice(&out);
                b.read_done(out.len());
                progressed = true;
            }
            let out = b.write_buffer().to_vec();
            if !out.is_empty() {
                b.write_done(out.len());
                a.read_buffer().extend_from_slice(&out);
                a.read_done(out.len());
                progressed = true;
            }
            if !progressed {
                break;
            }
        }
    }

    #[test]
    fn plain_mechanism_round_trip_succeeds_with_matching_credentials() {
        let mut client = ConnectionDriver::new();
        client
            .connect(ConnectionOptions::new().user_password("alice", "secret"))
            .unwrap();
        let mut server = ConnectionDriver::new();
        server
            .accept(ConnectionOptions::new().user_password("alice", "secret"))
            .unwrap();

        pump(&mut client, &mut server);

        // `transport().authenticated` is only ever set on the client side (it is
        // written solely by the client's received-OUTCOME handler); the server's
        // equivalent fact is its own negotiated outcome.
        assert!(client.transport().authenticated);
        assert_eq!(server.sasl().unwrap().outcome(), crate::sasl::Outcome::Ok);
        assert_eq!(client.layer(), LayerSlot::Passthru);
        assert_eq!(server.layer(), LayerSlot::Passthru);
    }

    #[test]
    fn plain_mechanism_round_trip_fails_with_wrong_password() {
        let mut client = ConnectionDriver::new();
        client
            .connect(ConnectionOptions::new().user_password("alice", "hunter2"))
            .unwrap();
        let mut server = ConnectionDriver::new();
        server
            .accept(ConnectionOptions::new().user_password("alice", "secret"))
            .unwrap();

        pump(&mut client, &mut server);

        assert!(!client.transport().authenticated);
        assert!(!server.transport().authenticated);
    }

    #[test]
    fn client_anonymous_short_circuit_skips_the_mechanisms_round_trip() {
        // The short-circuit is a client-only local optimization that never produces a
        // real SASL_INIT frame (see SaslContext::try_anonymous_short_circuit), so it is
        // exercised here against a single driver rather than a simulated peer.
        let mut client = ConnectionDriver::new();
        client
            .connect(ConnectionOptions::new().allowed_mechs("ANONYMOUS"))
            .unwrap();
        let out = client.write_buffer();
        assert_eq!(out, &SASL_HEADER[..]);
        let ctx = client.sasl().expect("sasl context created for anonymous connect");
        assert_eq!(ctx.desired_state(), SaslState::PretendOutcome);
        assert_eq!(ctx.last_state(), SaslState::PretendOutcome);
    }
}
