#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs, missing_debug_implementations)]

//! A sans-I/O AMQP 1.0 connection driver: header sniffing, SASL negotiation, and a
//! pluggable handoff to whatever AMQP session/link engine a host links in underneath.
//!
//! This crate performs no I/O of its own. A host owns a socket (or any other
//! transport) and feeds bytes in, drains bytes out, and dispatches events, in a loop
//! it controls entirely:
//!
//! ```rust
//! use fe2o3_amqp_engine::driver::{ConnectionDriver, ConnectionOptions};
//!
//! let mut driver = ConnectionDriver::new();
//! driver.connect(ConnectionOptions::new().container_id("example-client")).unwrap();
//!
//! // Typical host loop, once a socket is available:
//! // loop {
//! //     let out = driver.write_buffer();
//! //     if !out.is_empty() { let n = socket.write(out)?; driver.write_done(n); }
//! //
//! //     let n = socket.read(driver.read_buffer())?;
//! //     if n == 0 { driver.read_close(); } else { driver.read_done(n); }
//! //
//! //     if !driver.dispatch() { break; }
//! // }
//! ```
//!
//! # Feature flags
//!
//! default: `[]`
//!
//! - `"acceptor"`: reserved for server-side negotiation helpers built on top of
//!   [`driver::ConnectionDriver::accept`].
//!
//! # Layout
//!
//! - [`driver`] — [`driver::ConnectionDriver`], the entry point, plus its options,
//!   error, handler, and AMQP-layer-handoff types.
//! - [`layer`] — the header sniffer and the pipeline slot it rewrites in place.
//! - [`sasl`] — the SASL negotiation state machine.
//! - [`mechanism`] — pluggable SASL mechanism backends (`PLAIN`, `ANONYMOUS`, and a
//!   multi-mechanism dispatcher).
//! - [`frames`] — the SASL performative wire codec.
//! - [`transport`] — connection-wide transport state: error conditions, protocol
//!   header encoding, and trace flags.
//! - [`event`] — the events [`driver::ConnectionDriver::dispatch`] drains to a
//!   [`driver::Handler`].

pub mod driver;
pub mod event;
pub mod frames;
pub mod layer;
pub mod mechanism;
pub mod sasl;
pub mod transport;

pub use driver::ConnectionDriver;
pub use event::Event;
