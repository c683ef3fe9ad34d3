//! The pluggable SASL mechanism backend interface.
//!
//! The state machine in [`crate::sasl`] never encodes authentication logic itself; it
//! calls out to a `Box<dyn MechanismBackend>` through this capability set, the same
//! separation the reference implementation draws between the transport's SASL state
//! machine and its `pn_sasl_implementation` vtable. `ANONYMOUS` and `PLAIN` are
//! provided as the two built-in backends, generalizing the client-side `SaslProfile`
//! and server-side `SaslAcceptor` split into a single role-polymorphic trait.

use crate::sasl::SaslContext;

/// Capabilities the SASL state machine calls through to drive a concrete mechanism.
///
/// A backend implementation holds whatever scratch state its mechanism needs (nonce
/// material, a partially parsed credential, ...); the context passed to every method
/// holds the negotiation-wide fields (`username`, `password`, `outcome`, `bytes_out`,
/// ...) that the backend reads and writes.
pub trait MechanismBackend {
    /// Space-separated advertisement list this backend is willing to offer as a
    /// server, or `""` if this backend only operates as a client.
    fn list_mechs(&self, ctx: &SaslContext) -> String;

    /// Initializes server-side state. Returns whether the backend is ready to accept
    /// an `INIT` frame.
    fn init_server(&mut self, ctx: &mut SaslContext) -> bool;

    /// Initializes client-side state. Returns whether the backend is ready to post an
    /// `INIT` frame.
    fn init_client(&mut self, ctx: &mut SaslContext) -> bool;

    /// Server: handle a received `SASL_INIT`, the chosen mechanism plus its initial
    /// response. Sets `ctx.outcome` and may set `ctx.bytes_out` with a challenge.
    fn process_init(&mut self, ctx: &mut SaslContext, mechanism: &str, initial_response: &[u8]);

    /// Server: handle a received `SASL_RESPONSE`.
    fn process_response(&mut self, ctx: &mut SaslContext, response: &[u8]);

    /// Client: handle a received `SASL_CHALLENGE`. Sets `ctx.bytes_out` with the
    /// response payload.
    fn process_challenge(&mut self, ctx: &mut SaslContext, challenge: &[u8]);

    /// Client: handle the filtered `SASL_MECHANISMS` advertisement and decide whether
    /// this backend can select one of the offered mechanisms. Sets
    /// `ctx.selected_mechanism` and `ctx.bytes_out` (the initial response) on success.
    fn process_mechanisms(&mut self, ctx: &mut SaslContext, mechs: &str) -> bool;
}

const ANONYMOUS: &str = "ANONYMOUS";
const PLAIN: &str = "PLAIN";

/// The `ANONYMOUS` mechanism: no credentials are exchanged, the initial response is
/// always empty.
#[derive(Debug, Default)]
pub struct AnonymousMechanism;

impl MechanismBackend for AnonymousMechanism {
    fn list_mechs(&self, _ctx: &SaslContext) -> String {
        ANONYMOUS.to_string()
    }

    fn init_server(&mut self, _ctx: &mut SaslContext) -> bool {
        true
    }

    fn init_client(&mut self, _ctx: &mut SaslContext) -> bool {
        true
    }

    fn process_init(&mut self, ctx: &mut SaslContext, mechanism: &str, _initial_response: &[u8]) {
        if mechanism.eq_ignore_ascii_case(ANONYMOUS) {
            ctx.outcome = crate::sasl::state::Outcome::Ok;
        } else {
            ctx.outcome = crate::sasl::state::Outcome::Auth;
        }
    }

    fn process_response(&mut self, ctx: &mut SaslContext, _response: &[u8]) {
        ctx.outcome = crate::sasl::state::Outcome::Sys;
    }

    fn process_challenge(&mut self, _ctx: &mut SaslContext, _challenge: &[u8]) {
        // ANONYMOUS never issues a challenge; nothing to respond with.
    }

    fn process_mechanisms(&mut self, ctx: &mut SaslContext, mechs: &str) -> bool {
        let selected = mechs
            .split_whitespace()
            .find(|m| m.eq_ignore_ascii_case(ANONYMOUS));
        match selected {
            Some(_) => {
                ctx.selected_mechanism = Some(ANONYMOUS.to_string());
                ctx.bytes_out = Some(Vec::new());
                true
            }
            None => false,
        }
    }
}

/// The `PLAIN` mechanism: a single NUL-separated `authzid\0authcid\0passwd` response.
#[derive(Debug, Default)]
pub struct PlainMechanism;

impl PlainMechanism {
    fn encode_response(username: &str, password: &str) -> Vec<u8> {
        let mut buf = Vec::with_capacity(username.len() + password.len() + 2);
        buf.push(0u8);
        buf.extend_from_slice(username.as_bytes());
        buf.push(0u8);
        buf.extend_from_slice(password.as_bytes());
        buf
    }

    /// Splits a PLAIN initial response into `(authcid, passwd)`, ignoring `authzid`.
    fn split_response(response: &[u8]) -> Option<(&[u8], &[u8])> {
        let mut parts = response.splitn(3, |b| *b == 0u8);
        let _authzid = parts.next()?;
        let authcid = parts.next()?;
        let passwd = parts.next()?;
        Some((authcid, passwd))
    }
}

impl MechanismBackend for PlainMechanism {
    fn list_mechs(&self, _ctx: &SaslContext) -> String {
        PLAIN.to_string()
    }

    fn init_server(&mut self, _ctx: &mut SaslContext) -> bool {
        true
    }

    fn init_client(&mut self, ctx: &mut SaslContext) -> bool {
        ctx.username.is_some() && ctx.password.is_some()
    }

    fn process_init(&mut self, ctx: &mut SaslContext, mechanism: &str, initial_response: &[u8]) {
        if !mechanism.eq_ignore_ascii_case(PLAIN) {
            ctx.outcome = crate::sasl::state::Outcome::Auth;
            return;
        }
        ctx.outcome = match Self::split_response(initial_response) {
            Some((authcid, passwd)) => match (&ctx.username, &ctx.password) {
                (Some(expected_user), Some(expected_pass))
                    if expected_user.as_bytes() == authcid
                        && expected_pass.as_bytes() == passwd =>
                {
                    crate::sasl::state::Outcome::Ok
                }
                _ => crate::sasl::state::Outcome::Auth,
            },
            None => crate::sasl::state::Outcome::Auth,
        };
    }

    fn process_response(&mut self, ctx: &mut SaslContext, _response: &[u8]) {
        // PLAIN completes in a single INIT; an unsolicited RESPONSE is a protocol
        // error from this mechanism's perspective.
        ctx.outcome = crate::sasl::state::Outcome::Sys;
    }

    fn process_challenge(&mut self, _ctx: &mut SaslContext, _challenge: &[u8]) {
        // PLAIN never receives a challenge.
    }

    fn process_mechanisms(&mut self, ctx: &mut SaslContext, mechs: &str) -> bool {
        let selected = mechs.split_whitespace().find(|m| m.eq_ignore_ascii_case(PLAIN));
        match (selected, &ctx.username, &ctx.password) {
            (Some(_), Some(username), Some(password)) => {
                ctx.selected_mechanism = Some(PLAIN.to_string());
                ctx.bytes_out = Some(Self::encode_response(username, password));
                true
            }
            _ => false,
        }
    }
}

/// Combines several backends into one, so a server can offer more than one mechanism
/// through the single `Box<dyn MechanismBackend>` a [`SaslContext`] holds.
///
/// The active backend is picked by [`MechanismBackend::process_init`] (server) from
/// the mechanism name the peer selected, or by [`MechanismBackend::process_mechanisms`]
/// (client) from the first backend able to select itself out of the peer's
/// advertisement. Once chosen, every subsequent call is delegated to it.
#[derive(Default)]
pub struct CompositeBackend {
    backends: Vec<Box<dyn MechanismBackend>>,
    active: Option<usize>,
}

impl std::fmt::Debug for CompositeBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeBackend")
            .field("len", &self.backends.len())
            .field("active", &self.active)
            .finish()
    }
}

impl CompositeBackend {
    /// Builds a composite backend from its member mechanisms, tried in order.
    pub fn new(backends: Vec<Box<dyn MechanismBackend>>) -> Self {
        Self {
            backends,
            active: None,
        }
    }

    fn find_by_name(&self, ctx: &SaslContext, mechanism: &str) -> Option<usize> {
        self.backends
            .iter()
            .position(|b| b.list_mechs(ctx).eq_ignore_ascii_case(mechanism))
    }
}

impl MechanismBackend for CompositeBackend {
    fn list_mechs(&self, ctx: &SaslContext) -> String {
        self.backends
            .iter()
            .map(|b| b.list_mechs(ctx))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn init_server(&mut self, ctx: &mut SaslContext) -> bool {
        self.backends.iter_mut().any(|b| b.init_server(ctx))
    }

    fn init_client(&mut self, ctx: &mut SaslContext) -> bool {
        self.backends.iter_mut().any(|b| b.init_client(ctx))
    }

    fn process_init(&mut self, ctx: &mut SaslContext, mechanism: &str, initial_response: &[u8]) {
        match self.find_by_name(ctx, mechanism) {
            Some(idx) => {
                self.active = Some(idx);
                self.backends[idx].process_init(ctx, mechanism, initial_response);
            }
            None => ctx.outcome = crate::sasl::state::Outcome::Auth,
        }
    }

    fn process_response(&mut self, ctx: &mut SaslContext, response: &[u8]) {
        match self.active {
            Some(idx) => self.backends[idx].process_response(ctx, response),
            None => ctx.outcome = crate::sasl::state::Outcome::Sys,
        }
    }

    fn process_challenge(&mut self, ctx: &mut SaslContext, challenge: &[u8]) {
        if let Some(idx) = self.active {
            self.backends[idx].process_challenge(ctx, challenge);
        }
    }

    fn process_mechanisms(&mut self, ctx: &mut SaslContext, mechs: &str) -> bool {
        for (idx, backend) in self.backends.iter_mut().enumerate() {
            if backend.process_mechanisms(ctx, mechs) {
                self.active = Some(idx);
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sasl::state::Role;

    #[test]
    fn plain_round_trips_a_matching_credential() {
        let response = PlainMechanism::encode_response("user", "pencil");
        let (authcid, passwd) = PlainMechanism::split_response(&response).unwrap();
        assert_eq!(authcid, b"user");
        assert_eq!(passwd, b"pencil");
    }

    #[test]
    fn plain_server_accepts_matching_credentials() {
        let mut ctx = SaslContext::new(Role::Server);
        ctx.username = Some("user".to_string());
        ctx.password = Some("pencil".to_string());
        let mut backend = PlainMechanism;
        let response = PlainMechanism::encode_response("user", "pencil");
        backend.process_init(&mut ctx, "PLAIN", &response);
        assert_eq!(ctx.outcome, crate::sasl::state::Outcome::Ok);
    }

    #[test]
    fn plain_server_rejects_wrong_password() {
        let mut ctx = SaslContext::new(Role::Server);
        ctx.username = Some("user".to_string());
        ctx.password = Some("pencil".to_string());
        let mut backend = PlainMechanism;
        let response = PlainMechanism::encode_response("user", "wrong");
        backend.process_init(&mut ctx, "PLAIN", &response);
        assert_eq!(ctx.outcome, crate::sasl::state::Outcome::Auth);
    }

    #[test]
    fn anonymous_selects_itself_from_a_mixed_list() {
        let mut ctx = SaslContext::new(Role::Client);
        let mut backend = AnonymousMechanism;
        assert!(backend.process_mechanisms(&mut ctx, "PLAIN ANONYMOUS"));
        assert_eq!(ctx.selected_mechanism.as_deref(), Some("ANONYMOUS"));
        assert_eq!(ctx.bytes_out.as_deref(), Some(&b""[..]));
    }
}
