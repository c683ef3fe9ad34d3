//! The SASL negotiation state machine.
//!
//! Ported from `pni_sasl_set_desired_state`/`pni_post_sasl_frame` in the reference
//! transport implementation: a context tracks `last_state`/`desired_state`, a single
//! mutator enforces role legality and the repeat-CHALLENGE/repeat-RESPONSE rewind
//! rules, and a drain loop walks `last_state` forward to `desired_state` one frame at
//! a time, bumping the target when a prerequisite state hasn't been reached yet.

pub mod state;

use fe2o3_amqp_types::{
    primitives::{Binary, Symbol},
    sasl::{SaslChallenge, SaslInit, SaslMechanisms, SaslOutcome, SaslResponse},
};
use tracing::{trace, warn};

use crate::{
    event::Event,
    frames::sasl::Frame,
    mechanism::MechanismBackend,
};

pub use state::{Outcome, Role, SaslState};

/// Upper bound on the number of mechanisms advertised in one `SASL_MECHANISMS` frame,
/// matching the reference implementation's fixed-size `mechs[16]` array.
const MAX_ADVERTISED_MECHANISMS: usize = 16;

/// Per-connection SASL negotiation state.
pub struct SaslContext {
    role: Role,
    last_state: SaslState,
    desired_state: SaslState,

    /// The mechanism this side has selected (client) or been told by the peer
    /// (server).
    pub selected_mechanism: Option<String>,
    /// Whitespace-separated allow-list filtering which mechanisms are ever offered or
    /// accepted. The literal value `"ANONYMOUS"` triggers the short-circuit in
    /// [`SaslContext::try_anonymous_short_circuit`].
    pub included_mechanisms: Option<String>,
    /// Client credential: username.
    pub username: Option<String>,
    /// Client credential: password.
    pub password: Option<String>,
    /// Client-supplied SNI-like target hostname, sent in `SASL_INIT`.
    pub remote_fqdn: Option<String>,
    /// Mechanism-backend configuration hint.
    pub config_name: Option<String>,
    /// Mechanism-backend configuration search path. Defaults to `PN_SASL_CONFIG_PATH`
    /// if set in the environment and not overridden explicitly.
    pub config_dir: Option<String>,
    /// Identity established by an external security layer (e.g. TLS client cert CN).
    pub external_auth: Option<String>,
    /// Security strength factor reported by an external security layer.
    pub external_ssf: u32,
    /// The terminal negotiation result.
    pub outcome: Outcome,
    /// Owned payload the backend wants written into the next outgoing frame. Taken
    /// (via [`Option::take`]) by the drain loop when it posts that frame.
    pub bytes_out: Option<Vec<u8>>,

    input_bypass: bool,
    output_bypass: bool,

    backend: Box<dyn MechanismBackend>,
    pending_events: Vec<Event>,
}

impl std::fmt::Debug for SaslContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaslContext")
            .field("role", &self.role)
            .field("last_state", &self.last_state)
            .field("desired_state", &self.desired_state)
            .field("selected_mechanism", &self.selected_mechanism)
            .field("outcome", &self.outcome)
            .field("input_bypass", &self.input_bypass)
            .field("output_bypass", &self.output_bypass)
            .finish()
    }
}

impl SaslContext {
    /// Creates a fresh context for `role`, with [`crate::mechanism::AnonymousMechanism`]
    /// as a placeholder backend. Replace it with [`SaslContext::set_backend`] before
    /// negotiation begins if a different mechanism is required.
    pub fn new(role: Role) -> Self {
        Self::with_backend(role, Box::new(crate::mechanism::AnonymousMechanism))
    }

    /// Creates a fresh context for `role` using the given mechanism backend.
    ///
    /// Reads `PN_SASL_CONFIG_PATH` once at creation time, matching the reference
    /// implementation's capture of the environment at first SASL context creation.
    pub fn with_backend(role: Role, backend: Box<dyn MechanismBackend>) -> Self {
        Self {
            role,
            last_state: SaslState::None,
            desired_state: SaslState::None,
            selected_mechanism: None,
            included_mechanisms: None,
            username: None,
            password: None,
            remote_fqdn: None,
            config_name: None,
            config_dir: std::env::var("PN_SASL_CONFIG_PATH").ok(),
            external_auth: None,
            external_ssf: 0,
            outcome: Outcome::None,
            bytes_out: None,
            input_bypass: false,
            output_bypass: false,
            backend,
            pending_events: Vec::new(),
        }
    }

    /// This context's immutable role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// The most recent state actually reached (a posted or received frame).
    pub fn last_state(&self) -> SaslState {
        self.last_state
    }

    /// The state [`SaslContext::drain`] is working towards.
    pub fn desired_state(&self) -> SaslState {
        self.desired_state
    }

    /// Read-only inspector named in the outward configuration surface: the username
    /// presented by the client, once negotiated.
    pub fn get_user(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Read-only inspector named in the outward configuration surface: the mechanism
    /// this negotiation selected, once either side has chosen one.
    pub fn get_mech(&self) -> Option<&str> {
        self.selected_mechanism.as_deref()
    }

    /// Read-only inspector named in the outward configuration surface: the terminal
    /// negotiation result.
    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    /// Replaces the mechanism backend wholesale, e.g. with a
    /// [`crate::mechanism::CompositeBackend`] offering several mechanisms.
    pub fn set_backend(&mut self, backend: Box<dyn MechanismBackend>) {
        self.backend = backend;
    }

    /// Drains events queued by state transitions since the last call.
    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.pending_events)
    }

    /// True once both bypass flags are set and the SASL layer should hand off to
    /// passthru.
    pub fn is_bypassed(&self) -> bool {
        self.input_bypass && self.output_bypass
    }

    /// Marks the input direction as exhausted (the SASL input layer returned EOS).
    pub fn set_input_bypass(&mut self) {
        self.input_bypass = true;
    }

    /// Marks the output direction as exhausted (the SASL output layer returned EOS).
    pub fn set_output_bypass(&mut self) {
        self.output_bypass = true;
    }

    /// `last_state = RecvedOutcome` or `desired_state = PostedOutcome`.
    pub fn is_terminal_input_state(&self) -> bool {
        self.last_state == SaslState::RecvedOutcome || self.desired_state == SaslState::PostedOutcome
    }

    /// `last_state` is one of the three terminal-output states.
    pub fn is_terminal_output_state(&self) -> bool {
        matches!(
            self.last_state,
            SaslState::PretendOutcome | SaslState::RecvedOutcome | SaslState::PostedOutcome
        )
    }

    /// The only mutator of `desired_state`. Rejects (logs, no-ops) a downgrade or a
    /// role violation; applies the repeat-CHALLENGE/repeat-RESPONSE rewind; emits a
    /// transport event only when the request is actually applied — a deliberate
    /// deviation from the reference implementation, which emits unconditionally (see
    /// DESIGN.md).
    pub fn set_desired_state(&mut self, desired: SaslState) {
        if desired < self.last_state {
            warn!(
                ?desired,
                last_state = ?self.last_state,
                "rejected SASL desired-state downgrade"
            );
            return;
        }
        if !desired.is_legal_for(self.role) {
            warn!(?desired, role = ?self.role, "rejected SASL state role violation");
            return;
        }

        if self.last_state == desired && desired == SaslState::PostedResponse {
            self.last_state = SaslState::PostedInit;
        }
        if self.last_state == desired && desired == SaslState::PostedChallenge {
            self.last_state = SaslState::PostedMechanisms;
        }

        self.desired_state = desired;
        self.pending_events.push(Event::transport());
    }

    /// Walks `last_state` forward to `desired_state`, one transition at a time,
    /// returning the frames that should be posted to the peer in order.
    pub fn drain(&mut self) -> Vec<Frame> {
        let mut out = Vec::new();
        while self.desired_state > self.last_state {
            let target = self.desired_state;
            match target {
                SaslState::None => break,
                SaslState::PostedInit => {
                    let mechanism = self.selected_mechanism.clone().unwrap_or_default();
                    let initial_response = self.bytes_out.take().map(Binary::from);
                    out.push(Frame::Init(SaslInit {
                        mechanism: Symbol::from(mechanism),
                        initial_response,
                        hostname: self.remote_fqdn.clone(),
                    }));
                }
                SaslState::PostedMechanisms => {
                    let symbols = self.advertised_mechanisms();
                    out.push(Frame::Mechanisms(SaslMechanisms {
                        sasl_server_mechanisms: symbols,
                    }));
                }
                SaslState::PostedResponse => {
                    let response = self.bytes_out.take().unwrap_or_default();
                    out.push(Frame::Response(SaslResponse {
                        response: Binary::from(response),
                    }));
                }
                SaslState::PostedChallenge => {
                    if self.last_state < SaslState::PostedMechanisms {
                        self.desired_state = SaslState::PostedMechanisms;
                        continue;
                    }
                    let challenge = self.bytes_out.take().unwrap_or_default();
                    out.push(Frame::Challenge(SaslChallenge {
                        challenge: Binary::from(challenge),
                    }));
                }
                SaslState::PostedOutcome => {
                    if self.last_state < SaslState::PostedMechanisms {
                        self.desired_state = SaslState::PostedMechanisms;
                        continue;
                    }
                    out.push(Frame::Outcome(SaslOutcome {
                        code: self.outcome.into(),
                        additional_data: None,
                    }));
                }
                SaslState::PretendOutcome => {
                    if self.last_state < SaslState::PostedInit {
                        self.desired_state = SaslState::PostedInit;
                        continue;
                    }
                }
                SaslState::RecvedOutcome => {
                    if self.last_state < SaslState::PostedInit && self.outcome == Outcome::Ok {
                        self.desired_state = SaslState::PostedInit;
                        continue;
                    }
                }
            }
            trace!(?target, "SASL state advanced");
            self.last_state = target;
        }
        out
    }

    /// Tokenizes the backend's advertisement list, filters through
    /// `included_mechanisms` (case-insensitive), and bounds the result to
    /// [`MAX_ADVERTISED_MECHANISMS`] entries.
    fn advertised_mechanisms(&self) -> Vec<Symbol> {
        let advertised = self.backend.list_mechs(self);
        split_and_filter_mechanisms(&advertised, self.included_mechanisms.as_deref())
            .into_iter()
            .take(MAX_ADVERTISED_MECHANISMS)
            .map(Symbol::from)
            .collect()
    }

    /// Runs `f` with the backend and `self` as separate arguments.
    ///
    /// `MechanismBackend`'s `process_*` methods take `ctx: &mut SaslContext` alongside
    /// `&mut self`, but the backend *is* a field of the context calling them — `self`
    /// can't be reborrowed mutably while `self.backend` is already borrowed to make the
    /// call. The backend is swapped out for a throwaway placeholder for the duration of
    /// `f` and swapped back immediately after, so `f` sees two genuinely disjoint
    /// mutable borrows instead.
    fn call_backend<R>(&mut self, f: impl FnOnce(&mut dyn MechanismBackend, &mut SaslContext) -> R) -> R {
        let mut backend = std::mem::replace(
            &mut self.backend,
            Box::new(crate::mechanism::AnonymousMechanism),
        );
        let result = f(backend.as_mut(), self);
        self.backend = backend;
        result
    }

    /// Server: initializes the backend and requests `PostedMechanisms` — the step that
    /// starts a server-role negotiation, since a server has no received frame to react
    /// to before it must advertise. Does nothing if the backend isn't ready.
    pub fn begin_server_advertise(&mut self) {
        let ready = self.call_backend(|backend, ctx| backend.init_server(ctx));
        if ready {
            self.set_desired_state(SaslState::PostedMechanisms);
        }
    }

    /// Server: handle a received `SASL_INIT`.
    ///
    /// If the backend reached a decision immediately (the common case for `PLAIN` and
    /// `ANONYMOUS`, which never issue a challenge), posts the outcome right away.
    /// A backend that leaves `outcome` at [`Outcome::None`] is taken to mean it wants
    /// to issue a `SASL_CHALLENGE` first; the caller is responsible for posting that
    /// separately via [`SaslContext::set_desired_state`].
    pub fn on_init(&mut self, init: SaslInit) {
        let mechanism = init.mechanism.into_inner();
        self.selected_mechanism = Some(mechanism.clone());
        let response = init
            .initial_response
            .map(|b| b.into_vec())
            .unwrap_or_default();
        self.call_backend(|backend, ctx| backend.process_init(ctx, &mechanism, &response));
        if self.outcome != Outcome::None {
            self.set_desired_state(SaslState::PostedOutcome);
        }
    }

    /// Client: handle a received `SASL_MECHANISMS`.
    pub fn on_mechanisms(&mut self, mechanisms: SaslMechanisms) {
        if self.last_state == SaslState::PretendOutcome {
            return;
        }

        let advertised = mechanisms
            .sasl_server_mechanisms
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let filtered = split_and_filter_mechanisms(&advertised, self.included_mechanisms.as_deref())
            .join(" ");

        let negotiated = self.call_backend(|backend, ctx| {
            backend.init_client(ctx) && backend.process_mechanisms(ctx, &filtered)
        });
        if negotiated {
            self.set_desired_state(SaslState::PostedInit);
        } else {
            self.outcome = Outcome::Perm;
            self.set_desired_state(SaslState::RecvedOutcome);
        }
    }

    /// Client: handle a received `SASL_CHALLENGE`.
    pub fn on_challenge(&mut self, challenge: SaslChallenge) {
        let bytes = challenge.challenge.into_vec();
        self.call_backend(|backend, ctx| backend.process_challenge(ctx, &bytes));
        self.set_desired_state(SaslState::PostedResponse);
    }

    /// Server: handle a received `SASL_RESPONSE`. Posts the outcome once the backend
    /// has reached a decision, same as [`SaslContext::on_init`].
    pub fn on_response(&mut self, response: SaslResponse) {
        let bytes = response.response.into_vec();
        self.call_backend(|backend, ctx| backend.process_response(ctx, &bytes));
        if self.outcome != Outcome::None {
            self.set_desired_state(SaslState::PostedOutcome);
        }
    }

    /// Client: handle a received `SASL_OUTCOME`.
    ///
    /// `RecvedOutcome` never posts a frame of its own (see [`SaslContext::drain`]), so
    /// unlike the other received-frame handlers this advances `last_state` directly
    /// rather than waiting for a drain pass to catch up to `desired_state` — the same
    /// fast-forward [`SaslContext::try_anonymous_short_circuit`] uses for
    /// `PretendOutcome`. Without it, [`SaslContext::is_terminal_input_state`] would
    /// never observe the terminal state on the client side.
    pub fn on_outcome(&mut self, outcome: SaslOutcome) -> bool {
        self.outcome = outcome.code.into();
        let authenticated = self.outcome == Outcome::Ok;
        self.set_desired_state(SaslState::RecvedOutcome);
        self.last_state = SaslState::RecvedOutcome;
        authenticated
    }

    /// Client-only: if `included_mechanisms` is exactly `"ANONYMOUS"`, synthesizes the
    /// virtual `MECHANISMS{ANONYMOUS}` receipt and drives the short-circuit path,
    /// saving a round trip with servers that allow anonymous auth. Returns whether the
    /// short-circuit was taken.
    ///
    /// The success path fast-forwards straight to `PRETEND_OUTCOME` without posting a
    /// real `SASL_INIT` frame: `last_state` is advanced internally so
    /// [`SaslContext::drain`] finds its `PostedInit` prerequisite already satisfied.
    pub fn try_anonymous_short_circuit(&mut self) -> bool {
        if self.role != Role::Client {
            return false;
        }
        match self.included_mechanisms.as_deref() {
            Some("ANONYMOUS") => {
                let negotiated =
                    self.call_backend(|backend, ctx| backend.process_mechanisms(ctx, "ANONYMOUS"));
                if negotiated {
                    self.last_state = SaslState::PostedInit;
                    self.set_desired_state(SaslState::PretendOutcome);
                } else {
                    self.outcome = Outcome::Perm;
                    self.set_desired_state(SaslState::RecvedOutcome);
                }
                true
            }
            _ => false,
        }
    }
}

/// Tokenizes `advertised` on whitespace and keeps only the tokens present (case
/// insensitively) in `allow_list`. `allow_list = None` keeps everything.
fn split_and_filter_mechanisms(advertised: &str, allow_list: Option<&str>) -> Vec<String> {
    let allowed: Option<Vec<&str>> = allow_list.map(|l| l.split_whitespace().collect());
    advertised
        .split_whitespace()
        .filter(|m| match &allowed {
            Some(list) => list.iter().any(|a| a.eq_ignore_ascii_case(m)),
            None => true,
        })
        .map(|m| m.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mechanism::PlainMechanism;

    #[test]
    fn downgrade_is_rejected() {
        let mut ctx = SaslContext::new(Role::Client);
        ctx.set_desired_state(SaslState::PostedResponse);
        ctx.drain();
        assert_eq!(ctx.last_state(), SaslState::PostedResponse);
        ctx.set_desired_state(SaslState::PostedInit);
        assert_eq!(ctx.desired_state(), SaslState::PostedResponse);
    }

    #[test]
    fn role_violation_is_rejected() {
        let mut ctx = SaslContext::new(Role::Client);
        ctx.set_desired_state(SaslState::PostedMechanisms);
        assert_eq!(ctx.desired_state(), SaslState::None);
    }

    #[test]
    fn repeated_response_rewinds_to_posted_init() {
        let mut ctx = SaslContext::new(Role::Client);
        ctx.selected_mechanism = Some("ANONYMOUS".to_string());
        ctx.set_desired_state(SaslState::PostedInit);
        assert_eq!(ctx.drain().len(), 1);

        ctx.set_desired_state(SaslState::PostedResponse);
        assert_eq!(ctx.drain().len(), 1);
        assert_eq!(ctx.last_state(), SaslState::PostedResponse);

        // second RESPONSE: last_state==desired_state==PostedResponse triggers rewind
        ctx.set_desired_state(SaslState::PostedResponse);
        assert_eq!(ctx.last_state(), SaslState::PostedInit);
        assert_eq!(ctx.drain().len(), 1);
        assert_eq!(ctx.last_state(), SaslState::PostedResponse);
    }

    #[test]
    fn posted_challenge_bumps_to_mechanisms_first() {
        let mut ctx = SaslContext::new(Role::Server);
        ctx.set_backend(Box::new(PlainMechanism));
        ctx.set_desired_state(SaslState::PostedChallenge);
        let frames = ctx.drain();
        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[0], Frame::Mechanisms(_)));
        assert!(matches!(frames[1], Frame::Challenge(_)));
        assert_eq!(ctx.last_state(), SaslState::PostedChallenge);
    }

    #[test]
    fn anonymous_short_circuit_reaches_pretend_outcome() {
        let mut ctx = SaslContext::new(Role::Client);
        ctx.set_backend(Box::new(crate::mechanism::AnonymousMechanism));
        ctx.included_mechanisms = Some("ANONYMOUS".to_string());
        assert!(ctx.try_anonymous_short_circuit());
        assert_eq!(ctx.desired_state(), SaslState::PretendOutcome);
        assert!(ctx.drain().is_empty());
        assert_eq!(ctx.last_state(), SaslState::PretendOutcome);
        assert!(ctx.is_terminal_output_state());
    }

    #[test]
    fn mechanism_filter_trims_trailing_separator() {
        let filtered = split_and_filter_mechanisms(
            "GSSAPI PLAIN ANONYMOUS",
            Some("PLAIN ANONYMOUS"),
        )
        .join(" ");
        assert_eq!(filtered, "PLAIN ANONYMOUS");
    }
}
