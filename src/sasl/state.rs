//! SASL negotiation states and the roles that may occupy them.

/// The role a [`SaslContext`](super::SaslContext) plays in a negotiation.
///
/// Immutable once the context is created; `last_state`/`desired_state` are only ever
/// allowed to take values legal for this role (see [`SaslState::is_legal_for`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The connection initiator, offering credentials.
    Client,
    /// The connection acceptor, validating credentials.
    Server,
}

/// A state in the SASL negotiation state machine.
///
/// Ordered so that `last_state <= desired_state` and the prerequisite checks in
/// [`super::drain`] can be expressed as plain comparisons. The ordering matches the
/// reference implementation's internal enum, not the order states are introduced in
/// prose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SaslState {
    /// No SASL frame has been posted or received yet.
    None,
    /// Client has posted `SASL_INIT`.
    PostedInit,
    /// Server has posted `SASL_MECHANISMS`.
    PostedMechanisms,
    /// Client has posted `SASL_RESPONSE`.
    PostedResponse,
    /// Server has posted `SASL_CHALLENGE`.
    PostedChallenge,
    /// Server has posted `SASL_OUTCOME`.
    PostedOutcome,
    /// Client has received `SASL_OUTCOME`.
    RecvedOutcome,
    /// Client has synthesized an outcome without a real frame exchange (ANONYMOUS
    /// short-circuit).
    PretendOutcome,
}

impl SaslState {
    /// Whether this state may be occupied by a context playing `role`.
    pub fn is_legal_for(self, role: Role) -> bool {
        match role {
            Role::Server => matches!(
                self,
                SaslState::None
                    | SaslState::PostedMechanisms
                    | SaslState::PostedChallenge
                    | SaslState::PostedOutcome
            ),
            Role::Client => matches!(
                self,
                SaslState::None
                    | SaslState::PostedInit
                    | SaslState::PostedResponse
                    | SaslState::PretendOutcome
                    | SaslState::RecvedOutcome
            ),
        }
    }
}

/// The terminal result of a SASL negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Outcome {
    /// Negotiation has not yet reached a terminal outcome.
    #[default]
    None,
    /// Negotiation succeeded.
    Ok,
    /// Authentication failed.
    Auth,
    /// A system error prevented negotiation from completing.
    Sys,
    /// The peer's credentials were permanently rejected.
    Perm,
    /// A transient error occurred; the client may retry.
    Temp,
}

impl From<fe2o3_amqp_types::sasl::SaslCode> for Outcome {
    fn from(code: fe2o3_amqp_types::sasl::SaslCode) -> Self {
        use fe2o3_amqp_types::sasl::SaslCode;
        match code {
            SaslCode::Ok => Outcome::Ok,
            SaslCode::Auth => Outcome::Auth,
            SaslCode::Sys => Outcome::Sys,
            SaslCode::SysPerm => Outcome::Perm,
            SaslCode::SysTemp => Outcome::Temp,
        }
    }
}

impl From<Outcome> for fe2o3_amqp_types::sasl::SaslCode {
    fn from(outcome: Outcome) -> Self {
        use fe2o3_amqp_types::sasl::SaslCode;
        match outcome {
            Outcome::Ok => SaslCode::Ok,
            Outcome::Auth => SaslCode::Auth,
            Outcome::Sys => SaslCode::Sys,
            Outcome::Perm => SaslCode::SysPerm,
            Outcome::Temp => SaslCode::SysTemp,
            Outcome::None => SaslCode::Sys,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_supports_prerequisite_checks() {
        assert!(SaslState::PostedChallenge >= SaslState::PostedMechanisms);
        assert!(SaslState::PostedOutcome >= SaslState::PostedMechanisms);
        assert!(SaslState::PretendOutcome >= SaslState::PostedInit);
    }

    #[test]
    fn roles_are_disjoint_except_none() {
        for state in [
            SaslState::PostedInit,
            SaslState::PostedResponse,
            SaslState::PretendOutcome,
            SaslState::RecvedOutcome,
        ] {
            assert!(state.is_legal_for(Role::Client));
            assert!(!state.is_legal_for(Role::Server));
        }
        for state in [
            SaslState::PostedMechanisms,
            SaslState::PostedChallenge,
            SaslState::PostedOutcome,
        ] {
            assert!(state.is_legal_for(Role::Server));
            assert!(!state.is_legal_for(Role::Client));
        }
        assert!(SaslState::None.is_legal_for(Role::Client));
        assert!(SaslState::None.is_legal_for(Role::Server));
    }
}
