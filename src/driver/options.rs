//! The configuration surface exposed outward by the core, bound to a connection via
//! [`super::ConnectionDriver::configure`]/`connect`/`accept`.

use std::time::Duration;

use crate::sasl::Outcome;

use super::Handler;

/// Builder-style options bundle for configuring a connection.
///
/// Fields not set here keep whatever container-level default the host supplied; the
/// driver only ever reads these through `configure`.
#[derive(Default)]
pub struct ConnectionOptions {
    pub(super) container_id: Option<String>,
    pub(super) channel_max: Option<u16>,
    pub(super) idle_timeout: Option<Duration>,
    pub(super) handler: Option<Box<dyn Handler>>,

    pub(super) allowed_mechs: Option<String>,
    pub(super) config_name: Option<String>,
    pub(super) config_path: Option<String>,
    pub(super) user_password: Option<(String, String)>,
    pub(super) remote_hostname: Option<String>,
    pub(super) done_outcome: Option<Outcome>,
}

impl std::fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionOptions")
            .field("container_id", &self.container_id)
            .field("channel_max", &self.channel_max)
            .field("idle_timeout", &self.idle_timeout)
            .field("allowed_mechs", &self.allowed_mechs)
            .field("config_name", &self.config_name)
            .field("config_path", &self.config_path)
            .field("remote_hostname", &self.remote_hostname)
            .finish()
    }
}

impl ConnectionOptions {
    /// Starts an empty options bundle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the container ID advertised in `OPEN`.
    pub fn container_id(mut self, id: impl Into<String>) -> Self {
        self.container_id = Some(id.into());
        self
    }

    /// Sets the maximum number of concurrently open sessions.
    pub fn channel_max(mut self, max: u16) -> Self {
        self.channel_max = Some(max);
        self
    }

    /// Sets the idle timeout advertised in `OPEN`.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Installs the handler `dispatch` drains events to.
    pub fn handler(mut self, handler: impl Handler + 'static) -> Self {
        self.handler = Some(Box::new(handler));
        self
    }

    /// Sets/replaces the SASL mechanism allow-list. The exact value `"ANONYMOUS"`
    /// triggers the anonymous short-circuit; passing `None` clears the list without
    /// triggering it.
    pub fn allowed_mechs(mut self, mechs: impl Into<String>) -> Self {
        self.allowed_mechs = Some(mechs.into());
        self
    }

    /// Clears the SASL mechanism allow-list without triggering the short-circuit.
    pub fn clear_allowed_mechs(mut self) -> Self {
        self.allowed_mechs = None;
        self
    }

    /// Sets a mechanism-backend configuration name hint.
    pub fn config_name(mut self, name: impl Into<String>) -> Self {
        self.config_name = Some(name.into());
        self
    }

    /// Sets a mechanism-backend configuration search path, overriding
    /// `PN_SASL_CONFIG_PATH`.
    pub fn config_path(mut self, dir: impl Into<String>) -> Self {
        self.config_path = Some(dir.into());
        self
    }

    /// Sets client credentials for mechanisms that need them (e.g. `PLAIN`).
    pub fn user_password(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user_password = Some((user.into(), password.into()));
        self
    }

    /// Sets the SNI-like target hostname sent in `SASL_INIT`.
    pub fn remote_hostname(mut self, fqdn: impl Into<String>) -> Self {
        self.remote_hostname = Some(fqdn.into());
        self
    }

    /// Server-side: sets the outcome the SASL layer will post once negotiation
    /// reaches a terminal state.
    pub fn done(mut self, outcome: Outcome) -> Self {
        self.done_outcome = Some(outcome);
        self
    }
}
