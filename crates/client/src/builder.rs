//! Builder pattern for constructing a [`Client`].

use std::sync::Arc;

use corelink_domain::config::{AuthLevel, ClientConfig, ConfigSeverity, TimingConfig};
use uuid::Uuid;

use crate::client::{Client, Shared};
use crate::dial::{Dialer, TcpDialer};
use crate::handler::{ClientHandler, NoopHandler};
use crate::types::ClientError;

/// Fluent builder for [`Client`].
///
/// # Example
///
/// ```rust,no_run
/// # use corelink_client::{ClientBuilder, AuthLevel};
/// let client = ClientBuilder::new()
///     .name("keyboard-watcher")
///     .host("localhost")
///     .port(7185)
///     .auth(AuthLevel::Basic)
///     .build()
///     .unwrap();
/// ```
pub struct ClientBuilder {
    config: ClientConfig,
    handler: Arc<dyn ClientHandler>,
    dialer: Arc<dyn Dialer>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            handler: Arc::new(NoopHandler),
            dialer: Arc::new(TcpDialer),
        }
    }

    /// Start from a loaded config file; later setters override it.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    // ── Identity ─────────────────────────────────────────────────────

    /// Display name reported to the daemon.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Node type tag sent in the identity record (default `hidioApi`).
    pub fn node_type(mut self, t: impl Into<String>) -> Self {
        self.config.node_type = t.into();
        self
    }

    pub fn auth(mut self, level: AuthLevel) -> Self {
        self.config.auth = level;
        self
    }

    // ── Target ───────────────────────────────────────────────────────

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.daemon.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.daemon.port = port;
        self
    }

    // ── Behavior ─────────────────────────────────────────────────────

    /// Override every interval and timeout at once.
    pub fn timing(mut self, timing: TimingConfig) -> Self {
        self.config.timing = timing;
        self
    }

    pub fn handler(mut self, handler: impl ClientHandler) -> Self {
        self.handler = Arc::new(handler);
        self
    }

    /// Same as [`handler`](Self::handler) for a handler the caller keeps a
    /// reference to.
    pub fn shared_handler(mut self, handler: Arc<dyn ClientHandler>) -> Self {
        self.handler = handler;
        self
    }

    /// Replace the TCP dialer (TLS, in-memory transports, tests).
    pub fn dialer(mut self, dialer: impl Dialer) -> Self {
        self.dialer = Arc::new(dialer);
        self
    }

    /// Build the [`Client`]. Fails if the config has errors; warnings are
    /// logged.
    pub fn build(self) -> Result<Client, ClientError> {
        let mut errors = Vec::new();
        for issue in self.config.validate() {
            match issue.severity {
                ConfigSeverity::Error => errors.push(issue.to_string()),
                ConfigSeverity::Warning => tracing::warn!(%issue, "client config warning"),
            }
        }
        if !errors.is_empty() {
            return Err(ClientError::Config(errors.join("; ")));
        }

        let serial = (Uuid::new_v4().as_u128() as u64).to_string();
        Ok(Client {
            shared: Arc::new(Shared::new(self.config, serial, self.handler, self.dialer)),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
