//! The public client: retry loop, disconnect and session accessors.

use std::path::PathBuf;
use std::sync::Arc;

use corelink_domain::config::ClientConfig;
use corelink_protocol::{ClientInfo, NodeList, VersionInfo};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::Instrument;

use crate::auth::{self, AuthKey};
use crate::caps::{AuthPromise, DaemonServer, DaemonSession};
use crate::dial::Dialer;
use crate::handler::ClientHandler;
use crate::state::AttemptSignal;
use crate::supervisor::{self, AttemptOutcome};
use crate::types::{ClientError, ConnectionPhase, SessionInfo};

/// A resilient connection to the daemon.
///
/// Create via [`ClientBuilder`](crate::builder::ClientBuilder), then drive
/// it with [`connect`](Self::connect). Share it behind an `Arc` to call
/// [`disconnect`](Self::disconnect) from another task.
pub struct Client {
    pub(crate) shared: Arc<Shared>,
}

/// State shared between the façade and the supervisor.
pub(crate) struct Shared {
    pub config: ClientConfig,
    pub serial: String,
    pub handler: Arc<dyn ClientHandler>,
    pub dialer: Arc<dyn Dialer>,
    pub span: tracing::Span,
    /// Cleared only on permanent stop.
    pub retry: watch::Sender<bool>,
    pub phase: watch::Sender<ConnectionPhase>,
    /// Signal of the attempt in flight, if any.
    pub current: Mutex<Option<AttemptSignal>>,
    pub live: Mutex<LiveSession>,
    pub nodes: Arc<Mutex<NodeList>>,
    /// Survives disconnects: the last known current log file.
    pub core_log: Mutex<Option<PathBuf>>,
}

/// Fields valid only while an attempt holds a transport.
#[derive(Debug, Default)]
pub(crate) struct LiveSession {
    pub server: Option<DaemonServer>,
    pub session: Option<DaemonSession>,
    pub key: Option<AuthKey>,
    pub info: SessionInfo,
}

impl Shared {
    pub(crate) fn new(
        config: ClientConfig,
        serial: String,
        handler: Arc<dyn ClientHandler>,
        dialer: Arc<dyn Dialer>,
    ) -> Self {
        let span = tracing::info_span!("corelink_client", name = %config.name, serial = %serial);
        let (retry, _) = watch::channel(true);
        let (phase, _) = watch::channel(ConnectionPhase::Idle);
        Self {
            config,
            serial,
            handler,
            dialer,
            span,
            retry,
            phase,
            current: Mutex::new(None),
            live: Mutex::new(LiveSession::default()),
            nodes: Arc::new(Mutex::new(Vec::new())),
            core_log: Mutex::new(None),
        }
    }

    pub(crate) fn retry_connection(&self) -> bool {
        *self.retry.borrow()
    }

    pub(crate) fn set_phase(&self, phase: ConnectionPhase) {
        self.phase.send_replace(phase);
    }

    /// Register a new attempt, unless the client was told to stop.
    pub(crate) fn begin_attempt(&self, signal: &AttemptSignal) -> bool {
        let mut current = self.current.lock();
        if !self.retry_connection() {
            return false;
        }
        *current = Some(signal.clone());
        self.set_phase(ConnectionPhase::Dialing);
        true
    }

    /// Forget the attempt in flight. A `Stopped` phase is left alone.
    pub(crate) fn end_attempt(&self) {
        let mut current = self.current.lock();
        *current = None;
        self.phase.send_if_modified(|p| {
            if *p == ConnectionPhase::Stopped {
                false
            } else {
                *p = ConnectionPhase::Idle;
                true
            }
        });
    }

    /// Stop retrying and unwind the attempt in flight.
    pub(crate) fn stop(&self) {
        let current = {
            let current = self.current.lock();
            self.retry.send_replace(false);
            current.clone()
        };
        if let Some(signal) = current {
            signal.stop_permanent();
        }
    }

    pub(crate) fn client_info(&self, id: u64) -> ClientInfo {
        ClientInfo {
            node_type: self.config.node_type.clone(),
            name: self.config.name.clone(),
            serial: self.serial.clone(),
            id,
        }
    }
}

/// Marks the client stopped when the retry loop exits, including when the
/// `connect` future is dropped.
struct LoopGuard<'a>(&'a Shared);

impl Drop for LoopGuard<'_> {
    fn drop(&mut self) {
        self.0.stop();
        self.0.set_phase(ConnectionPhase::Stopped);
    }
}

impl Client {
    /// Start a new builder.
    pub fn builder() -> crate::builder::ClientBuilder {
        crate::builder::ClientBuilder::new()
    }

    /// Run the retry loop until the client stops.
    ///
    /// Every attempt is followed by a `retry_delay` pause, cut short by
    /// [`disconnect`](Self::disconnect). Returns `Ok(())` after an explicit
    /// stop and the permanent error otherwise (unreadable key, rejected
    /// authentication). Transient failures never surface here.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let shared = &self.shared;
        shared.retry.send_replace(true);
        let _guard = LoopGuard(shared);

        let retry_loop = async {
            tracing::info!(
                host = %shared.config.daemon.host,
                port = shared.config.daemon.port,
                auth = %shared.config.auth,
                "connecting"
            );
            let mut fatal = None;
            while shared.retry_connection() {
                if let AttemptOutcome::Failed(e) = supervisor::run_attempt(shared).await {
                    fatal = Some(e);
                }
                if !shared.retry_connection() {
                    break;
                }

                tracing::debug!(
                    delay_ms = shared.config.timing.retry_delay_ms,
                    "retrying connection"
                );
                let mut retry = shared.retry.subscribe();
                tokio::select! {
                    _ = tokio::time::sleep(shared.config.timing.retry_delay()) => {}
                    _ = retry.wait_for(|r| !*r) => {}
                }
            }
            tracing::info!("client stopped");
            fatal
        };

        match retry_loop.instrument(shared.span.clone()).await {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Stop the client and wait until the current attempt, if any, has torn
    /// down. Safe to call at any time, any number of times.
    pub async fn disconnect(&self) {
        let shared = &self.shared;
        shared.span.in_scope(|| {
            tracing::info!(
                host = %shared.config.daemon.host,
                port = shared.config.daemon.port,
                "disconnecting"
            )
        });

        shared.stop();
        let mut phase = shared.phase.subscribe();
        let _ = phase.wait_for(|p| p.is_quiescent()).await;
    }

    /// Drop the current session and dial again. No-op when not connected.
    pub fn reconnect(&self) {
        if let Some(signal) = self.shared.current.lock().as_ref() {
            signal.break_transient();
        }
    }

    // ── Status ───────────────────────────────────────────────────────

    /// Whether the client still intends to (re)connect.
    pub fn retry_connection_status(&self) -> bool {
        self.shared.retry_connection()
    }

    pub fn phase(&self) -> ConnectionPhase {
        *self.shared.phase.borrow()
    }

    /// Subscribe to phase transitions.
    pub fn watch_phase(&self) -> watch::Receiver<ConnectionPhase> {
        self.shared.phase.subscribe()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Random per-client serial sent with authentication requests.
    pub fn serial(&self) -> &str {
        &self.shared.serial
    }

    // ── Capabilities ─────────────────────────────────────────────────

    pub fn capability_server(&self) -> Option<DaemonServer> {
        self.shared.live.lock().server.clone()
    }

    pub fn session_capability(&self) -> Option<DaemonSession> {
        self.shared.live.lock().session.clone()
    }

    /// Send a fresh authentication request with the key read for this
    /// session. Calls on [`AuthPromise::port`] are pipelined onto it.
    pub fn auth_promise(&self) -> Result<AuthPromise, ClientError> {
        let live = self.shared.live.lock();
        let (server, key, uid) = match (&live.server, &live.key, live.info.uid) {
            (Some(s), Some(k), Some(uid)) => (s, k, uid),
            _ => return Err(ClientError::NotAuthenticated),
        };
        let info = self.shared.client_info(uid);
        auth::request(server, self.shared.config.auth, key, info)?
            .ok_or(ClientError::NotAuthenticated)
    }

    // ── Session info ─────────────────────────────────────────────────

    pub fn version(&self) -> Option<VersionInfo> {
        self.shared.live.lock().info.version.clone()
    }

    /// Daemon name.
    pub fn name(&self) -> Option<String> {
        self.shared.live.lock().info.name.clone()
    }

    /// Numeric id the daemon assigned to this connection.
    pub fn uid(&self) -> Option<u64> {
        self.shared.live.lock().info.uid
    }

    pub fn log_files(&self) -> Vec<String> {
        self.shared.live.lock().info.log_files.clone()
    }

    /// Current log file being tailed. Kept across disconnects.
    pub fn core_log_file(&self) -> Option<PathBuf> {
        self.shared.core_log.lock().clone()
    }

    /// Last node list pushed by the daemon. Empty while disconnected.
    pub fn nodes(&self) -> NodeList {
        self.shared.nodes.lock().clone()
    }

    /// Ask the daemon for its node list right now.
    pub async fn fetch_nodes(&self) -> Result<NodeList, ClientError> {
        let session = self
            .session_capability()
            .ok_or(ClientError::NotAuthenticated)?;
        Ok(session.nodes().await?)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.shared.stop();
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("name", &self.shared.config.name)
            .field("serial", &self.shared.serial)
            .field("phase", &self.phase())
            .finish()
    }
}
