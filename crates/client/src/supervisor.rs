//! One connection attempt: dial, bootstrap, identify, authenticate, wait,
//! tear down.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use corelink_domain::trace::TraceEvent;
use corelink_rpc::{RpcSystem, Side};
use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::auth;
use crate::bridge;
use crate::caps::{DaemonServer, DaemonSession};
use crate::client::Shared;
use crate::dial;
use crate::liveness::{self, LivenessPolicy};
use crate::logtail::{self, LogCursor, TailPolicy};
use crate::nodes;
use crate::state::{AttemptSignal, SessionState};
use crate::types::{select_current_log, ClientError, ConnectionPhase, Recovery};

/// How an attempt ended.
#[derive(Debug)]
pub(crate) enum AttemptOutcome {
    /// The client was already stopped; nothing was dialed.
    Skipped,
    /// Neither address family answered.
    NotConnected,
    /// The session broke; the retry loop dials again.
    Transient,
    /// Explicit stop (disconnect or drop).
    Stopped,
    /// Configuration or authentication failure; the client stops.
    Failed(ClientError),
}

impl AttemptOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Skipped => "skipped",
            AttemptOutcome::NotConnected => "not_connected",
            AttemptOutcome::Transient => "transient",
            AttemptOutcome::Stopped => "stopped",
            AttemptOutcome::Failed(_) => "failed",
        }
    }
}

/// Background activities of one attempt, awaited in teardown order.
#[derive(Default)]
struct Activities {
    nodes: Option<JoinHandle<()>>,
    log_tailer: Option<JoinHandle<()>>,
    liveness: Option<JoinHandle<()>>,
    bridge_reader: Option<JoinHandle<()>>,
    bridge_writer: Option<JoinHandle<()>>,
}

async fn join(name: &'static str, handle: JoinHandle<()>) {
    if let Err(e) = handle.await {
        tracing::error!(activity = name, error = %e, "activity ended abnormally");
    }
}

impl Activities {
    /// Everything but the bridge. These stop on the attempt signal.
    async fn join_session(&mut self) {
        let ordered = [
            ("node_subscription", self.nodes.take()),
            ("log_tailer", self.log_tailer.take()),
            ("liveness", self.liveness.take()),
        ];
        for (name, handle) in ordered {
            if let Some(handle) = handle {
                join(name, handle).await;
            }
        }
    }

    /// Give the writer `grace` to drain the closed engine port, then halt
    /// both pumps.
    async fn join_bridge(&mut self, halt: &CancellationToken, grace: Duration) {
        if let Some(mut writer) = self.bridge_writer.take() {
            match tokio::time::timeout(grace, &mut writer).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(activity = "bridge_writer", error = %e, "activity ended abnormally");
                }
                Err(_) => {
                    tracing::debug!("bridge writer did not drain in time");
                    halt.cancel();
                    join("bridge_writer", writer).await;
                }
            }
        }
        halt.cancel();
        if let Some(reader) = self.bridge_reader.take() {
            join("bridge_reader", reader).await;
        }
    }
}

/// Resources held by an attempt once the transport is open.
#[derive(Default)]
struct Session {
    engine: Option<RpcSystem>,
    activities: Activities,
    /// Stops the bridge pumps. Cancelled last in teardown.
    halt: CancellationToken,
    /// Cursor of the log file this attempt tails, filled by identification.
    log_cursor: Arc<Mutex<Option<LogCursor>>>,
}

/// Stops the attempt if its future is dropped before teardown ran.
struct AttemptGuard<'a> {
    shared: &'a Shared,
    signal: AttemptSignal,
    halt: CancellationToken,
    armed: bool,
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.signal.stop_permanent();
            self.halt.cancel();
            self.shared.end_attempt();
        }
    }
}

/// Spawn an activity inside the client span. A panic breaks the session
/// instead of leaving the attempt running without the activity.
fn spawn_activity<F>(
    shared: &Shared,
    name: &'static str,
    signal: &AttemptSignal,
    fut: F,
) -> JoinHandle<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let signal = signal.clone();
    let guarded = async move {
        if let Err(panic) = AssertUnwindSafe(fut).catch_unwind().await {
            tracing::error!(
                activity = name,
                panic = %panic_message(panic.as_ref()),
                "activity panicked, reconnecting"
            );
            signal.break_transient();
        }
    };
    tokio::spawn(guarded.instrument(shared.span.clone()))
}

/// Run one attempt to completion, including teardown.
pub(crate) async fn run_attempt(shared: &Arc<Shared>) -> AttemptOutcome {
    let signal = AttemptSignal::new();
    if !shared.begin_attempt(&signal) {
        return AttemptOutcome::Skipped;
    }
    let started = Instant::now();
    let mut session = Session::default();
    let mut guard = AttemptGuard {
        shared,
        signal: signal.clone(),
        halt: session.halt.clone(),
        armed: true,
    };

    let result = match AssertUnwindSafe(establish(shared, &signal, &mut session))
        .catch_unwind()
        .await
    {
        Ok(r) => r,
        Err(panic) => Err(ClientError::Panicked(panic_message(panic.as_ref()))),
    };

    let outcome = match result {
        Ok(false) => AttemptOutcome::NotConnected,
        Ok(true) => match signal.state() {
            SessionState::StoppedPermanent => AttemptOutcome::Stopped,
            _ => AttemptOutcome::Transient,
        },
        Err(e) => match e.recovery() {
            Recovery::Permanent => {
                tracing::error!(error = %e, "fatal session error, not retrying");
                shared.retry.send_replace(false);
                signal.stop_permanent();
                AttemptOutcome::Failed(e)
            }
            Recovery::Transient => {
                tracing::warn!(error = %e, "session error, reconnecting");
                signal.break_transient();
                AttemptOutcome::Transient
            }
        },
    };

    if session.engine.is_some() {
        teardown(shared, &signal, &mut session).await;
    }

    guard.armed = false;
    shared.end_attempt();

    if !matches!(outcome, AttemptOutcome::NotConnected) {
        TraceEvent::SessionEnded {
            outcome: outcome.as_str().to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
        }
        .emit();
    }
    outcome
}

/// Dial through `Connected`. Returns `Ok(false)` if no transport could be
/// opened and `Ok(true)` once the attempt has left `Running` after a
/// successful dial.
async fn establish(
    shared: &Arc<Shared>,
    signal: &AttemptSignal,
    session: &mut Session,
) -> Result<bool, ClientError> {
    let config = &shared.config;
    let timing = &config.timing;
    let host = config.daemon.host.as_str();
    let port = config.daemon.port;

    // ── Dialing ──────────────────────────────────────────────────────
    let dialed = tokio::select! {
        d = dial::dial_dual_stack(shared.dialer.as_ref(), host, port, timing.dial_timeout()) => d,
        _ = signal.stopped() => return Ok(false),
    };
    let (transport, family) = match dialed {
        Some(t) => t,
        None => {
            TraceEvent::DialFailed {
                host: host.to_string(),
                port,
            }
            .emit();
            return Ok(false);
        }
    };
    TraceEvent::TransportOpened {
        host: host.to_string(),
        port,
        family: family.to_string(),
    }
    .emit();

    // ── Bootstrapping ────────────────────────────────────────────────
    shared.set_phase(ConnectionPhase::Bootstrapping);
    let (engine, engine_port) = RpcSystem::new(Side::Client, None);
    session.engine = Some(engine.clone());

    let (net_rd, net_wr) = tokio::io::split(transport);
    let (port_rd, port_wr) = tokio::io::split(engine_port);
    session.activities.bridge_reader = Some(spawn_activity(
        shared,
        "bridge_reader",
        signal,
        bridge::pump(
            "reader",
            net_rd,
            port_wr,
            timing.read_slice(),
            signal.clone(),
            session.halt.clone(),
        ),
    ));
    session.activities.bridge_writer = Some(spawn_activity(
        shared,
        "bridge_writer",
        signal,
        bridge::pump(
            "writer",
            port_rd,
            net_wr,
            timing.read_slice(),
            signal.clone(),
            session.halt.clone(),
        ),
    ));

    let server = DaemonServer::new(engine.bootstrap(), timing.call_timeout());
    shared.live.lock().server = Some(server.clone());

    session.activities.liveness = Some(spawn_activity(
        shared,
        "liveness",
        signal,
        liveness::run(
            server.clone(),
            signal.clone(),
            LivenessPolicy {
                interval: timing.liveness_interval(),
                timeout: timing.liveness_timeout(),
                max_missed: timing.liveness_max_missed,
            },
        ),
    ));
    session.activities.log_tailer = Some(spawn_activity(
        shared,
        "log_tailer",
        signal,
        logtail::run(
            session.log_cursor.clone(),
            signal.clone(),
            TailPolicy {
                interval: timing.log_tail_interval(),
                idle: timing.log_idle_interval(),
            },
            shared.handler.clone(),
        ),
    ));

    // Abandoned as soon as the attempt leaves Running.
    let pending = handshake(shared, signal, &engine, &server, session);
    let daemon_session = tokio::select! {
        r = pending => r?,
        _ = signal.stopped() => return Ok(true),
    };

    // ── Connected ────────────────────────────────────────────────────
    if !signal.is_running() {
        return Ok(true);
    }
    shared.set_phase(ConnectionPhase::Connected);
    tracing::info!(auth = %config.auth, "connected");
    shared.handler.on_connect(server, daemon_session).await;

    while signal.pause(timing.connected_poll()).await {}
    Ok(true)
}

/// Identify the daemon, then authenticate at the configured level.
async fn handshake(
    shared: &Arc<Shared>,
    signal: &AttemptSignal,
    engine: &RpcSystem,
    server: &DaemonServer,
    session: &mut Session,
) -> Result<Option<DaemonSession>, ClientError> {
    let config = &shared.config;

    // ── Identifying ──────────────────────────────────────────────────
    shared.set_phase(ConnectionPhase::Identifying);
    let version = server.version().await?;
    let uid = server.id().await?;
    let name = server.name().await?;
    let log_files = server.log_files().await?;

    tracing::info!(
        daemon = %name,
        uid,
        version = %version.version,
        buildtime = %version.buildtime,
        serverarch = %version.serverarch,
        compilerversion = %version.compilerversion,
        "daemon identified"
    );
    TraceEvent::Identified {
        daemon_name: name.clone(),
        daemon_uid: uid,
        version: version.version.clone(),
    }
    .emit();

    let current_log = select_current_log(&log_files);
    {
        let mut live = shared.live.lock();
        live.info.version = Some(version);
        live.info.uid = Some(uid);
        live.info.name = Some(name);
        live.info.log_files = log_files;
    }

    match current_log {
        Some(path) => {
            let cursor = LogCursor::new(&path, uid);
            if let Err(e) = cursor.reset() {
                tracing::warn!(path = %cursor.offset_path().display(), error = %e, "could not reset log offset");
            }
            *shared.core_log.lock() = Some(path);
            *session.log_cursor.lock() = Some(cursor);
        }
        None => tracing::warn!("daemon reported no current log file"),
    }

    // ── Authenticating ───────────────────────────────────────────────
    if !config.auth.requires_key() {
        return Ok(None);
    }
    shared.set_phase(ConnectionPhase::Authenticating);
    let Some(authed) = auth::authenticate(server, config.auth, shared.client_info(uid)).await? else {
        return Ok(None);
    };
    tracing::debug!(level = %config.auth, "authenticated");
    {
        let mut live = shared.live.lock();
        live.session = Some(authed.session.clone());
        live.key = Some(authed.key);
    }
    session.activities.nodes = Some(spawn_activity(
        shared,
        "node_subscription",
        signal,
        nodes::run(
            engine.clone(),
            authed.session.clone(),
            signal.clone(),
            config.timing.subscription_idle(),
            shared.nodes.clone(),
            shared.handler.clone(),
        ),
    ));
    Ok(Some(authed.session))
}

/// Unwind everything `establish` started.
///
/// The session activities stop first; the node subscription releases its
/// capability on the way out. The authenticated capability is released
/// next, the queued releases are flushed through the still running bridge,
/// and only then is the engine closed and the bridge halted.
async fn teardown(shared: &Shared, signal: &AttemptSignal, session: &mut Session) {
    let grace = shared.config.timing.read_slice();
    shared.set_phase(ConnectionPhase::TearingDown);
    // Move out of Running first so no other callback fires from here on.
    signal.break_transient();
    shared.handler.on_disconnect().await;

    session.activities.join_session().await;

    let (daemon_session, server) = {
        let mut live = shared.live.lock();
        live.key = None;
        live.info.version = None;
        live.info.name = None;
        (live.session.take(), live.server.take())
    };
    shared.nodes.lock().clear();
    if let Some(s) = daemon_session {
        s.release();
    }
    drop(server);

    if let Some(engine) = session.engine.take() {
        if tokio::time::timeout(grace, engine.flush()).await.is_err() {
            tracing::debug!("pending releases not flushed in time");
        }
        engine.shutdown();
    }
    session.activities.join_bridge(&session.halt, grace).await;
    tracing::debug!(state = ?signal.state(), "session torn down");
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
