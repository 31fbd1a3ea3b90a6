//! Per-attempt session state shared by every background activity.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Lifecycle of one connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Activities keep working.
    Running,
    /// The attempt is unwinding; the retry loop will dial again.
    BreakingTransient,
    /// The attempt is unwinding and the client stops.
    StoppedPermanent,
}

/// Cloneable handle on the state of one attempt.
///
/// Transitions only move away from `Running`, and a permanent stop is never
/// downgraded to a transient break.
#[derive(Clone, Debug)]
pub struct AttemptSignal {
    tx: Arc<watch::Sender<SessionState>>,
}

impl AttemptSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionState::Running);
        Self { tx: Arc::new(tx) }
    }

    pub fn state(&self) -> SessionState {
        *self.tx.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == SessionState::Running
    }

    /// Request a reconnect. Returns `true` if this call changed the state.
    pub fn break_transient(&self) -> bool {
        self.tx.send_if_modified(|s| {
            if *s == SessionState::Running {
                *s = SessionState::BreakingTransient;
                true
            } else {
                false
            }
        })
    }

    /// Request a permanent stop. Returns `true` if this call changed the state.
    pub fn stop_permanent(&self) -> bool {
        self.tx.send_if_modified(|s| {
            if *s == SessionState::StoppedPermanent {
                false
            } else {
                *s = SessionState::StoppedPermanent;
                true
            }
        })
    }

    /// Resolves once the attempt has left `Running`.
    pub async fn stopped(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|s| *s != SessionState::Running).await;
    }

    /// Sleep for `d`, waking early if the attempt stops. Returns whether the
    /// attempt is still running afterwards.
    pub async fn pause(&self, d: Duration) -> bool {
        if !self.is_running() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(d) => {}
            _ = self.stopped() => {}
        }
        self.is_running()
    }
}

impl Default for AttemptSignal {
    fn default() -> Self {
        Self::new()
    }
}
