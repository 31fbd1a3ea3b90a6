//! Periodic no-op round trip that catches half-open transports.

use std::time::Duration;

use corelink_domain::trace::TraceEvent;

use crate::caps::DaemonServer;
use crate::state::AttemptSignal;

#[derive(Debug, Clone, Copy)]
pub(crate) struct LivenessPolicy {
    pub interval: Duration,
    pub timeout: Duration,
    pub max_missed: u32,
}

/// Probe `alive()` until the attempt stops. After `max_missed` consecutive
/// misses the attempt is moved to `BreakingTransient`.
pub(crate) async fn run(server: DaemonServer, signal: AttemptSignal, policy: LivenessPolicy) {
    let mut missed: u32 = 0;
    while signal.is_running() {
        let outcome = tokio::select! {
            r = server.alive(policy.timeout) => r,
            _ = signal.stopped() => break,
        };

        match outcome {
            Ok(true) => missed = 0,
            Ok(false) => {
                missed += 1;
                tracing::warn!(missed, "daemon reported not alive");
            }
            Err(e) => {
                missed += 1;
                tracing::warn!(missed, error = %e, "liveness check failed");
            }
        }

        if missed >= policy.max_missed {
            TraceEvent::LivenessMissed {
                missed,
                max_missed: policy.max_missed,
            }
            .emit();
            tracing::error!("daemon stopped answering, reconnecting");
            signal.break_transient();
            break;
        }

        if !signal.pause(policy.interval).await {
            break;
        }
    }
    tracing::trace!("liveness watcher exited");
}
