use serde::Serialize;

/// Structured session events emitted by the connection supervisor.
///
/// Events are logged inside the emitting client's span, so the client name
/// and serial are attached without any process-wide state.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    DialFailed {
        host: String,
        port: u16,
    },
    TransportOpened {
        host: String,
        port: u16,
        family: String,
    },
    Identified {
        daemon_name: String,
        daemon_uid: u64,
        version: String,
    },
    Authenticated {
        level: String,
    },
    KeyUnreadable {
        path: String,
        error: String,
    },
    AuthRejected {
        level: String,
        error: String,
    },
    LivenessMissed {
        missed: u32,
        max_missed: u32,
    },
    NodesUpdated {
        count: usize,
    },
    SessionEnded {
        outcome: String,
        duration_ms: u64,
    },
}

impl TraceEvent {
    /// Events that repeat on every retry while the daemon is away.
    pub fn is_routine(&self) -> bool {
        matches!(self, TraceEvent::DialFailed { .. })
    }

    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        if self.is_routine() {
            tracing::debug!(trace_event = %json, "corelink_event");
        } else {
            tracing::info!(trace_event = %json, "corelink_event");
        }
    }
}
