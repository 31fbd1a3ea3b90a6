use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Supervisor timing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Every suspension point of the supervisor and its activities is bounded
/// by one of these values, so a stop request is observed within one
/// interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Dial timeout, applied separately to each address family.
    #[serde(default = "d_1000")]
    pub dial_timeout_ms: u64,
    /// Bounded read slice used by the transport bridge.
    #[serde(default = "d_5000")]
    pub read_slice_ms: u64,
    #[serde(default = "d_2000")]
    pub liveness_interval_ms: u64,
    #[serde(default = "d_1000")]
    pub liveness_timeout_ms: u64,
    /// Consecutive missed probes before the session is declared broken.
    #[serde(default = "d_1")]
    pub liveness_max_missed: u32,
    #[serde(default = "d_500")]
    pub log_tail_interval_ms: u64,
    /// Poll interval while no daemon log file is known yet.
    #[serde(default = "d_1000")]
    pub log_idle_interval_ms: u64,
    #[serde(default = "d_1000")]
    pub subscription_idle_ms: u64,
    #[serde(default = "d_1000")]
    pub connected_poll_ms: u64,
    /// Bound on each handshake and authentication call.
    #[serde(default = "d_5000")]
    pub call_timeout_ms: u64,
    /// Fixed sleep between connection attempts.
    #[serde(default = "d_1000")]
    pub retry_delay_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            dial_timeout_ms: 1000,
            read_slice_ms: 5000,
            liveness_interval_ms: 2000,
            liveness_timeout_ms: 1000,
            liveness_max_missed: 1,
            log_tail_interval_ms: 500,
            log_idle_interval_ms: 1000,
            subscription_idle_ms: 1000,
            connected_poll_ms: 1000,
            call_timeout_ms: 5000,
            retry_delay_ms: 1000,
        }
    }
}

impl TimingConfig {
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }
    pub fn read_slice(&self) -> Duration {
        Duration::from_millis(self.read_slice_ms)
    }
    pub fn liveness_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_interval_ms)
    }
    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.liveness_timeout_ms)
    }
    pub fn log_tail_interval(&self) -> Duration {
        Duration::from_millis(self.log_tail_interval_ms)
    }
    pub fn log_idle_interval(&self) -> Duration {
        Duration::from_millis(self.log_idle_interval_ms)
    }
    pub fn subscription_idle(&self) -> Duration {
        Duration::from_millis(self.subscription_idle_ms)
    }
    pub fn connected_poll(&self) -> Duration {
        Duration::from_millis(self.connected_poll_ms)
    }
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Millisecond fields that must be non-zero, keyed by field name.
    pub(crate) fn named_intervals(&self) -> [(&'static str, u64); 10] {
        [
            ("dial_timeout_ms", self.dial_timeout_ms),
            ("read_slice_ms", self.read_slice_ms),
            ("liveness_interval_ms", self.liveness_interval_ms),
            ("liveness_timeout_ms", self.liveness_timeout_ms),
            ("log_tail_interval_ms", self.log_tail_interval_ms),
            ("log_idle_interval_ms", self.log_idle_interval_ms),
            ("subscription_idle_ms", self.subscription_idle_ms),
            ("connected_poll_ms", self.connected_poll_ms),
            ("call_timeout_ms", self.call_timeout_ms),
            ("retry_delay_ms", self.retry_delay_ms),
        ]
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_1() -> u32 {
    1
}
fn d_500() -> u64 {
    500
}
fn d_1000() -> u64 {
    1000
}
fn d_2000() -> u64 {
    2000
}
fn d_5000() -> u64 {
    5000
}
