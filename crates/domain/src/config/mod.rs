mod daemon;
mod logging;
mod timing;

pub use daemon::*;
pub use logging::*;
pub use timing::*;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level client config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-client identity and connection settings.
///
/// The per-client serial is *not* part of the config: it is generated once
/// when the client is constructed and stays stable for its lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Display name reported to the daemon during authentication.
    #[serde(default = "d_name")]
    pub name: String,
    /// Requested authentication level.
    #[serde(default)]
    pub auth: AuthLevel,
    /// Node type tag sent in the client identity record.
    #[serde(default = "d_node_type")]
    pub node_type: String,
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: d_name(),
            auth: AuthLevel::None,
            node_type: d_node_type(),
            daemon: DaemonConfig::default(),
            timing: TimingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn d_name() -> String {
    "corelink".into()
}

fn d_node_type() -> String {
    "hidioApi".into()
}

impl ClientConfig {
    /// Parse a config from TOML text. Missing fields take their defaults.
    pub fn from_toml_str(raw: &str) -> crate::Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Read and parse a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> crate::Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml_str(&raw)?;
        tracing::debug!(path = %path.as_ref().display(), "loaded client config");
        Ok(config)
    }

    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push(ConfigError::error("name", "client name must not be empty"));
        }

        if self.daemon.host.is_empty() {
            errors.push(ConfigError::error("daemon.host", "host must not be empty"));
        }

        if self.daemon.port == 0 {
            errors.push(ConfigError::error(
                "daemon.port",
                "port must be greater than 0",
            ));
        }

        for (field, value) in self.timing.named_intervals() {
            if value == 0 {
                errors.push(ConfigError::error(
                    format!("timing.{field}"),
                    "interval must be greater than 0",
                ));
            }
        }

        if self.timing.liveness_max_missed == 0 {
            errors.push(ConfigError::error(
                "timing.liveness_max_missed",
                "at least one missed probe is required before reconnecting",
            ));
        }

        // A probe that may take longer than the pause between probes means
        // the watcher spends most of its time waiting on a dead peer.
        if self.timing.liveness_timeout_ms >= self.timing.liveness_interval_ms {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "timing.liveness_timeout_ms".into(),
                message: "probe timeout is not shorter than the probe interval".into(),
            });
        }

        errors
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Authentication level
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which key file (and which exchange method) grants an authenticated
/// capability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthLevel {
    /// Only the pre-authentication APIs are available.
    #[default]
    None,
    /// Restricted API access, uses the basic key.
    Basic,
    /// Full API access, uses the privileged key.
    Admin,
}

impl AuthLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthLevel::None => "none",
            AuthLevel::Basic => "basic",
            AuthLevel::Admin => "admin",
        }
    }

    /// Whether this level asks for an authenticated capability at all.
    pub fn requires_key(&self) -> bool {
        !matches!(self, AuthLevel::None)
    }
}

impl fmt::Display for AuthLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthLevel {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(AuthLevel::None),
            "basic" => Ok(AuthLevel::Basic),
            "admin" | "auth" => Ok(AuthLevel::Admin),
            other => Err(crate::Error::Config(format!(
                "unknown auth level `{other}` (expected none, basic or admin)"
            ))),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl ConfigError {
    fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}
