//! Core types shared by the client modules: errors, phases and the
//! identification record.

use std::fmt;
use std::path::PathBuf;

use corelink_protocol::VersionInfo;
use corelink_rpc::RpcError;

/// How the supervisor reacts to a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Absorbed by the retry loop: the next attempt dials again.
    Transient,
    /// The client stops and `retry_connection_status()` turns false.
    Permanent,
}

/// Top-level client error.
#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("config: {0}")]
    Config(String),
    #[error("rpc: {0}")]
    Rpc(#[from] RpcError),
    #[error("could not read key file {path}: {source}")]
    KeyUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("authentication rejected ({level}): {reason}")]
    AuthRejected { level: String, reason: String },
    #[error("no authenticated session")]
    NotAuthenticated,
    #[error("attempt panicked: {0}")]
    Panicked(String),
}

impl ClientError {
    /// Only configuration and authentication failures stop the client.
    pub fn recovery(&self) -> Recovery {
        match self {
            ClientError::Config(_)
            | ClientError::KeyUnreadable { .. }
            | ClientError::AuthRejected { .. } => Recovery::Permanent,
            ClientError::Rpc(_) | ClientError::NotAuthenticated
            | ClientError::Panicked(_) => Recovery::Transient,
        }
    }
}

impl From<corelink_domain::Error> for ClientError {
    fn from(e: corelink_domain::Error) -> Self {
        ClientError::Config(e.to_string())
    }
}

/// Observable phase of the connection supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionPhase {
    /// No attempt in progress (never connected, or between attempts).
    Idle,
    Dialing,
    Bootstrapping,
    Identifying,
    Authenticating,
    Connected,
    TearingDown,
    /// The retry loop has exited.
    Stopped,
}

impl ConnectionPhase {
    /// Whether no attempt is running.
    pub fn is_quiescent(&self) -> bool {
        matches!(self, ConnectionPhase::Idle | ConnectionPhase::Stopped)
    }
}

impl fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionPhase::Idle => "idle",
            ConnectionPhase::Dialing => "dialing",
            ConnectionPhase::Bootstrapping => "bootstrapping",
            ConnectionPhase::Identifying => "identifying",
            ConnectionPhase::Authenticating => "authenticating",
            ConnectionPhase::Connected => "connected",
            ConnectionPhase::TearingDown => "tearing_down",
            ConnectionPhase::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// What the daemon told us about itself during identification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionInfo {
    pub version: Option<VersionInfo>,
    pub uid: Option<u64>,
    pub name: Option<String>,
    pub log_files: Vec<String>,
}

/// Marker the daemon puts in the name of the log file it currently writes.
pub const CURRENT_LOG_MARKER: &str = "rCURRENT";

/// Pick the log file the daemon is currently writing to.
pub fn select_current_log(paths: &[String]) -> Option<PathBuf> {
    paths
        .iter()
        .find(|p| p.contains(CURRENT_LOG_MARKER))
        .map(PathBuf::from)
}
