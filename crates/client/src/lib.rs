//! `corelink-client`: resilient client for the corelink daemon.
//!
//! The client owns the TCP transport, bridges it into the capability RPC
//! engine, performs the bootstrap and authentication handshake, and keeps
//! the session alive across transport drops and daemon restarts.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │  Client::connect (retry loop, fixed delay)                │
//! │    └─ supervisor::run_attempt                             │
//! │         dial (IPv4, then IPv6)                            │
//! │         bridge reader / writer  ⇄  RpcSystem              │
//! │         liveness watcher, log tailer                      │
//! │         version → id → name → logFiles                    │
//! │         key() → read key → basic()/auth()                 │
//! │         node subscription                                 │
//! │         on_connect … wait … teardown                      │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! # Failure policy
//!
//! - Transport loss, missed liveness probes, handshake errors and panics
//!   inside an attempt are absorbed: the attempt is torn down and the retry
//!   loop dials again.
//! - An unreadable key file or a rejected authentication stops the client;
//!   `retry_connection_status()` turns false and `connect` returns the error.

pub mod auth;
mod bridge;
pub mod builder;
pub mod caps;
pub mod client;
pub mod dial;
pub mod handler;
mod liveness;
pub mod logtail;
pub mod nodes;
pub mod state;
mod supervisor;
pub mod types;

// ── Re-exports for ergonomic imports ─────────────────────────────────

pub use auth::AuthKey;
pub use builder::ClientBuilder;
pub use caps::{AuthPromise, DaemonServer, DaemonSession};
pub use client::Client;
pub use dial::{AddressFamily, Dialer, TcpDialer, Transport};
pub use handler::{ClientHandler, NoopHandler};
pub use logtail::LogCursor;
pub use state::{AttemptSignal, SessionState};
pub use types::{ClientError, ConnectionPhase, Recovery, SessionInfo};

// Re-export the config and payload types so applications need only this crate.
pub use corelink_domain::config::{AuthLevel, ClientConfig, TimingConfig};
pub use corelink_protocol::{format_node, NodeDescriptor, NodeList, NodeType, VersionInfo};
