//! Application callback slots.

use async_trait::async_trait;
use corelink_protocol::NodeList;

use crate::caps::{DaemonServer, DaemonSession};

/// Notification points invoked by the client. Every method defaults to a
/// no-op, so implement only what you need.
///
/// Callbacks run on the client's own tasks and are never invoked once the
/// attempt that produced them has started tearing down; `on_disconnect` is
/// the exception, it marks the start of teardown. Do not await
/// `Client::disconnect` from a callback: it waits for the attempt that is
/// running the callback.
#[async_trait]
pub trait ClientHandler: Send + Sync + 'static {
    /// The handshake finished. `session` is `None` at auth level `none`.
    async fn on_connect(&self, server: DaemonServer, session: Option<DaemonSession>) {
        let _ = (server, session);
    }

    async fn on_disconnect(&self) {}

    /// The daemon pushed a new node list (replaces the previous one).
    async fn on_nodes_update(&self, nodes: &NodeList) {
        let _ = nodes;
    }

    /// One new line of the daemon's current log file.
    async fn on_core_log_entry(&self, line: &str) {
        let _ = line;
    }
}

/// Handler that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHandler;

impl ClientHandler for NoopHandler {}
