//! Typed views over the daemon's capabilities.

use std::time::Duration;

use corelink_domain::config::AuthLevel;
use corelink_protocol::daemon::{
    method, AliveReply, IdReply, KeyReply, LogFilesReply, NameReply, NodesPayload,
    SubscribeNodesParams, SubscribeNodesReply, VersionReply,
};
use corelink_protocol::{AuthReply, AuthRequest, CapRef, KeyInfo, NodeList, VersionInfo};
use corelink_rpc::{Promise, RemoteCapability, RpcError};
use serde_json::Value;

/// The daemon's bootstrap capability: pre-authentication API.
#[derive(Clone, Debug)]
pub struct DaemonServer {
    cap: RemoteCapability,
    call_timeout: Duration,
}

impl DaemonServer {
    pub(crate) fn new(cap: RemoteCapability, call_timeout: Duration) -> Self {
        Self { cap, call_timeout }
    }

    /// Untyped access for methods this client does not wrap.
    pub fn raw(&self) -> &RemoteCapability {
        &self.cap
    }

    pub async fn version(&self) -> Result<VersionInfo, RpcError> {
        let reply: VersionReply = self
            .cap
            .call_within(method::VERSION, &Value::Null, self.call_timeout)
            .await?;
        Ok(reply.version)
    }

    /// Numeric id the daemon assigned to this connection.
    pub async fn id(&self) -> Result<u64, RpcError> {
        let reply: IdReply = self
            .cap
            .call_within(method::ID, &Value::Null, self.call_timeout)
            .await?;
        Ok(reply.id)
    }

    pub async fn name(&self) -> Result<String, RpcError> {
        let reply: NameReply = self
            .cap
            .call_within(method::NAME, &Value::Null, self.call_timeout)
            .await?;
        Ok(reply.name)
    }

    pub async fn log_files(&self) -> Result<Vec<String>, RpcError> {
        let reply: LogFilesReply = self
            .cap
            .call_within(method::LOG_FILES, &Value::Null, self.call_timeout)
            .await?;
        Ok(reply.paths)
    }

    pub async fn key(&self) -> Result<KeyInfo, RpcError> {
        let reply: KeyReply = self
            .cap
            .call_within(method::KEY, &Value::Null, self.call_timeout)
            .await?;
        Ok(reply.key)
    }

    /// No-op round trip, bounded by `timeout`.
    pub async fn alive(&self, timeout: Duration) -> Result<bool, RpcError> {
        let reply: AliveReply = self
            .cap
            .call_within(method::ALIVE, &Value::Null, timeout)
            .await?;
        Ok(reply.alive)
    }

    /// Send `basic()` or `auth()` without waiting for the answer.
    ///
    /// Returns `None` for [`AuthLevel::None`].
    pub fn authenticate(
        &self,
        level: AuthLevel,
        request: &AuthRequest,
    ) -> Result<Option<AuthPromise>, RpcError> {
        let method = match level {
            AuthLevel::None => return Ok(None),
            AuthLevel::Basic => method::BASIC,
            AuthLevel::Admin => method::AUTH,
        };
        let params = serde_json::to_value(request)?;
        Ok(Some(AuthPromise {
            promise: self.cap.send(method, params),
            call_timeout: self.call_timeout,
        }))
    }
}

/// A pending authentication.
///
/// [`port`](Self::port) yields a capability usable right away: calls on it
/// are pipelined onto the pending answer.
#[derive(Debug)]
pub struct AuthPromise {
    promise: Promise,
    call_timeout: Duration,
}

impl AuthPromise {
    pub fn port(&self) -> DaemonSession {
        DaemonSession::new(self.promise.pipeline("port"), self.call_timeout)
    }

    /// Wait for the daemon's answer and resolve the authenticated capability.
    pub async fn session(self) -> Result<DaemonSession, RpcError> {
        let call_timeout = self.call_timeout;
        let rpc = self.port().cap.rpc().clone();
        let reply = tokio::time::timeout(call_timeout, self.promise)
            .await
            .map_err(|_| RpcError::Timeout(call_timeout))??;
        let reply: AuthReply = serde_json::from_value(reply)?;
        Ok(DaemonSession::new(rpc.import(reply.port), call_timeout))
    }
}

/// The authenticated capability.
#[derive(Clone, Debug)]
pub struct DaemonSession {
    cap: RemoteCapability,
    call_timeout: Duration,
}

impl DaemonSession {
    pub(crate) fn new(cap: RemoteCapability, call_timeout: Duration) -> Self {
        Self { cap, call_timeout }
    }

    pub fn raw(&self) -> &RemoteCapability {
        &self.cap
    }

    pub async fn nodes(&self) -> Result<NodeList, RpcError> {
        let reply: NodesPayload = self
            .cap
            .call_within(method::NODES, &Value::Null, self.call_timeout)
            .await?;
        Ok(reply.nodes)
    }

    /// Register `subscriber` for node pushes. The returned capability keeps
    /// the subscription alive until released.
    pub async fn subscribe_nodes(&self, subscriber: CapRef) -> Result<RemoteCapability, RpcError> {
        let reply: SubscribeNodesReply = self
            .cap
            .call_within(
                method::SUBSCRIBE_NODES,
                &SubscribeNodesParams { subscriber },
                self.call_timeout,
            )
            .await?;
        Ok(self.cap.rpc().import(reply.subscription))
    }

    /// Release the reference. Pipelined references are left alone.
    pub(crate) fn release(&self) {
        self.cap.release();
    }
}
