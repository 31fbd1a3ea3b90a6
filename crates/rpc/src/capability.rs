//! Local and remote capabilities.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use corelink_protocol::{RpcFault, Target};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::RpcError;
use crate::system::RpcSystem;

/// Implement this trait to serve calls from the peer.
///
/// Results may embed capabilities: export them with
/// [`RpcSystem::export`] and place the returned `CapRef` in the value.
#[async_trait]
pub trait Capability: Send + Sync + 'static {
    async fn call(&self, rpc: &RpcSystem, method: &str, params: Value) -> Result<Value, RpcFault>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RemoteCapability
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A reference to a capability living on the peer.
#[derive(Clone)]
pub struct RemoteCapability {
    rpc: RpcSystem,
    target: Target,
}

impl RemoteCapability {
    pub(crate) fn new(rpc: RpcSystem, target: Target) -> Self {
        Self { rpc, target }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn rpc(&self) -> &RpcSystem {
        &self.rpc
    }

    /// Send a call without waiting for it. The returned promise can be
    /// awaited or pipelined.
    pub fn send(&self, method: &str, params: Value) -> Promise {
        self.rpc.send_call(self.target.clone(), method, params)
    }

    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.send(method, params).await
    }

    /// Typed call: serialize `params`, decode the reply into `R`.
    pub async fn call_as<P, R>(&self, method: &str, params: &P) -> Result<R, RpcError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params)?;
        let reply = self.call(method, params).await?;
        Ok(serde_json::from_value(reply)?)
    }

    /// Like [`call_as`](Self::call_as), bounded by `timeout`.
    pub async fn call_within<P, R>(
        &self,
        method: &str,
        params: &P,
        timeout: Duration,
    ) -> Result<R, RpcError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        tokio::time::timeout(timeout, self.call_as(method, params))
            .await
            .map_err(|_| RpcError::Timeout(timeout))?
    }

    /// Tell the peer this reference is no longer used. Only exported
    /// capabilities can be released; pipelined references are a no-op.
    pub fn release(&self) {
        if let Target::Export { cap } = self.target {
            self.rpc.send_release(cap);
        }
    }
}

impl fmt::Debug for RemoteCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCapability")
            .field("target", &self.target)
            .finish()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Promise
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The pending result of a call.
pub struct Promise {
    rpc: RpcSystem,
    question: u64,
    state: PromiseState,
}

enum PromiseState {
    Pending(oneshot::Receiver<Result<Value, RpcError>>),
    Failed(Option<RpcError>),
    Done,
}

impl Promise {
    pub(crate) fn pending(
        rpc: RpcSystem,
        question: u64,
        rx: oneshot::Receiver<Result<Value, RpcError>>,
    ) -> Self {
        Self {
            rpc,
            question,
            state: PromiseState::Pending(rx),
        }
    }

    pub(crate) fn failed(rpc: RpcSystem, question: u64, error: RpcError) -> Self {
        Self {
            rpc,
            question,
            state: PromiseState::Failed(Some(error)),
        }
    }

    pub fn question(&self) -> u64 {
        self.question
    }

    /// A capability standing for `field` of the eventual answer. Calls on
    /// it are sent right away; the peer resolves them once this question is
    /// answered, and fails them if the answer is a fault.
    pub fn pipeline(&self, field: &str) -> RemoteCapability {
        RemoteCapability::new(
            self.rpc.clone(),
            Target::Answer {
                question: self.question,
                field: field.to_string(),
            },
        )
    }
}

impl Future for Promise {
    type Output = Result<Value, RpcError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let outcome = match &mut this.state {
            PromiseState::Pending(rx) => match Pin::new(rx).poll(cx) {
                Poll::Ready(Ok(outcome)) => outcome,
                // Sender dropped without an answer: the system closed.
                Poll::Ready(Err(_)) => Err(RpcError::Disconnected),
                Poll::Pending => return Poll::Pending,
            },
            PromiseState::Failed(err) => Err(err.take().unwrap_or(RpcError::Disconnected)),
            PromiseState::Done => Err(RpcError::Disconnected),
        };
        this.state = PromiseState::Done;
        Poll::Ready(outcome)
    }
}

impl Drop for Promise {
    /// An unanswered promise that goes away (a timed-out `call_within`, a
    /// dropped `send`) takes its question table entry with it.
    fn drop(&mut self) {
        if let PromiseState::Pending(_) = self.state {
            self.rpc.forget_question(self.question);
        }
    }
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("question", &self.question)
            .finish()
    }
}
