//! The engine: question/answer bookkeeping, export table and the two I/O
//! tasks that frame messages on the byte port.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use corelink_protocol::wire::contains_cap;
use corelink_protocol::{CapRef, RpcFault, RpcMessage, Target, BOOTSTRAP_CAP, MAX_MESSAGE_BYTES};
use futures_util::future::{BoxFuture, Shared};
use futures_util::{FutureExt, SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::DuplexStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tokio_util::sync::CancellationToken;

use crate::capability::{Capability, Promise, RemoteCapability};
use crate::error::RpcError;

/// In-memory buffer between the engine and its byte port.
const PORT_BUFFER_BYTES: usize = 64 * 1024;

/// Which end of the connection this system is. Only used for diagnostics;
/// the protocol itself is symmetric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

type SharedAnswer = Shared<BoxFuture<'static, Result<Value, RpcFault>>>;

/// Items queued for the writer task.
enum Outbound {
    Message(RpcMessage),
    /// Acknowledged once everything queued before it reached the port.
    Flush(oneshot::Sender<()>),
}

/// Handle to one RPC connection. Cheap to clone.
#[derive(Clone)]
pub struct RpcSystem {
    inner: Arc<Inner>,
}

struct Inner {
    side: Side,
    outbound: mpsc::UnboundedSender<Outbound>,
    state: Mutex<State>,
    next_question: AtomicU64,
    next_export: AtomicU64,
    closed: CancellationToken,
}

#[derive(Default)]
struct State {
    /// Our outstanding calls, keyed by our question id.
    questions: HashMap<u64, oneshot::Sender<Result<Value, RpcError>>>,
    /// Capabilities we serve, keyed by export id.
    exports: HashMap<u64, Arc<dyn Capability>>,
    /// Answers to the peer's calls, keyed by the peer's question id, kept
    /// so pipelined calls can target them. Plain successful answers are
    /// dropped once returned; faults and answers carrying capabilities live
    /// as long as the connection.
    answers: HashMap<u64, SharedAnswer>,
    closed: bool,
}

impl RpcSystem {
    /// Create a system and return it together with its byte port.
    ///
    /// Bytes received from the transport are written into the port; bytes
    /// read from the port go out on the transport. Must be called inside a
    /// Tokio runtime: the framing tasks are spawned immediately.
    pub fn new(side: Side, bootstrap: Option<Arc<dyn Capability>>) -> (Self, DuplexStream) {
        let (engine_end, port) = tokio::io::duplex(PORT_BUFFER_BYTES);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let mut state = State::default();
        if let Some(cap) = bootstrap {
            state.exports.insert(BOOTSTRAP_CAP, cap);
        }

        let system = Self {
            inner: Arc::new(Inner {
                side,
                outbound,
                state: Mutex::new(state),
                next_question: AtomicU64::new(1),
                next_export: AtomicU64::new(BOOTSTRAP_CAP + 1),
                closed: CancellationToken::new(),
            }),
        };

        let (rd, wr) = tokio::io::split(engine_end);
        tokio::spawn(system.clone().read_loop(rd));
        tokio::spawn(system.clone().write_loop(wr, outbound_rx));

        tracing::debug!(side = ?side, "rpc system started");
        (system, port)
    }

    pub fn side(&self) -> Side {
        self.inner.side
    }

    /// The peer's bootstrap capability.
    pub fn bootstrap(&self) -> RemoteCapability {
        RemoteCapability::new(self.clone(), Target::Export { cap: BOOTSTRAP_CAP })
    }

    /// Serve `cap` to the peer and return the reference to hand out.
    pub fn export(&self, cap: Arc<dyn Capability>) -> CapRef {
        let id = self.inner.next_export.fetch_add(1, Ordering::Relaxed);
        self.inner.state.lock().exports.insert(id, cap);
        CapRef::new(id)
    }

    /// Stop serving an export. Later calls on it fault.
    pub fn revoke(&self, cap: CapRef) {
        self.inner.state.lock().exports.remove(&cap.id);
    }

    /// Wrap a reference received from the peer.
    pub fn import(&self, cap: CapRef) -> RemoteCapability {
        RemoteCapability::new(self.clone(), Target::Export { cap: cap.id })
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Resolves once the connection is closed.
    pub async fn closed(&self) {
        self.inner.closed.cancelled().await
    }

    /// Close the connection: fail every pending question and stop both
    /// framing tasks, which closes the engine side of the byte port.
    ///
    /// Messages still queued are dropped; call [`flush`](Self::flush) first
    /// to get releases out.
    pub fn shutdown(&self) {
        self.close("shutdown requested");
    }

    /// Wait until every message queued so far has been written to the byte
    /// port. Returns at once if the writer task is gone.
    pub async fn flush(&self) {
        let (ack, written) = oneshot::channel();
        if self.inner.outbound.send(Outbound::Flush(ack)).is_ok() {
            let _ = written.await;
        }
    }

    // ── outbound ─────────────────────────────────────────────────────

    pub(crate) fn send_call(&self, target: Target, method: &str, params: Value) -> Promise {
        let question = self.inner.next_question.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Promise::failed(self.clone(), question, RpcError::Disconnected);
            }
            state.questions.insert(question, tx);
        }

        let msg = RpcMessage::Call {
            question,
            target,
            method: method.to_string(),
            params,
        };
        if self.inner.outbound.send(Outbound::Message(msg)).is_err() {
            self.inner.state.lock().questions.remove(&question);
            return Promise::failed(self.clone(), question, RpcError::Disconnected);
        }

        tracing::trace!(question, method, "rpc call sent");
        Promise::pending(self.clone(), question, rx)
    }

    pub(crate) fn send_release(&self, cap: u64) {
        if !self.is_closed() {
            let _ = self
                .inner
                .outbound
                .send(Outbound::Message(RpcMessage::Release { cap }));
        }
    }

    /// Drop the waiter of a question nobody awaits any more. A late
    /// `return` for it is ignored.
    pub(crate) fn forget_question(&self, question: u64) {
        if self.inner.state.lock().questions.remove(&question).is_some() {
            tracing::trace!(question, "abandoned pending question");
        }
    }

    // ── inbound ──────────────────────────────────────────────────────

    fn handle_line(&self, line: &str) {
        let msg = match serde_json::from_str::<RpcMessage>(line) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(error = %e, "dropping undecodable rpc message");
                return;
            }
        };

        match msg {
            RpcMessage::Return {
                question,
                result,
                fault,
            } => {
                let waiter = self.inner.state.lock().questions.remove(&question);
                let outcome = match fault {
                    Some(fault) => Err(RpcError::Fault(fault)),
                    None => Ok(result.unwrap_or(Value::Null)),
                };
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(outcome);
                    }
                    None => tracing::debug!(question, "return for unknown question"),
                }
            }
            RpcMessage::Call {
                question,
                target,
                method,
                params,
            } => self.accept_call(question, target, method, params),
            RpcMessage::Release { cap } => {
                tracing::trace!(cap, "peer released export");
                self.inner.state.lock().exports.remove(&cap);
            }
        }
    }

    /// Register the answer before dispatching so a pipelined call that
    /// arrives on the next line always finds it.
    fn accept_call(&self, question: u64, target: Target, method: String, params: Value) {
        let this = self.clone();
        let method_name = method.clone();
        let answer: SharedAnswer = async move { this.dispatch(target, &method, params).await }
            .boxed()
            .shared();

        {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.answers.insert(question, answer.clone());
        }

        let this = self.clone();
        tokio::spawn(async move {
            let outcome = answer.await;
            let keep = match &outcome {
                Ok(v) => contains_cap(v),
                Err(_) => true,
            };
            if !keep {
                this.inner.state.lock().answers.remove(&question);
            }
            let msg = match outcome {
                Ok(value) => RpcMessage::ok(question, value),
                Err(fault) => {
                    tracing::debug!(question, method = %method_name, fault = %fault, "call faulted");
                    RpcMessage::fault(question, fault)
                }
            };
            let _ = this.inner.outbound.send(Outbound::Message(msg));
        });
    }

    async fn dispatch(&self, target: Target, method: &str, params: Value) -> Result<Value, RpcFault> {
        let cap_id = match target {
            Target::Export { cap } => cap,
            Target::Answer { question, field } => {
                let answer = self
                    .inner
                    .state
                    .lock()
                    .answers
                    .get(&question)
                    .cloned()
                    .ok_or_else(|| RpcFault::failed(format!("no answer for question {question}")))?;
                let value = answer.await?;
                value
                    .get(field.as_str())
                    .and_then(CapRef::from_value)
                    .ok_or_else(|| {
                        RpcFault::failed(format!("field `{field}` of question {question} is not a capability"))
                    })?
                    .id
            }
        };

        let cap = self
            .inner
            .state
            .lock()
            .exports
            .get(&cap_id)
            .cloned()
            .ok_or_else(|| RpcFault::failed(format!("unknown capability {cap_id}")))?;

        cap.call(self, method, params).await
    }

    fn close(&self, reason: &str) {
        let questions = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.exports.clear();
            state.answers.clear();
            std::mem::take(&mut state.questions)
        };

        for (_, tx) in questions {
            let _ = tx.send(Err(RpcError::Disconnected));
        }
        self.inner.closed.cancel();
        tracing::debug!(side = ?self.inner.side, reason, "rpc system closed");
    }

    // ── framing tasks ────────────────────────────────────────────────

    async fn read_loop(self, rd: tokio::io::ReadHalf<DuplexStream>) {
        let mut frames = FramedRead::new(rd, LinesCodec::new_with_max_length(MAX_MESSAGE_BYTES));
        loop {
            tokio::select! {
                frame = frames.next() => match frame {
                    Some(Ok(line)) => {
                        if !line.trim().is_empty() {
                            self.handle_line(&line);
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "rpc framing error");
                        break;
                    }
                    None => break,
                },
                _ = self.inner.closed.cancelled() => break,
            }
        }
        self.close("byte port closed");
    }

    async fn write_loop(
        self,
        wr: tokio::io::WriteHalf<DuplexStream>,
        mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    ) {
        let mut sink = FramedWrite::new(wr, LinesCodec::new_with_max_length(MAX_MESSAGE_BYTES));
        loop {
            let item = tokio::select! {
                item = outbound_rx.recv() => match item {
                    Some(i) => i,
                    None => break,
                },
                _ = self.inner.closed.cancelled() => break,
            };
            let msg = match item {
                Outbound::Message(m) => m,
                Outbound::Flush(ack) => {
                    // Each message is flushed as it is sent.
                    let _ = ack.send(());
                    continue;
                }
            };

            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!(error = %e, "failed to serialize outbound rpc message");
                    continue;
                }
            };
            if let Err(e) = sink.send(json).await {
                tracing::debug!(error = %e, "rpc port write failed");
                break;
            }
        }
        self.close("outbound stream ended");
    }
}

impl fmt::Debug for RpcSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcSystem")
            .field("side", &self.inner.side)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    fn pending_questions(rpc: &RpcSystem) -> usize {
        rpc.inner.state.lock().questions.len()
    }

    #[tokio::test]
    async fn flushed_release_reaches_the_port_before_shutdown() {
        let (rpc, mut port) = RpcSystem::new(Side::Client, None);
        rpc.import(CapRef::new(5)).release();
        rpc.flush().await;
        rpc.shutdown();

        let mut written = String::new();
        tokio::time::timeout(Duration::from_secs(5), port.read_to_string(&mut written))
            .await
            .expect("port never reached EOF")
            .unwrap();
        let msg: RpcMessage = serde_json::from_str(written.trim()).unwrap();
        assert_eq!(msg, RpcMessage::Release { cap: 5 });
    }

    #[tokio::test]
    async fn flush_after_close_returns() {
        let (rpc, _port) = RpcSystem::new(Side::Client, None);
        rpc.shutdown();
        tokio::time::timeout(Duration::from_secs(5), rpc.flush())
            .await
            .expect("flush blocked on a closed system");
    }

    #[tokio::test]
    async fn dropped_promise_forgets_its_question() {
        let (rpc, _port) = RpcSystem::new(Side::Client, None);
        let promise = rpc.bootstrap().send("never", Value::Null);
        assert_eq!(pending_questions(&rpc), 1);
        drop(promise);
        assert_eq!(pending_questions(&rpc), 0);
    }

    #[tokio::test]
    async fn timed_out_call_forgets_its_question() {
        let (rpc, _port) = RpcSystem::new(Side::Client, None);
        let err = rpc
            .bootstrap()
            .call_within::<_, Value>("never", &Value::Null, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Timeout(_)));
        assert_eq!(pending_questions(&rpc), 0);
    }
}
