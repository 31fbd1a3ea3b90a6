//! Push-based node list subscription.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use corelink_domain::trace::TraceEvent;
use corelink_protocol::daemon::{method, NodesPayload};
use corelink_protocol::{NodeList, RpcFault};
use corelink_rpc::{Capability, RpcSystem};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::caps::DaemonSession;
use crate::handler::ClientHandler;
use crate::state::AttemptSignal;

/// Capability exported to the daemon. Each `nodesUpdate` call is queued on
/// a channel; delivery to the application happens on the subscription
/// activity, not on the engine's task.
pub struct NodesSubscriber {
    tx: mpsc::UnboundedSender<NodeList>,
}

impl NodesSubscriber {
    pub fn new(tx: mpsc::UnboundedSender<NodeList>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl Capability for NodesSubscriber {
    async fn call(&self, _rpc: &RpcSystem, name: &str, params: Value) -> Result<Value, RpcFault> {
        if name != method::NODES_UPDATE {
            return Err(RpcFault::unimplemented(name));
        }
        let payload: NodesPayload = serde_json::from_value(params)
            .map_err(|e| RpcFault::failed(format!("bad nodesUpdate payload: {e}")))?;
        self.tx
            .send(payload.nodes)
            .map_err(|_| RpcFault::failed("subscriber closed"))?;
        Ok(Value::Null)
    }
}

/// Subscribe, then deliver pushes until the attempt stops.
///
/// A failed `subscribeNodes` is logged and ends the activity only; the
/// session carries on without pushes.
pub(crate) async fn run(
    rpc: RpcSystem,
    session: DaemonSession,
    signal: AttemptSignal,
    idle: Duration,
    cache: Arc<Mutex<NodeList>>,
    handler: Arc<dyn ClientHandler>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscriber = rpc.export(Arc::new(NodesSubscriber::new(tx)));

    let subscription = tokio::select! {
        r = session.subscribe_nodes(subscriber) => r,
        _ = signal.stopped() => {
            rpc.revoke(subscriber);
            return;
        }
    };
    let subscription = match subscription {
        Ok(cap) => cap,
        Err(e) => {
            tracing::warn!(error = %e, "node subscription failed");
            rpc.revoke(subscriber);
            return;
        }
    };
    tracing::debug!("subscribed to node updates");

    loop {
        tokio::select! {
            Some(nodes) = rx.recv() => {
                if !signal.is_running() {
                    break;
                }
                TraceEvent::NodesUpdated { count: nodes.len() }.emit();
                *cache.lock() = nodes.clone();
                handler.on_nodes_update(&nodes).await;
            }
            _ = tokio::time::sleep(idle) => {
                if !signal.is_running() {
                    break;
                }
            }
            _ = signal.stopped() => break,
        }
    }

    rpc.revoke(subscriber);
    subscription.release();
    tracing::trace!("node subscription exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscriber_queues_updates() {
        let (rpc, _port) = RpcSystem::new(corelink_rpc::Side::Client, None);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscriber = NodesSubscriber::new(tx);

        let params = json!({ "nodes": [
            { "id": 1, "type": "usbKeyboard", "name": "K-Type", "serial": "a" },
            { "id": 2, "type": "hidioApi", "name": "tool", "serial": "b" },
        ]});
        subscriber
            .call(&rpc, method::NODES_UPDATE, params)
            .await
            .unwrap();

        let nodes = rx.recv().await.unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[1].name, "tool");
    }

    #[tokio::test]
    async fn subscriber_rejects_other_methods() {
        let (rpc, _port) = RpcSystem::new(corelink_rpc::Side::Client, None);
        let (tx, _rx) = mpsc::unbounded_channel();
        let fault = NodesSubscriber::new(tx)
            .call(&rpc, "nodes", Value::Null)
            .await
            .unwrap_err();
        assert_eq!(fault.kind, corelink_protocol::FaultKind::Unimplemented);
    }
}
