//! Two engines wired back to back through their byte ports.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use corelink_protocol::{CapRef, FaultKind, RpcFault};
use corelink_rpc::{Capability, RpcError, RpcSystem, Side};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;

// ── Test capabilities ───────────────────────────────────────────────────

/// Bootstrap: `echo`, `login` (returns a counter capability unless the
/// password is wrong), `subscribe` (calls the given capability back) and
/// `stall` (never answers).
struct Root;

#[async_trait]
impl Capability for Root {
    async fn call(&self, rpc: &RpcSystem, method: &str, params: Value) -> Result<Value, RpcFault> {
        match method {
            "echo" => Ok(params),
            "login" => {
                if params["password"] != "hunter2" {
                    return Err(RpcFault::failed("bad password"));
                }
                let port = rpc.export(Arc::new(Counter::default()));
                Ok(json!({ "port": port }))
            }
            "subscribe" => {
                let cap = CapRef::from_value(&params["subscriber"])
                    .ok_or_else(|| RpcFault::failed("missing subscriber"))?;
                let subscriber = rpc.import(cap);
                subscriber
                    .call("notify", json!({ "n": 1 }))
                    .await
                    .map_err(|e| RpcFault::failed(e.to_string()))?;
                Ok(Value::Null)
            }
            "stall" => {
                std::future::pending::<()>().await;
                Ok(Value::Null)
            }
            other => Err(RpcFault::unimplemented(other)),
        }
    }
}

#[derive(Default)]
struct Counter {
    hits: Mutex<u64>,
}

#[async_trait]
impl Capability for Counter {
    async fn call(&self, _rpc: &RpcSystem, method: &str, _params: Value) -> Result<Value, RpcFault> {
        match method {
            "hit" => {
                let mut hits = self.hits.lock();
                *hits += 1;
                Ok(json!({ "hits": *hits }))
            }
            other => Err(RpcFault::unimplemented(other)),
        }
    }
}

struct Recorder(mpsc::UnboundedSender<Value>);

#[async_trait]
impl Capability for Recorder {
    async fn call(&self, _rpc: &RpcSystem, _method: &str, params: Value) -> Result<Value, RpcFault> {
        let _ = self.0.send(params);
        Ok(Value::Null)
    }
}

fn connected_pair() -> (RpcSystem, RpcSystem) {
    let (client, mut client_port) = RpcSystem::new(Side::Client, None);
    let (server, mut server_port) = RpcSystem::new(Side::Server, Some(Arc::new(Root)));
    tokio::spawn(async move {
        let _ = tokio::io::copy_bidirectional(&mut client_port, &mut server_port).await;
    });
    (client, server)
}

// ── Tests ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn call_roundtrip() {
    let (client, _server) = connected_pair();
    let reply = client
        .bootstrap()
        .call("echo", json!({ "hello": "world" }))
        .await
        .unwrap();
    assert_eq!(reply, json!({ "hello": "world" }));
}

#[tokio::test]
async fn unknown_method_is_a_fault() {
    let (client, _server) = connected_pair();
    let err = client.bootstrap().call("nope", Value::Null).await.unwrap_err();
    match err {
        RpcError::Fault(fault) => assert_eq!(fault.kind, FaultKind::Unimplemented),
        other => panic!("expected fault, got {other:?}"),
    }
}

#[tokio::test]
async fn returned_capability_is_callable() {
    let (client, _server) = connected_pair();
    let reply = client
        .bootstrap()
        .call("login", json!({ "password": "hunter2" }))
        .await
        .unwrap();
    let port = client.import(CapRef::from_value(&reply["port"]).unwrap());

    port.call("hit", Value::Null).await.unwrap();
    let reply = port.call("hit", Value::Null).await.unwrap();
    assert_eq!(reply["hits"], 2);
}

#[tokio::test]
async fn pipelined_call_runs_before_answer_is_awaited() {
    let (client, _server) = connected_pair();
    let promise = client
        .bootstrap()
        .send("login", json!({ "password": "hunter2" }));

    // Issued against the pending answer, without awaiting `promise`.
    let port = promise.pipeline("port");
    let pipelined = port.call("hit", Value::Null);
    let reply = tokio::time::timeout(Duration::from_secs(5), pipelined)
        .await
        .expect("pipelined call timed out")
        .unwrap();
    assert_eq!(reply["hits"], 1);

    let answer = promise.await.unwrap();
    assert!(CapRef::from_value(&answer["port"]).is_some());
}

#[tokio::test]
async fn pipelined_call_on_failed_answer_faults() {
    let (client, _server) = connected_pair();
    let promise = client
        .bootstrap()
        .send("login", json!({ "password": "wrong" }));
    let err = promise
        .pipeline("port")
        .call("hit", Value::Null)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("bad password"), "got: {err}");
    assert!(promise.await.is_err());
}

#[tokio::test]
async fn peer_can_call_exported_capability() {
    let (client, _server) = connected_pair();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscriber = client.export(Arc::new(Recorder(tx)));

    client
        .bootstrap()
        .call("subscribe", json!({ "subscriber": subscriber }))
        .await
        .unwrap();

    let got = rx.recv().await.unwrap();
    assert_eq!(got, json!({ "n": 1 }));
}

#[tokio::test]
async fn released_capability_stops_answering() {
    let (client, _server) = connected_pair();
    let reply = client
        .bootstrap()
        .call("login", json!({ "password": "hunter2" }))
        .await
        .unwrap();
    let port = client.import(CapRef::from_value(&reply["port"]).unwrap());
    port.release();

    let err = port.call("hit", Value::Null).await.unwrap_err();
    assert!(err.to_string().contains("unknown capability"), "got: {err}");
}

#[tokio::test]
async fn shutdown_fails_pending_calls() {
    let (client, _server) = connected_pair();
    let stalled = client.bootstrap().send("stall", Value::Null);

    client.shutdown();
    let err = tokio::time::timeout(Duration::from_secs(5), stalled)
        .await
        .expect("pending call was not failed")
        .unwrap_err();
    assert!(err.is_disconnect());

    // New calls fail immediately once closed.
    let err = client.bootstrap().call("echo", Value::Null).await.unwrap_err();
    assert!(err.is_disconnect());
}

#[tokio::test]
async fn closing_the_port_closes_the_peer() {
    let (client, server) = connected_pair();
    client.bootstrap().call("echo", Value::Null).await.unwrap();

    client.shutdown();
    tokio::time::timeout(Duration::from_secs(5), server.closed())
        .await
        .expect("server did not observe the closed port");
    assert!(server.is_closed());
}

#[tokio::test]
async fn typed_call_times_out() {
    let (client, _server) = connected_pair();
    let err = client
        .bootstrap()
        .call_within::<_, Value>("stall", &Value::Null, Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Timeout(_)));
}
