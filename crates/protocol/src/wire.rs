use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Export id of the bootstrap capability on the serving side.
pub const BOOTSTRAP_CAP: u64 = 0;

/// Maximum length of one framed message line (1 MiB).
pub const MAX_MESSAGE_BYTES: usize = 1024 * 1024;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One framed RPC message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RpcMessage {
    /// Invoke `method` on `target`. `question` is chosen by the caller and
    /// echoed in the matching `return`.
    Call {
        question: u64,
        target: Target,
        method: String,
        #[serde(default)]
        params: Value,
    },

    /// Completion of a call: exactly one of `result` / `fault` is set.
    Return {
        question: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fault: Option<RpcFault>,
    },

    /// The sender drops its reference to one of the receiver's exports.
    Release { cap: u64 },
}

impl RpcMessage {
    pub fn ok(question: u64, result: Value) -> Self {
        RpcMessage::Return {
            question,
            result: Some(result),
            fault: None,
        }
    }

    pub fn fault(question: u64, fault: RpcFault) -> Self {
        RpcMessage::Return {
            question,
            result: None,
            fault: Some(fault),
        }
    }
}

/// What a call is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Target {
    /// A capability in the receiver's export table.
    Export { cap: u64 },
    /// The capability found in `field` of the (possibly still pending)
    /// answer to `question`. This is what makes promise pipelining work.
    Answer { question: u64, field: String },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Capability references
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A capability embedded in a payload, `{"$cap": id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CapRef {
    #[serde(rename = "$cap")]
    pub id: u64,
}

impl CapRef {
    pub fn new(id: u64) -> Self {
        Self { id }
    }

    /// Extract a capability reference from an arbitrary JSON value.
    pub fn from_value(value: &Value) -> Option<Self> {
        value.get("$cap").and_then(Value::as_u64).map(Self::new)
    }

    pub fn to_value(self) -> Value {
        serde_json::json!({ "$cap": self.id })
    }
}

/// Whether `value` carries a capability reference anywhere in it.
pub fn contains_cap(value: &Value) -> bool {
    match value {
        Value::Object(map) => {
            map.contains_key("$cap") || map.values().any(contains_cap)
        }
        Value::Array(items) => items.iter().any(contains_cap),
        _ => false,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Faults
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    Failed,
    Unimplemented,
    Disconnected,
    Overloaded,
}

/// Error returned by the remote side of a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcFault {
    pub kind: FaultKind,
    pub message: String,
}

impl RpcFault {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::Failed,
            message: message.into(),
        }
    }

    pub fn unimplemented(method: &str) -> Self {
        Self {
            kind: FaultKind::Unimplemented,
            message: format!("method not implemented: {method}"),
        }
    }
}

impl std::fmt::Display for RpcFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for RpcFault {}
