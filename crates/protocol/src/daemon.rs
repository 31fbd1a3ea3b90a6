//! Method names and payloads of the daemon's capability surface.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::wire::CapRef;

/// Method names as they appear on the wire.
pub mod method {
    // Root capability, callable before authentication.
    pub const VERSION: &str = "version";
    pub const ID: &str = "id";
    pub const NAME: &str = "name";
    pub const LOG_FILES: &str = "logFiles";
    pub const KEY: &str = "key";
    pub const ALIVE: &str = "alive";
    pub const BASIC: &str = "basic";
    pub const AUTH: &str = "auth";

    // Authenticated capability.
    pub const NODES: &str = "nodes";
    pub const SUBSCRIBE_NODES: &str = "subscribeNodes";

    // Client-exported subscriber.
    pub const NODES_UPDATE: &str = "nodesUpdate";
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handshake payloads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Daemon build information returned by `version()`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    #[serde(default)]
    pub buildtime: String,
    #[serde(default)]
    pub serverarch: String,
    #[serde(default)]
    pub compilerversion: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionReply {
    pub version: VersionInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdReply {
    pub id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameReply {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogFilesReply {
    pub paths: Vec<String>,
}

/// Locations of the key files, one per authentication level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyInfo {
    pub basic_key_path: String,
    pub auth_key_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyReply {
    pub key: KeyInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AliveReply {
    pub alive: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Authentication
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Identity record sent with every authentication request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    #[serde(rename = "type")]
    pub node_type: String,
    pub name: String,
    pub serial: String,
    /// Numeric id obtained from the daemon's `id()` call.
    pub id: u64,
}

/// Parameters of `basic()` / `auth()`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthRequest {
    pub key: String,
    pub info: ClientInfo,
}

impl fmt::Debug for AuthRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthRequest")
            .field("key", &"<redacted>")
            .field("info", &self.info)
            .finish()
    }
}

/// Result of a successful authentication: the second-level capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthReply {
    pub port: CapRef,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Nodes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeType {
    HidioDaemon,
    HidioApi,
    UsbKeyboard,
    BleKeyboard,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeType::HidioDaemon => "HidioDaemon",
            NodeType::HidioApi => "HidioApi",
            NodeType::UsbKeyboard => "UsbKeyboard",
            NodeType::BleKeyboard => "BleKeyboard",
            NodeType::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// A server-managed resource as reported by the daemon.
///
/// Only the identifying fields are typed; anything else the daemon sends is
/// kept verbatim in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub id: u64,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub serial: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub type NodeList = Vec<NodeDescriptor>;

/// Reply of `nodes()` and parameters of `nodesUpdate()`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodesPayload {
    pub nodes: NodeList,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeNodesParams {
    pub subscriber: CapRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeNodesReply {
    pub subscription: CapRef,
}

/// One-line summary of a node: `<id> <type>: <name> (<serial>)`.
pub fn format_node(node: &NodeDescriptor) -> String {
    format!(
        "{} {}: {} ({})",
        node.id, node.node_type, node.name, node.serial
    )
}
