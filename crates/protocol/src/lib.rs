//! corelink protocol: RPC wire messages and the daemon's method payloads.
//!
//! The wire is newline-delimited JSON. Every line is one [`RpcMessage`].
//! Capabilities travel inside payloads as `{"$cap": <export id>}` and are
//! resolved against the sender's export table.

pub mod daemon;
pub mod wire;

pub use daemon::{
    format_node, AuthReply, AuthRequest, ClientInfo, KeyInfo, NodeDescriptor, NodeList, NodeType,
    VersionInfo,
};
pub use wire::{CapRef, FaultKind, RpcFault, RpcMessage, Target, BOOTSTRAP_CAP, MAX_MESSAGE_BYTES};
