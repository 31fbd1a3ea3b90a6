//! `corelink-rpc`: a small symmetric capability RPC engine.
//!
//! The engine owns no socket. [`RpcSystem::new`] hands back a byte port
//! (an in-memory duplex stream); whoever owns the real transport pumps
//! bytes between it and the port. Everything above the port is typed:
//!
//! ```text
//!   transport <──bytes──> port <══ RpcSystem ══> RemoteCapability / Capability
//! ```
//!
//! Both peers export capabilities. The serving side exports its bootstrap
//! capability as id 0; the other side reaches it via [`RpcSystem::bootstrap`].
//! Calls on a [`Promise::pipeline`] capability are sent immediately and
//! resolved by the peer once the promised answer is available.

pub mod capability;
pub mod error;
pub mod system;

pub use capability::{Capability, Promise, RemoteCapability};
pub use error::RpcError;
pub use system::{RpcSystem, Side};
