//! Shared configuration, error and trace-event types for corelink crates.

pub mod config;
pub mod error;
pub mod trace;

pub use error::{Error, Result};
