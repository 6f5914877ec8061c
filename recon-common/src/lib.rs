//! Shared types for the reconciliation gateway
//!
//! Error taxonomy, TOML configuration and time helpers used by every
//! crate in the workspace.

pub mod config;
pub mod error;
pub mod time;

pub use config::GatewayConfig;
pub use error::{Error, Result};
