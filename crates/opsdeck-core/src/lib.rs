//! opsdeck-core -- configuration and shared error types for the opsdeck
//! workspace.

pub mod config;
pub mod error;

pub use config::OpsdeckConfig;
pub use error::{OpsdeckError, Result};
