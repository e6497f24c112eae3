//! # Configuration
//!
//! Controller configuration consumed at startup.
//!
//! - `controller`: settings loaded from environment variables
//! - `cli`: bootstrap flags (kubeconfig, cloud config path)
//!
//! Configuration is read once; changes require a pod restart.

mod cli;
mod controller;

pub use cli::Cli;
pub use controller::ControllerConfig;

use thiserror::Error;

/// Fatal configuration problem detected at startup
///
/// Raised by config loading and credential resolution. A misconfigured identity is an
/// operator error, so nothing that returns this is retried.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("required environment variable {0} is not set")]
    MissingVariable(String),

    #[error("environment variable {name} has invalid value: {reason}")]
    InvalidVariable { name: String, reason: String },

    #[error("failed to read cloud config {path}: {source}")]
    CloudConfigUnreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse cloud config {path}: {reason}")]
    CloudConfigUnparseable { path: String, reason: String },

    #[error("incomplete Azure identity: {0}")]
    IncompleteIdentity(String),
}
