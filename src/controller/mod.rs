//! # Controller
//!
//! Core controller modules for the Azure Key Vault Controller.
//!
//! - `backoff`: exponential retry delays
//! - `binding`: binding index and work queue keys
//! - `encoding`: vault material to `Secret` data
//! - `events`: Kubernetes event sink
//! - `queue`: deduplicating delayed work queue with bounded requeues
//! - `reconciler`: core reconciliation logic
//! - `scheduler`: Normal/Slow poll scheduler
//! - `server`: HTTP server for metrics and health checks
//! - `validation`: name checks for bindings

pub mod backoff;
pub mod binding;
pub mod encoding;
pub mod events;
pub mod queue;
pub mod reconciler;
pub mod scheduler;
pub mod server;
pub mod validation;
