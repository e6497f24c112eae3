//! Azure Key Vault Controller Library
//!
//! Keeps Kubernetes `Secret` objects in sync with secrets, keys and certificates held in
//! Azure Key Vault, and maintains the CA bundle `ConfigMap` used by the env-injection
//! webhook.
//!
//! ## Quick Start
//!
//! ```rust
//! use azure_keyvault_controller::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific imports,
//! use the individual modules.

pub mod cluster;
pub mod config;
pub mod constants;
pub mod controller;
pub mod credentials;
pub mod crd;
pub mod observability;
pub mod prelude;
pub mod provider;
pub mod runtime;
