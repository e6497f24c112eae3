//! # Reconciler
//!
//! Core reconciliation logic for `AzureKeyVaultSecret` bindings and the CA bundle.
//!
//! The reconciler:
//! - Deletes the destination of bindings that were removed
//! - Checks each binding against Key Vault when the poll scheduler says it is due
//! - Writes the destination `Secret` only when the object version changed
//! - Keeps the CA bundle `ConfigMap` in labelled namespaces current
//! - Feeds every outcome back into the poll scheduler and the work queue

mod ca_bundle;
mod reconcile;
pub mod types;

pub use types::{CaBundleSettings, ReconcileOutcome, Reconciler, ReconcilerError};
