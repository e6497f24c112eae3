//! # Azure Key Vault Controller
//!
//! A Kubernetes controller that syncs Azure Key Vault secrets, keys and certificates into
//! Kubernetes Secrets.
//!
//! ## Overview
//!
//! 1. **Watching bindings** - `AzureKeyVaultSecret` resources in all namespaces
//! 2. **Polling Key Vault** - each binding is checked every normal interval, backing off to
//!    the slow interval after repeated failures
//! 3. **Writing secrets** - the destination `Secret` is written only when the object version changes
//! 4. **CA bundle** - the CA certificate is copied into every namespace labelled for env injection
//!
//! Configuration comes from environment variables (see `ControllerConfig`) plus the
//! `--kubeconfig`, `--context` and `--cloudconfig` flags.

use anyhow::Result;
use azure_keyvault_controller::config::Cli;
use azure_keyvault_controller::runtime;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    runtime::run(cli).await
}
