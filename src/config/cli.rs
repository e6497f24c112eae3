//! # Command Line
//!
//! Bootstrap flags. Everything else is read from the environment by
//! [`ControllerConfig`](super::ControllerConfig).

use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "azure-keyvault-controller",
    version,
    about = "Syncs Azure Key Vault secrets, keys and certificates into Kubernetes Secrets"
)]
pub struct Cli {
    /// Path to a kubeconfig. Only required if out-of-cluster and `KUBECONFIG` is not set.
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use instead of the current one.
    #[arg(long)]
    pub context: Option<String>,

    /// Path to the Azure cloud config. Overrides CLOUDCONFIG.
    #[arg(long)]
    pub cloudconfig: Option<PathBuf>,
}
