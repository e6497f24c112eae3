//! # Initialization
//!
//! Controller initialization: rustls setup, configuration, tracing, metrics, server
//! startup, Kubernetes client, credential resolution and the reconciler context.
//!
//! Any failure here is fatal. Credential resolution in particular is never retried.

use crate::cluster::KubeClusterApi;
use crate::config::{Cli, ControllerConfig};
use crate::controller::events::KubeEventRecorder;
use crate::controller::reconciler::Reconciler;
use crate::controller::server::{start_server, ServerState};
use crate::credentials::CredentialSource;
use crate::observability::logging::{init_tracing, LogFormat};
use crate::observability::metrics;
use crate::provider::azure::KeyVaultClient;
use anyhow::{Context, Result};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Client;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Everything the watch loop and the workers need
pub struct InitializationResult {
    pub client: Client,
    pub config: ControllerConfig,
    pub reconciler: Arc<Reconciler>,
    pub server_state: Arc<ServerState>,
    pub server_handle: JoinHandle<()>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("config", &self.config)
            .field("server_ready", &self.server_state.is_ready())
            .finish_non_exhaustive()
    }
}

/// Initialize the controller runtime
///
/// # Errors
/// Returns an error for invalid configuration, unresolvable credentials, or when the
/// Kubernetes client or HTTP server cannot be set up.
pub async fn initialize(cli: Cli) -> Result<InitializationResult> {
    // Required for rustls 0.23+ when no default provider is set via features
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        debug!("rustls crypto provider already installed");
    }

    let mut config = ControllerConfig::from_env().context("Invalid controller configuration")?;
    if let Some(path) = cli.cloudconfig.clone() {
        config.cloud_config_path = path;
    }

    init_tracing(LogFormat::parse(&config.log_format))?;

    info!("Starting Azure Key Vault Controller v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Build info: datetime={}, git_hash={}",
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );
    info!(
        "Poll intervals: normal={:?}, slow={:?} after {} failures; max requeues={}, workers={}",
        config.normal_poll_interval,
        config.slow_poll_interval,
        config.max_failures_before_slowing_down,
        config.max_num_requeues,
        config.num_threads
    );

    metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::default());
    let server_port = config.metrics_port;
    let server_state_clone = Arc::clone(&server_state);
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });

    let client = kube_client(&cli).await?;

    let source = CredentialSource::select(config.custom_auth, config.cloud_config_path.clone());
    let credentials = source
        .resolve()
        .context("Failed to resolve Azure credentials")?;
    info!(
        "Authenticating to Key Vault ({:?} cloud) with a {}",
        credentials.cloud,
        credentials.identity.kind()
    );
    let vault = KeyVaultClient::new(Arc::new(credentials))
        .context("Failed to create Key Vault client")?;

    let events = KubeEventRecorder::new(client.clone(), std::env::var("POD_NAME").ok());
    let reconciler = Arc::new(Reconciler::new(
        Arc::new(KubeClusterApi::new(client.clone())),
        Arc::new(vault),
        Arc::new(events),
        &config,
    ));

    info!("Controller initialized, starting watch loop...");

    Ok(InitializationResult {
        client,
        config,
        reconciler,
        server_state,
        server_handle,
    })
}

/// In-cluster config, `KUBECONFIG`, or the kubeconfig and context named on the command line
async fn kube_client(cli: &Cli) -> Result<Client> {
    let config = if cli.kubeconfig.is_none() && cli.context.is_none() {
        kube::Config::infer()
            .await
            .context("Failed to infer Kubernetes configuration")?
    } else {
        let options = KubeConfigOptions {
            context: cli.context.clone(),
            ..KubeConfigOptions::default()
        };
        match &cli.kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path)
                    .with_context(|| format!("Failed to read kubeconfig {}", path.display()))?;
                kube::Config::from_custom_kubeconfig(kubeconfig, &options)
                    .await
                    .context("Failed to load kubeconfig")?
            }
            None => kube::Config::from_kubeconfig(&options)
                .await
                .context("Failed to load kubeconfig")?,
        }
    };
    Client::try_from(config).context("Failed to create Kubernetes client")
}
