//! # Runtime
//!
//! Process lifecycle: initialization, watches, the worker pool and graceful shutdown.

pub mod initialization;
pub mod watch_loop;
pub mod workers;

use crate::config::Cli;
use anyhow::Result;
use initialization::{initialize, InitializationResult};
use std::sync::Arc;
use tracing::info;

/// Run the controller until SIGINT or SIGTERM
///
/// # Errors
/// Returns an error if initialization fails.
pub async fn run(cli: Cli) -> Result<()> {
    let InitializationResult {
        client,
        config,
        reconciler,
        server_state,
        server_handle,
    } = initialize(cli).await?;

    let restart_delay = config.watch_restart_delay;
    let watches = [
        watch_loop::start_binding_watch(client.clone(), Arc::clone(&reconciler), restart_delay),
        watch_loop::start_ca_source_watch(client.clone(), Arc::clone(&reconciler), restart_delay),
        watch_loop::start_namespace_watch(client, Arc::clone(&reconciler), restart_delay),
        watch_loop::start_resync_timer(Arc::clone(&reconciler), config.resync_interval),
    ];
    let workers = workers::spawn_workers(&reconciler, config.num_threads);
    server_state.set_ready(true);
    info!("Controller running with {} workers", config.num_threads);

    workers::shutdown_signal().await;

    server_state.set_ready(false);
    for watch in &watches {
        watch.abort();
    }
    workers::drain(&reconciler, workers, config.shutdown_grace_period).await;
    server_handle.abort();

    info!("Controller stopped gracefully");
    Ok(())
}
