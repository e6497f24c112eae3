//! # Workers
//!
//! Fixed pool of reconciliation workers pulling from the shared queue, and the shutdown
//! sequence that drains them.

use crate::controller::reconciler::Reconciler;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Spawn `count` workers; each exits once the queue is shut down
pub fn spawn_workers(reconciler: &Arc<Reconciler>, count: usize) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|id| tokio::spawn(run_worker(id, Arc::clone(reconciler))))
        .collect()
}

async fn run_worker(id: usize, reconciler: Arc<Reconciler>) {
    debug!("Worker {} started", id);
    while let Some(key) = reconciler.queue.next().await {
        // Outcomes and retries are handled inside process()
        let _ = reconciler.process(&key).await;
        reconciler.queue.done(&key);
    }
    debug!("Worker {} stopped", id);
}

/// Shut the queue down and give in-flight reconciliations `grace` to finish
///
/// Returns `true` if every worker exited in time.
pub async fn drain(reconciler: &Reconciler, workers: Vec<JoinHandle<()>>, grace: Duration) -> bool {
    reconciler.queue.shut_down();
    match tokio::time::timeout(grace, futures::future::join_all(workers)).await {
        Ok(_) => {
            info!("All workers finished");
            true
        }
        Err(_) => {
            warn!(
                "Shutdown grace period of {:?} elapsed with reconciliations still in flight",
                grace
            );
            false
        }
    }
}

/// Wait for SIGINT or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT, initiating graceful shutdown..."),
        () = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}
