//! # Watch Loop
//!
//! Watches that feed the work queue:
//!
//! - `AzureKeyVaultSecret` in all namespaces: updates the binding index and enqueues the key
//! - the CA source secret: enqueues the CA bundle key
//! - namespaces carrying the injection label: enqueues the CA bundle key
//! - a resync timer: re-enqueues every live binding so the poll scheduler can check it
//!
//! Watch-driven enqueues are fresh (they reset the requeue counter); the timer's are not.

use crate::controller::binding::{QueueKey, TrackedBinding};
use crate::controller::reconciler::Reconciler;
use crate::crd::AzureKeyVaultSecret;
use crate::observability::metrics;
use futures::{pin_mut, StreamExt};
use k8s_openapi::api::core::v1::{Namespace, Secret};
use kube::api::Api;
use kube::Client;
use kube_runtime::watcher;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Apply one binding watch event to the index and the queue
///
/// `relist` buffers the objects of an initial list until it is complete, so bindings
/// deleted while the watch was down are detected.
pub fn handle_binding_event(
    reconciler: &Reconciler,
    relist: &mut Vec<TrackedBinding>,
    event: watcher::Event<AzureKeyVaultSecret>,
) {
    match event {
        watcher::Event::Apply(resource) => {
            if let Some(binding) = TrackedBinding::from_resource(&resource) {
                let key = reconciler.bindings.upsert(binding);
                debug!("Binding {} applied", key);
                reconciler.queue.enqueue(QueueKey::Binding(key));
            }
        }
        watcher::Event::Delete(resource) => {
            if let Some(binding) = TrackedBinding::from_resource(&resource) {
                let key = binding.key;
                if reconciler.bindings.remove(&key) {
                    info!("Binding {} deleted", key);
                    reconciler.queue.enqueue(QueueKey::Binding(key));
                }
            }
        }
        watcher::Event::Init => relist.clear(),
        watcher::Event::InitApply(resource) => {
            if let Some(binding) = TrackedBinding::from_resource(&resource) {
                relist.push(binding);
            }
        }
        watcher::Event::InitDone => {
            let removed = reconciler.bindings.replace_all(std::mem::take(relist));
            for key in reconciler.bindings.keys().into_iter().chain(removed) {
                reconciler.queue.enqueue(QueueKey::Binding(key));
            }
            info!("Tracking {} bindings", reconciler.bindings.len());
        }
    }
    metrics::set_bindings_tracked(reconciler.bindings.len());
}

/// Watch `AzureKeyVaultSecret` resources in all namespaces
pub fn start_binding_watch(
    client: Client,
    reconciler: Arc<Reconciler>,
    restart_delay: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let bindings: Api<AzureKeyVaultSecret> = Api::all(client);
        let mut relist = Vec::new();
        loop {
            info!("Starting AzureKeyVaultSecret watch");
            let stream = watcher(bindings.clone(), watcher::Config::default());
            pin_mut!(stream);
            while let Some(event) = stream.next().await {
                match event {
                    Ok(event) => handle_binding_event(&reconciler, &mut relist, event),
                    Err(e) => {
                        warn!(
                            "AzureKeyVaultSecret watch error, retrying in {:?}: {}",
                            restart_delay, e
                        );
                        tokio::time::sleep(restart_delay).await;
                    }
                }
            }
            warn!(
                "AzureKeyVaultSecret watch stream ended, restarting in {:?}",
                restart_delay
            );
            tokio::time::sleep(restart_delay).await;
        }
    })
}

/// Watch the CA source secret; any change re-syncs the CA bundle
pub fn start_ca_source_watch(
    client: Client,
    reconciler: Arc<Reconciler>,
    restart_delay: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let settings = reconciler.ca_bundle.clone();
        let secrets: Api<Secret> = Api::namespaced(client, &settings.source_namespace);
        let watcher_config = watcher::Config::default()
            .fields(&format!("metadata.name={}", settings.source_secret));
        watch_for_ca_bundle(
            "CA source secret",
            secrets,
            watcher_config,
            &reconciler,
            restart_delay,
        )
        .await;
    })
}

/// Watch namespaces carrying the injection label; label changes re-sync the CA bundle
pub fn start_namespace_watch(
    client: Client,
    reconciler: Arc<Reconciler>,
    restart_delay: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let namespaces: Api<Namespace> = Api::all(client);
        // Existence selector: a namespace whose label is removed or changed still produces an event
        let watcher_config = watcher::Config::default().labels(&reconciler.ca_bundle.namespace_label);
        watch_for_ca_bundle(
            "labelled namespace",
            namespaces,
            watcher_config,
            &reconciler,
            restart_delay,
        )
        .await;
    })
}

async fn watch_for_ca_bundle<K>(
    what: &str,
    api: Api<K>,
    watcher_config: watcher::Config,
    reconciler: &Reconciler,
    restart_delay: Duration,
) where
    K: kube::Resource + Clone + std::fmt::Debug + serde::de::DeserializeOwned + Send + 'static,
{
    loop {
        info!("Starting {} watch", what);
        let stream = watcher(api.clone(), watcher_config.clone());
        pin_mut!(stream);
        while let Some(event) = stream.next().await {
            match event {
                Ok(watcher::Event::Apply(_) | watcher::Event::Delete(_) | watcher::Event::InitDone) => {
                    debug!("{} changed, queueing CA bundle", what);
                    reconciler.queue.enqueue(QueueKey::CaBundle);
                }
                Ok(watcher::Event::Init | watcher::Event::InitApply(_)) => {}
                Err(e) => {
                    warn!("{} watch error, retrying in {:?}: {}", what, restart_delay, e);
                    tokio::time::sleep(restart_delay).await;
                }
            }
        }
        warn!("{} watch stream ended, restarting in {:?}", what, restart_delay);
        tokio::time::sleep(restart_delay).await;
    }
}

/// Re-enqueue every live binding and the CA bundle on a fixed interval
///
/// Timer enqueues keep requeue counters and skip keys dropped in the current failure
/// episode. The timer stops once the queue shuts down.
pub fn start_resync_timer(reconciler: Arc<Reconciler>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; the watches already enqueue everything at startup
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if reconciler.queue.is_shutting_down() {
                break;
            }
            resync(&reconciler);
        }
    })
}

/// One resync pass
pub fn resync(reconciler: &Reconciler) {
    let keys = reconciler.bindings.keys();
    debug!("Resync: re-enqueueing {} bindings", keys.len());
    metrics::set_bindings_tracked(keys.len());
    for key in keys {
        reconciler.queue.enqueue_periodic(QueueKey::Binding(key));
    }
    reconciler.queue.enqueue_periodic(QueueKey::CaBundle);
}
