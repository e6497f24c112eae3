//! # Events
//!
//! Kubernetes events attached to `AzureKeyVaultSecret` resources.
//!
//! Only failures the user has to act on are published: dropped keys, authorization
//! failures, invalid bindings and destination renames. Routine success is not.

use crate::constants::CONTROLLER_NAME;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::Client;
use kube_runtime::events::{Event, EventType, Recorder, Reporter};
use tracing::warn;

/// Action names reported with events
pub mod actions {
    pub const RECONCILE: &str = "Reconcile";
    pub const SYNC: &str = "Sync";
}

/// Publishes events; failures to publish are logged, never propagated
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(
        &self,
        object_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// [`EventSink`] backed by the `events.k8s.io` API
pub struct KubeEventRecorder {
    recorder: Recorder,
}

impl std::fmt::Debug for KubeEventRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeEventRecorder").finish_non_exhaustive()
    }
}

impl KubeEventRecorder {
    /// `instance` is usually the pod name
    #[must_use]
    pub fn new(client: Client, instance: Option<String>) -> Self {
        let reporter = Reporter {
            controller: CONTROLLER_NAME.to_string(),
            instance,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventSink for KubeEventRecorder {
    async fn publish(
        &self,
        object_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, object_ref).await {
            warn!(
                "Failed to publish {} event for {}/{}: {}",
                reason,
                object_ref.namespace.as_deref().unwrap_or_default(),
                object_ref.name.as_deref().unwrap_or_default(),
                e
            );
        }
    }
}
