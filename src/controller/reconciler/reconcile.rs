//! # Reconciliation Logic
//!
//! Per-key reconciliation of `AzureKeyVaultSecret` bindings.
//!
//! 1. Resolve the binding. A binding that is gone has its owned destination deleted.
//! 2. Ask the poll scheduler whether the binding is due; skip without side effects if not.
//! 3. Fetch the object from Key Vault.
//! 4. Compare the fetched version with the last applied one (or, after a restart, the
//!    version recorded on the destination).
//! 5. Render and create or replace the destination. A conflict is retried once.
//! 6. Feed the outcome to the scheduler and the queue.

use super::types::{ReconcileOutcome, Reconciler, ReconcilerError};
use crate::cluster::ClusterError;
use crate::constants::{annotations, reasons, CONTROLLER_NAME};
use crate::controller::binding::{BindingKey, QueueKey, TrackedBinding};
use crate::controller::encoding::OutputEncoding;
use crate::controller::events::actions;
use crate::controller::queue::RequeueDecision;
use crate::observability::metrics;
use crate::provider::{ObjectRequest, VaultError};
use k8s_openapi::api::core::v1::{ObjectReference, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube_runtime::events::EventType;
use std::collections::BTreeMap;
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

impl Reconciler {
    /// Reconcile one queue key and feed the outcome back into the scheduler and queue
    ///
    /// The caller owns the processing mark and must call `queue.done(key)` afterwards.
    /// Errors are returned for inspection; retries have already been scheduled.
    pub async fn process(&self, key: &QueueKey) -> Result<ReconcileOutcome, ReconcilerError> {
        let span = info_span!("reconcile", resource.key = %key);
        async {
            let start = std::time::Instant::now();
            let result = match key {
                QueueKey::Binding(binding_key) => self.process_binding(binding_key).await,
                QueueKey::CaBundle => self.process_ca_bundle().await,
            };
            match &result {
                Ok(ReconcileOutcome::Skipped) => metrics::increment_reconciliation_skips(),
                Ok(outcome) => {
                    metrics::increment_reconciliations();
                    metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());
                    debug!("Reconciled {} ({})", key, outcome.as_str());
                }
                Err(e) => {
                    metrics::increment_reconciliations();
                    metrics::increment_reconciliation_errors(e.kind());
                    metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn process_binding(&self, key: &BindingKey) -> Result<ReconcileOutcome, ReconcilerError> {
        let queue_key = QueueKey::Binding(key.clone());

        let Some(binding) = self.bindings.get(key) else {
            let object_ref = self.bindings.tombstone(key).map(|t| t.object_ref);
            return match self.remove_destination(key).await {
                Ok(outcome) => {
                    self.scheduler.forget(key);
                    self.bindings.clear_tombstone(key);
                    self.queue.forget(&queue_key);
                    Ok(outcome)
                }
                Err(e) => {
                    self.report_failure(&queue_key, object_ref.as_ref(), &e).await;
                    Err(e)
                }
            };
        };

        let now = Instant::now();
        if self
            .scheduler
            .observe_generation(key, binding.generation, now)
        {
            info!(
                "Binding {} changed (generation {:?}), checking the vault now",
                key, binding.generation
            );
        }
        if !self.scheduler.is_due(key, now) {
            debug!("Binding {} is not due yet", key);
            return Ok(ReconcileOutcome::Skipped);
        }

        match self.sync_binding(&binding).await {
            Ok(outcome) => {
                self.scheduler.record_outcome(key, true, Instant::now());
                self.queue.forget(&queue_key);
                Ok(outcome)
            }
            Err(e) => {
                self.scheduler.record_outcome(key, false, Instant::now());
                self.report_failure(&queue_key, Some(&binding.object_ref), &e)
                    .await;
                Err(e)
            }
        }
    }

    async fn sync_binding(
        &self,
        binding: &TrackedBinding,
    ) -> Result<ReconcileOutcome, ReconcilerError> {
        let key = &binding.key;
        let encoding = OutputEncoding::for_binding(&binding.spec)
            .map_err(|e| ReconcilerError::InvalidBinding(e.to_string()))?;

        let object = &binding.spec.vault.object;
        let request = ObjectRequest {
            vault_name: binding.spec.vault.name.clone(),
            object_name: object.name.clone(),
            object_type: object.object_type,
            version: object.version.clone(),
        };
        let fetched = self.vault.fetch(&request).await?;

        let applied = self.scheduler.last_applied_version(key);
        if applied.as_deref() == Some(fetched.version.as_str()) {
            debug!("{} unchanged at version {}", request, fetched.version);
            return Ok(ReconcileOutcome::Unchanged);
        }

        let namespace = key.namespace.as_str();
        let destination = binding.destination();
        let existing = self.cluster.get_secret(namespace, destination).await?;
        if let Some(existing) = &existing {
            check_ownership(existing, key)?;
            if applied.is_none() && is_current(existing, binding, &fetched.version) {
                debug!(
                    "Secret {}/{} already holds version {}",
                    namespace, destination, fetched.version
                );
                self.record_applied(binding, &fetched.version).await;
                return Ok(ReconcileOutcome::Unchanged);
            }
        }

        let data = encoding.render(&fetched.material)?;
        let desired = desired_secret(
            binding,
            encoding.secret_type(&binding.spec),
            data,
            &fetched.version,
        );
        let outcome = self.apply_secret(key, &desired, existing).await?;
        metrics::increment_secret_writes(outcome.as_str());
        info!(
            "Secret {}/{} {} from {} at version {}",
            namespace,
            destination,
            outcome.as_str(),
            request,
            fetched.version
        );

        self.record_applied(binding, &fetched.version).await;
        Ok(outcome)
    }

    async fn record_applied(&self, binding: &TrackedBinding, version: &str) {
        let key = &binding.key;
        let now = Instant::now();
        if let Some(previous) = self.scheduler.destination(key) {
            if previous != binding.destination() {
                warn!(
                    "Binding {} now writes secret {} instead of {}; {} is no longer managed",
                    key,
                    binding.destination(),
                    previous,
                    previous
                );
                self.events
                    .publish(
                        &binding.object_ref,
                        EventType::Warning,
                        reasons::DESTINATION_CHANGED,
                        actions::SYNC,
                        Some(format!(
                            "Destination changed from {previous} to {}; {previous} was left in place",
                            binding.destination()
                        )),
                    )
                    .await;
            }
        }
        self.scheduler.set_applied_version(key, version, now);
        self.scheduler.set_destination(key, binding.destination(), now);
    }

    /// Create or replace, retrying once on a write conflict with a fresh read
    ///
    /// The fresh read goes through the same ownership check as the first one; another
    /// binding may have claimed the name in between.
    async fn apply_secret(
        &self,
        key: &BindingKey,
        desired: &Secret,
        existing: Option<Secret>,
    ) -> Result<ReconcileOutcome, ReconcilerError> {
        let namespace = key.namespace.as_str();
        match self.write_secret(namespace, desired, existing).await {
            Err(ClusterError::Conflict(target)) => {
                debug!("Conflict writing {}, retrying with a fresh read", target);
                let name = desired.metadata.name.as_deref().unwrap_or_default();
                let current = self.cluster.get_secret(namespace, name).await?;
                if let Some(current) = &current {
                    check_ownership(current, key)?;
                }
                Ok(self.write_secret(namespace, desired, current).await?)
            }
            other => Ok(other?),
        }
    }

    async fn write_secret(
        &self,
        namespace: &str,
        desired: &Secret,
        existing: Option<Secret>,
    ) -> Result<ReconcileOutcome, ClusterError> {
        match existing {
            None => {
                self.cluster.create_secret(namespace, desired).await?;
                Ok(ReconcileOutcome::Created)
            }
            Some(current) => {
                let merged = merge_secret(current, desired);
                self.cluster.replace_secret(namespace, &merged).await?;
                Ok(ReconcileOutcome::Updated)
            }
        }
    }

    /// Delete the destination of a binding that no longer exists, if this binding owns it
    async fn remove_destination(&self, key: &BindingKey) -> Result<ReconcileOutcome, ReconcilerError> {
        let destination = self
            .bindings
            .tombstone(key)
            .map(|t| t.destination)
            .or_else(|| self.scheduler.destination(key));
        let Some(destination) = destination else {
            debug!("Binding {} is gone and never had a destination", key);
            return Ok(ReconcileOutcome::NothingToDelete);
        };

        let Some(existing) = self.cluster.get_secret(&key.namespace, &destination).await? else {
            return Ok(ReconcileOutcome::NothingToDelete);
        };
        if annotation(&existing, annotations::BINDING) != Some(key.to_string().as_str()) {
            info!(
                "Secret {}/{} is not owned by deleted binding {}, leaving it",
                key.namespace, destination, key
            );
            return Ok(ReconcileOutcome::NothingToDelete);
        }

        if self.cluster.delete_secret(&key.namespace, &destination).await? {
            metrics::increment_secret_writes(ReconcileOutcome::Deleted.as_str());
            info!(
                "Deleted secret {}/{} of removed binding {}",
                key.namespace, destination, key
            );
            Ok(ReconcileOutcome::Deleted)
        } else {
            Ok(ReconcileOutcome::NothingToDelete)
        }
    }

    /// Publish failure events and schedule a retry, or drop the key
    pub(super) async fn report_failure(
        &self,
        queue_key: &QueueKey,
        object_ref: Option<&ObjectReference>,
        error: &ReconcilerError,
    ) {
        warn!("Reconciliation of {} failed: {}", queue_key, error);

        let reason = match error {
            ReconcilerError::Vault(VaultError::Auth { .. }) => Some(reasons::AUTHORIZATION_FAILED),
            ReconcilerError::InvalidBinding(_) => Some(reasons::INVALID_BINDING),
            _ => None,
        };
        if let (Some(object_ref), Some(reason)) = (object_ref, reason) {
            self.events
                .publish(
                    object_ref,
                    EventType::Warning,
                    reason,
                    actions::RECONCILE,
                    Some(error.to_string()),
                )
                .await;
        }

        match self.queue.requeue_with_backoff(queue_key) {
            RequeueDecision::Requeued(delay) => {
                metrics::increment_requeues();
                debug!("Retrying {} in {:?}", queue_key, delay);
            }
            RequeueDecision::Dropped => {
                metrics::increment_keys_dropped();
                error!(
                    "Giving up on {} after repeated failures; waiting for the next change: {}",
                    queue_key, error
                );
                if let Some(object_ref) = object_ref {
                    self.events
                        .publish(
                            object_ref,
                            EventType::Warning,
                            reasons::MAX_NUM_REQUEUES_EXCEEDED,
                            actions::RECONCILE,
                            Some(format!(
                                "Stopped retrying after repeated failures, last error: {error}"
                            )),
                        )
                        .await;
                }
            }
        }
    }
}

fn annotation<'a>(secret: &'a Secret, name: &str) -> Option<&'a str> {
    secret
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(name))
        .map(String::as_str)
}

/// A destination claimed by another binding is never overwritten
fn check_ownership(secret: &Secret, key: &BindingKey) -> Result<(), ReconcilerError> {
    match annotation(secret, annotations::BINDING) {
        Some(owner) if owner != key.to_string() => Err(ReconcilerError::InvalidBinding(format!(
            "secret {}/{} is managed by binding {owner}",
            key.namespace,
            secret.metadata.name.as_deref().unwrap_or_default()
        ))),
        _ => Ok(()),
    }
}

/// Whether the destination was written by this binding, at this generation and version
fn is_current(secret: &Secret, binding: &TrackedBinding, version: &str) -> bool {
    annotation(secret, annotations::BINDING) == Some(binding.key.to_string().as_str())
        && annotation(secret, annotations::OBJECT_VERSION) == Some(version)
        && annotation(secret, annotations::BINDING_GENERATION)
            == Some(generation_label(binding.generation).as_str())
}

fn generation_label(generation: Option<i64>) -> String {
    generation.map(|g| g.to_string()).unwrap_or_default()
}

fn desired_secret(
    binding: &TrackedBinding,
    secret_type: String,
    data: BTreeMap<String, ByteString>,
    version: &str,
) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(binding.destination().to_string()),
            namespace: Some(binding.key.namespace.clone()),
            labels: Some(BTreeMap::from([(
                annotations::MANAGED_BY.to_string(),
                CONTROLLER_NAME.to_string(),
            )])),
            annotations: Some(BTreeMap::from([
                (annotations::BINDING.to_string(), binding.key.to_string()),
                (annotations::OBJECT_VERSION.to_string(), version.to_string()),
                (
                    annotations::BINDING_GENERATION.to_string(),
                    generation_label(binding.generation),
                ),
            ])),
            ..ObjectMeta::default()
        },
        type_: Some(secret_type),
        data: Some(data),
        ..Secret::default()
    }
}

/// Desired content on top of the live object; foreign labels and annotations are kept
fn merge_secret(current: Secret, desired: &Secret) -> Secret {
    let mut metadata = current.metadata;
    metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .extend(desired.metadata.labels.clone().unwrap_or_default());
    metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .extend(desired.metadata.annotations.clone().unwrap_or_default());
    Secret {
        metadata,
        type_: desired.type_.clone(),
        data: desired.data.clone(),
        ..Secret::default()
    }
}
