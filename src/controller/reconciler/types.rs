//! # Types
//!
//! Core types for the reconciler.

use crate::cluster::{ClusterApi, ClusterError};
use crate::config::ControllerConfig;
use crate::controller::backoff::ExponentialBackoff;
use crate::controller::binding::{BindingIndex, BindingKey, QueueKey};
use crate::controller::encoding::EncodingError;
use crate::controller::events::EventSink;
use crate::controller::queue::WorkQueue;
use crate::controller::scheduler::PollScheduler;
use crate::provider::{VaultError, VaultService};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error(transparent)]
    Vault(#[from] VaultError),
    #[error(transparent)]
    Cluster(#[from] ClusterError),
    #[error("invalid binding: {0}")]
    InvalidBinding(String),
    #[error("cannot encode vault material: {0}")]
    Encoding(#[from] EncodingError),
    #[error("CA source secret {0} not found")]
    CaSourceMissing(String),
    #[error("CA source secret {secret} has no usable '{key}' entry")]
    CaSourceIncomplete { secret: String, key: String },
}

impl ReconcilerError {
    /// Short label for metrics
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Vault(VaultError::Auth { .. }) => "auth",
            Self::Vault(VaultError::NotFound { .. }) => "upstream_not_found",
            Self::Vault(VaultError::Transient { .. }) | Self::Cluster(_) => "transient",
            Self::InvalidBinding(_) => "invalid_binding",
            Self::Encoding(_) => "encoding",
            Self::CaSourceMissing(_) | Self::CaSourceIncomplete { .. } => "ca_source",
        }
    }
}

/// What a successful pass did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Not due yet; nothing was called
    Skipped,
    /// Vault version already applied
    Unchanged,
    Created,
    Updated,
    /// The destination of a deleted binding was removed
    Deleted,
    /// Deleted binding with no owned destination left
    NothingToDelete,
    /// CA bundle written to this many namespaces and removed from this many
    CaBundleSynced { written: usize, removed: usize },
}

impl ReconcileOutcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::Unchanged => "unchanged",
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
            Self::NothingToDelete => "nothing-to-delete",
            Self::CaBundleSynced { .. } => "ca-bundle-synced",
        }
    }
}

/// Where the CA bundle comes from and where it goes
#[derive(Debug, Clone)]
pub struct CaBundleSettings {
    pub config_map_name: String,
    pub namespace_label: String,
    pub source_secret: String,
    pub source_namespace: String,
}

impl From<&ControllerConfig> for CaBundleSettings {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            config_map_name: config.ca_config_map_name.clone(),
            namespace_label: config.akv_label_name.clone(),
            source_secret: config.akv_secret_name.clone(),
            source_namespace: config.akv_namespace.clone(),
        }
    }
}

/// Shared reconciliation context
///
/// One instance is shared by the watch loop and every worker. The queue guarantees that
/// a key is processed by one worker at a time.
pub struct Reconciler {
    pub cluster: Arc<dyn ClusterApi>,
    pub vault: Arc<dyn VaultService>,
    pub events: Arc<dyn EventSink>,
    pub scheduler: PollScheduler<BindingKey>,
    pub queue: WorkQueue<QueueKey>,
    pub bindings: BindingIndex,
    pub ca_bundle: CaBundleSettings,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("bindings", &self.bindings.len())
            .field("queue", &self.queue)
            .field("ca_bundle", &self.ca_bundle)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    #[must_use]
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        vault: Arc<dyn VaultService>,
        events: Arc<dyn EventSink>,
        config: &ControllerConfig,
    ) -> Self {
        let backoff = ExponentialBackoff::new(config.backoff_start, config.backoff_max);
        Self {
            cluster,
            vault,
            events,
            scheduler: PollScheduler::new(config.poll_frequency()),
            queue: WorkQueue::new(backoff, config.max_num_requeues),
            bindings: BindingIndex::new(),
            ca_bundle: CaBundleSettings::from(config),
        }
    }
}
