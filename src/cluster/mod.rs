//! # Cluster API
//!
//! The Kubernetes operations the reconciler needs, behind the [`ClusterApi`] trait.
//!
//! [`KubeClusterApi`] implements it on `kube::Api`. Errors keep only the distinction the
//! reconciler acts on: optimistic-concurrency conflicts versus everything else.

mod kubernetes;

pub use kubernetes::KubeClusterApi;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClusterError {
    /// 409: the object changed since it was read
    #[error("conflict writing {0}")]
    Conflict(String),
    /// 404 on an operation that requires the object to exist
    #[error("{0} not found")]
    NotFound(String),
    #[error("cluster API request for {target} failed: {reason}")]
    Request { target: String, reason: String },
}

impl ClusterError {
    /// Map a kube error for the object described by `target`
    #[must_use]
    pub fn from_kube(target: &str, error: kube::Error) -> Self {
        match error {
            kube::Error::Api(api_err) if api_err.code == 409 => Self::Conflict(target.to_string()),
            kube::Error::Api(api_err) if api_err.code == 404 => Self::NotFound(target.to_string()),
            other => Self::Request {
                target: target.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

/// Kubernetes reads and writes issued by the reconciler and the CA bundle manager
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// `Ok(None)` when the secret does not exist
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ClusterError>;

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret, ClusterError>;

    /// Replace using the `resourceVersion` carried by `secret`
    async fn replace_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret, ClusterError>;

    /// `Ok(false)` when there was nothing to delete
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<bool, ClusterError>;

    /// Names of namespaces carrying `label=value`
    async fn list_labelled_namespaces(
        &self,
        label: &str,
        value: &str,
    ) -> Result<Vec<String>, ClusterError>;

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, ClusterError>;

    async fn create_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<ConfigMap, ClusterError>;

    async fn replace_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<ConfigMap, ClusterError>;

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<bool, ClusterError>;

    /// ConfigMaps named `name` carrying this controller's managed-by label, in any namespace
    async fn list_managed_config_maps(&self, name: &str) -> Result<Vec<ConfigMap>, ClusterError>;
}
