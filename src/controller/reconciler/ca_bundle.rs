//! # CA Bundle
//!
//! Keeps the CA bundle `ConfigMap` in every namespace labelled `<AKV_LABEL_NAME>=enabled`
//! equal to the `ca.crt` entry of the CA source secret.
//!
//! - Written only when the content hash differs
//! - Managed copies in namespaces that lost the label are deleted
//! - Not gated by the poll scheduler; failures are retried with backoff

use super::types::{ReconcileOutcome, Reconciler, ReconcilerError};
use crate::constants::{
    annotations, CA_BUNDLE_DATA_KEY, CA_SOURCE_DATA_KEY, CONTROLLER_NAME, NAMESPACE_LABEL_ENABLED,
};
use crate::controller::binding::QueueKey;
use crate::observability::metrics;
use k8s_openapi::api::core::v1::{ConfigMap, ObjectReference};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

impl Reconciler {
    pub(super) async fn process_ca_bundle(&self) -> Result<ReconcileOutcome, ReconcilerError> {
        match self.sync_ca_bundle().await {
            Ok(outcome) => {
                self.queue.forget(&QueueKey::CaBundle);
                Ok(outcome)
            }
            Err(e) => {
                let source_ref = self.ca_source_ref();
                self.report_failure(&QueueKey::CaBundle, Some(&source_ref), &e)
                    .await;
                Err(e)
            }
        }
    }

    /// Events about the bundle are attached to the source secret
    fn ca_source_ref(&self) -> ObjectReference {
        ObjectReference {
            api_version: Some("v1".to_string()),
            kind: Some("Secret".to_string()),
            name: Some(self.ca_bundle.source_secret.clone()),
            namespace: Some(self.ca_bundle.source_namespace.clone()),
            ..ObjectReference::default()
        }
    }

    async fn sync_ca_bundle(&self) -> Result<ReconcileOutcome, ReconcilerError> {
        let settings = &self.ca_bundle;
        let source_name = format!("{}/{}", settings.source_namespace, settings.source_secret);

        let source = self
            .cluster
            .get_secret(&settings.source_namespace, &settings.source_secret)
            .await?
            .ok_or_else(|| ReconcilerError::CaSourceMissing(source_name.clone()))?;
        let ca_cert = source
            .data
            .as_ref()
            .and_then(|data| data.get(CA_SOURCE_DATA_KEY))
            .and_then(|bytes| String::from_utf8(bytes.0.clone()).ok())
            .filter(|pem| !pem.trim().is_empty())
            .ok_or_else(|| ReconcilerError::CaSourceIncomplete {
                secret: source_name.clone(),
                key: CA_SOURCE_DATA_KEY.to_string(),
            })?;
        let hash = content_hash(&ca_cert);

        let namespaces = self
            .cluster
            .list_labelled_namespaces(&settings.namespace_label, NAMESPACE_LABEL_ENABLED)
            .await?;

        let mut written = 0;
        for namespace in &namespaces {
            let existing = self
                .cluster
                .get_config_map(namespace, &settings.config_map_name)
                .await?;
            match existing {
                Some(current) if is_up_to_date(&current, &hash, &ca_cert) => {
                    debug!(
                        "CA bundle {}/{} is up to date",
                        namespace, settings.config_map_name
                    );
                }
                Some(current) => {
                    let updated = merge_config_map(current, &ca_cert, &hash);
                    self.cluster.replace_config_map(namespace, &updated).await?;
                    metrics::increment_ca_bundle_writes("updated");
                    info!("Updated CA bundle {}/{}", namespace, settings.config_map_name);
                    written += 1;
                }
                None => {
                    let desired =
                        desired_config_map(namespace, &settings.config_map_name, &ca_cert, &hash);
                    self.cluster.create_config_map(namespace, &desired).await?;
                    metrics::increment_ca_bundle_writes("created");
                    info!("Created CA bundle {}/{}", namespace, settings.config_map_name);
                    written += 1;
                }
            }
        }

        let enabled: HashSet<&str> = namespaces.iter().map(String::as_str).collect();
        let mut removed = 0;
        for config_map in self
            .cluster
            .list_managed_config_maps(&settings.config_map_name)
            .await?
        {
            let Some(namespace) = config_map.metadata.namespace.as_deref() else {
                continue;
            };
            if enabled.contains(namespace) {
                continue;
            }
            if self
                .cluster
                .delete_config_map(namespace, &settings.config_map_name)
                .await?
            {
                metrics::increment_ca_bundle_writes("deleted");
                info!(
                    "Removed CA bundle {}/{} from namespace without the {} label",
                    namespace, settings.config_map_name, settings.namespace_label
                );
                removed += 1;
            }
        }

        Ok(ReconcileOutcome::CaBundleSynced { written, removed })
    }
}

/// Hex SHA-256 of the bundle content
fn content_hash(content: &str) -> String {
    Sha256::digest(content.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn is_up_to_date(config_map: &ConfigMap, hash: &str, ca_cert: &str) -> bool {
    let hash_matches = config_map
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(annotations::CA_BUNDLE_HASH))
        .is_some_and(|h| h == hash);
    let data_matches = config_map
        .data
        .as_ref()
        .and_then(|d| d.get(CA_BUNDLE_DATA_KEY))
        .is_some_and(|d| d == ca_cert);
    hash_matches && data_matches
}

fn desired_config_map(namespace: &str, name: &str, ca_cert: &str, hash: &str) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                annotations::MANAGED_BY.to_string(),
                CONTROLLER_NAME.to_string(),
            )])),
            annotations: Some(BTreeMap::from([(
                annotations::CA_BUNDLE_HASH.to_string(),
                hash.to_string(),
            )])),
            ..ObjectMeta::default()
        },
        data: Some(BTreeMap::from([(
            CA_BUNDLE_DATA_KEY.to_string(),
            ca_cert.to_string(),
        )])),
        ..ConfigMap::default()
    }
}

fn merge_config_map(current: ConfigMap, ca_cert: &str, hash: &str) -> ConfigMap {
    let mut metadata = current.metadata;
    metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .insert(annotations::MANAGED_BY.to_string(), CONTROLLER_NAME.to_string());
    metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(annotations::CA_BUNDLE_HASH.to_string(), hash.to_string());
    let mut data = current.data.unwrap_or_default();
    data.insert(CA_BUNDLE_DATA_KEY.to_string(), ca_cert.to_string());
    ConfigMap {
        metadata,
        data: Some(data),
        binary_data: current.binary_data,
        immutable: current.immutable,
    }
}
