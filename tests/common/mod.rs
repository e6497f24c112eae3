//! Common test utilities for reconciler integration tests
//!
//! In-memory stand-ins for Key Vault, the Kubernetes API and the event recorder, plus
//! helpers to build bindings and a reconciler wired to the fakes.

#![allow(dead_code)]

use async_trait::async_trait;
use azure_keyvault_controller::cluster::{ClusterApi, ClusterError};
use azure_keyvault_controller::config::ControllerConfig;
use azure_keyvault_controller::constants::{annotations, CONTROLLER_NAME};
use azure_keyvault_controller::controller::binding::{BindingKey, QueueKey, TrackedBinding};
use azure_keyvault_controller::controller::events::EventSink;
use azure_keyvault_controller::controller::reconciler::Reconciler;
use azure_keyvault_controller::crd::{
    AzureKeyVaultSecret, AzureKeyVaultSecretSpec, OutputSecret, SecretOutput, VaultObject,
    VaultObjectType, VaultSpec,
};
use azure_keyvault_controller::provider::{
    FetchedObject, ObjectMaterial, ObjectRequest, VaultError, VaultService,
};
use k8s_openapi::api::core::v1::{ConfigMap, ObjectReference, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube_runtime::events::EventType;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Key Vault fake: objects by name, optional injected failure, call counter
#[derive(Default)]
pub struct FakeVault {
    objects: Mutex<HashMap<String, FetchedObject>>,
    failure: Mutex<Option<VaultError>>,
    gate: Mutex<Option<Arc<Notify>>>,
    calls: AtomicUsize,
}

impl FakeVault {
    pub fn set_secret(&self, name: &str, version: &str, value: &str) {
        self.set_object(
            name,
            FetchedObject {
                version: version.to_string(),
                material: ObjectMaterial::Secret {
                    value: value.to_string(),
                    content_type: None,
                },
            },
        );
    }

    pub fn set_object(&self, name: &str, object: FetchedObject) {
        self.objects
            .lock()
            .unwrap()
            .insert(name.to_string(), object);
    }

    /// Every read fails with `error` until cleared with `None`
    pub fn fail_with(&self, error: Option<VaultError>) {
        *self.failure.lock().unwrap() = error;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Hold every subsequent read until the returned gate is notified, once per read
    pub fn block_reads(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    async fn read(&self, request: &ObjectRequest) -> Result<FetchedObject, VaultError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }
        self.objects
            .lock()
            .unwrap()
            .get(&request.object_name)
            .cloned()
            .ok_or_else(|| VaultError::NotFound {
                object: request.to_string(),
            })
    }
}

#[async_trait]
impl VaultService for FakeVault {
    async fn get_secret(&self, request: &ObjectRequest) -> Result<FetchedObject, VaultError> {
        self.read(request).await
    }

    async fn get_key(&self, request: &ObjectRequest) -> Result<FetchedObject, VaultError> {
        self.read(request).await
    }

    async fn get_certificate(&self, request: &ObjectRequest) -> Result<FetchedObject, VaultError> {
        self.read(request).await
    }
}

type ObjectKey = (String, String);

fn object_key(namespace: &str, name: &str) -> ObjectKey {
    (namespace.to_string(), name.to_string())
}

/// Kubernetes API fake with optimistic concurrency on `resourceVersion`
#[derive(Default)]
pub struct FakeCluster {
    secrets: Mutex<BTreeMap<ObjectKey, Secret>>,
    config_maps: Mutex<BTreeMap<ObjectKey, ConfigMap>>,
    namespaces: Mutex<BTreeMap<String, BTreeMap<String, String>>>,
    resource_version: AtomicU64,
    /// Number of upcoming secret writes that fail with a conflict
    conflicts: AtomicUsize,
    /// Secret stored by a concurrent writer just before the next secret write
    racing_write: Mutex<Option<Secret>>,
    pub secret_creates: AtomicUsize,
    pub secret_replaces: AtomicUsize,
    pub secret_deletes: AtomicUsize,
    pub config_map_writes: AtomicUsize,
    pub config_map_deletes: AtomicUsize,
}

impl FakeCluster {
    fn next_version(&self) -> String {
        (self.resource_version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    pub fn insert_secret(&self, namespace: &str, mut secret: Secret) {
        secret.metadata.namespace = Some(namespace.to_string());
        secret.metadata.resource_version = Some(self.next_version());
        let name = secret.metadata.name.clone().unwrap_or_default();
        self.secrets
            .lock()
            .unwrap()
            .insert(object_key(namespace, &name), secret);
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.secrets
            .lock()
            .unwrap()
            .get(&object_key(namespace, name))
            .cloned()
    }

    /// Data value of `key` in a stored secret, as UTF-8
    pub fn secret_value(&self, namespace: &str, name: &str, key: &str) -> Option<String> {
        self.secret(namespace, name)
            .and_then(|s| s.data)
            .and_then(|data| data.get(key).cloned())
            .map(|bytes| String::from_utf8(bytes.0).unwrap())
    }

    pub fn set_namespace(&self, name: &str, labels: &[(&str, &str)]) {
        self.namespaces.lock().unwrap().insert(
            name.to_string(),
            labels
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        );
    }

    pub fn config_map(&self, namespace: &str, name: &str) -> Option<ConfigMap> {
        self.config_maps
            .lock()
            .unwrap()
            .get(&object_key(namespace, name))
            .cloned()
    }

    pub fn inject_conflicts(&self, count: usize) {
        self.conflicts.store(count, Ordering::SeqCst);
    }

    /// The next secret write loses a race against `secret` landing in `namespace` first
    pub fn race_next_write(&self, namespace: &str, mut secret: Secret) {
        secret.metadata.namespace = Some(namespace.to_string());
        *self.racing_write.lock().unwrap() = Some(secret);
    }

    fn take_racing_write(&self) -> bool {
        let Some(secret) = self.racing_write.lock().unwrap().take() else {
            return false;
        };
        let namespace = secret.metadata.namespace.clone().unwrap_or_default();
        self.insert_secret(&namespace, secret);
        true
    }

    fn take_conflict(&self) -> bool {
        self.conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    pub fn secret_writes(&self) -> usize {
        self.secret_creates.load(Ordering::SeqCst) + self.secret_replaces.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ClusterError> {
        Ok(self.secret(namespace, name))
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret, ClusterError> {
        let name = secret.metadata.name.clone().unwrap_or_default();
        let target = format!("secret {namespace}/{name}");
        if self.take_conflict() || self.take_racing_write() {
            return Err(ClusterError::Conflict(target));
        }
        let key = object_key(namespace, &name);
        if self.secrets.lock().unwrap().contains_key(&key) {
            return Err(ClusterError::Conflict(target));
        }
        self.insert_secret(namespace, secret.clone());
        self.secret_creates.fetch_add(1, Ordering::SeqCst);
        Ok(self.secret(namespace, &name).unwrap())
    }

    async fn replace_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret, ClusterError> {
        let name = secret.metadata.name.clone().unwrap_or_default();
        let target = format!("secret {namespace}/{name}");
        if self.take_conflict() || self.take_racing_write() {
            return Err(ClusterError::Conflict(target));
        }
        let Some(current) = self.secret(namespace, &name) else {
            return Err(ClusterError::NotFound(target));
        };
        if secret.metadata.resource_version.is_some()
            && secret.metadata.resource_version != current.metadata.resource_version
        {
            return Err(ClusterError::Conflict(target));
        }
        self.insert_secret(namespace, secret.clone());
        self.secret_replaces.fetch_add(1, Ordering::SeqCst);
        Ok(self.secret(namespace, &name).unwrap())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<bool, ClusterError> {
        let removed = self
            .secrets
            .lock()
            .unwrap()
            .remove(&object_key(namespace, name))
            .is_some();
        if removed {
            self.secret_deletes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(removed)
    }

    async fn list_labelled_namespaces(
        &self,
        label: &str,
        value: &str,
    ) -> Result<Vec<String>, ClusterError> {
        Ok(self
            .namespaces
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, labels)| labels.get(label).is_some_and(|v| v == value))
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, ClusterError> {
        Ok(self.config_map(namespace, name))
    }

    async fn create_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<ConfigMap, ClusterError> {
        let name = config_map.metadata.name.clone().unwrap_or_default();
        let mut stored = config_map.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        stored.metadata.resource_version = Some(self.next_version());
        self.config_maps
            .lock()
            .unwrap()
            .insert(object_key(namespace, &name), stored.clone());
        self.config_map_writes.fetch_add(1, Ordering::SeqCst);
        Ok(stored)
    }

    async fn replace_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<ConfigMap, ClusterError> {
        self.create_config_map(namespace, config_map).await
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<bool, ClusterError> {
        let removed = self
            .config_maps
            .lock()
            .unwrap()
            .remove(&object_key(namespace, name))
            .is_some();
        if removed {
            self.config_map_deletes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(removed)
    }

    async fn list_managed_config_maps(&self, name: &str) -> Result<Vec<ConfigMap>, ClusterError> {
        Ok(self
            .config_maps
            .lock()
            .unwrap()
            .values()
            .filter(|cm| cm.metadata.name.as_deref() == Some(name))
            .filter(|cm| {
                cm.metadata
                    .labels
                    .as_ref()
                    .and_then(|l| l.get(annotations::MANAGED_BY))
                    .is_some_and(|v| v == CONTROLLER_NAME)
            })
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub object: String,
    pub type_: EventType,
    pub reason: String,
    pub note: Option<String>,
}

/// Event sink that keeps every published event
#[derive(Default)]
pub struct FakeEvents {
    events: Mutex<Vec<RecordedEvent>>,
}

impl FakeEvents {
    pub fn all(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, reason: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.reason == reason)
            .count()
    }
}

#[async_trait]
impl EventSink for FakeEvents {
    async fn publish(
        &self,
        object_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        _action: &str,
        note: Option<String>,
    ) {
        self.events.lock().unwrap().push(RecordedEvent {
            object: format!(
                "{}/{}",
                object_ref.namespace.as_deref().unwrap_or_default(),
                object_ref.name.as_deref().unwrap_or_default()
            ),
            type_,
            reason: reason.to_string(),
            note,
        });
    }
}

pub const CA_SOURCE_NAMESPACE: &str = "akv2k8s";
pub const CA_SOURCE_SECRET: &str = "akv2k8s-ca";

/// Configuration from defaults plus the required CA source settings and `overrides`
pub fn test_config(overrides: &[(&str, &str)]) -> ControllerConfig {
    let mut vars: HashMap<String, String> = HashMap::from([
        ("AKV_SECRET_NAME".to_string(), CA_SOURCE_SECRET.to_string()),
        ("AKV_NAMESPACE".to_string(), CA_SOURCE_NAMESPACE.to_string()),
    ]);
    for (name, value) in overrides {
        vars.insert((*name).to_string(), (*value).to_string());
    }
    ControllerConfig::from_lookup(|name| vars.get(name).cloned()).unwrap()
}

/// A reconciler wired to fresh fakes
pub struct Harness {
    pub reconciler: Arc<Reconciler>,
    pub vault: Arc<FakeVault>,
    pub cluster: Arc<FakeCluster>,
    pub events: Arc<FakeEvents>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(&test_config(&[]))
    }

    pub fn with_config(config: &ControllerConfig) -> Self {
        let vault = Arc::new(FakeVault::default());
        let cluster = Arc::new(FakeCluster::default());
        let events = Arc::new(FakeEvents::default());
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&cluster) as Arc<dyn ClusterApi>,
            Arc::clone(&vault) as Arc<dyn VaultService>,
            Arc::clone(&events) as Arc<dyn EventSink>,
            config,
        ));
        Self {
            reconciler,
            vault,
            cluster,
            events,
        }
    }

    /// Register a binding the way an `Apply` watch event does
    pub fn track(&self, resource: &AzureKeyVaultSecret) -> BindingKey {
        let binding = TrackedBinding::from_resource(resource).unwrap();
        let key = self.reconciler.bindings.upsert(binding);
        self.reconciler.queue.enqueue(QueueKey::Binding(key.clone()));
        key
    }
}

/// Secret binding `namespace/name` reading vault object `object` into `destination`
pub fn secret_binding(
    namespace: &str,
    name: &str,
    object: &str,
    destination: &str,
    generation: i64,
) -> AzureKeyVaultSecret {
    binding_with(
        namespace,
        name,
        generation,
        VaultObject {
            name: object.to_string(),
            object_type: VaultObjectType::Secret,
            version: None,
            content_type: None,
        },
        OutputSecret {
            name: destination.to_string(),
            data_key: Some("value".to_string()),
            secret_type: None,
            base64_decode: false,
        },
    )
}

pub fn binding_with(
    namespace: &str,
    name: &str,
    generation: i64,
    object: VaultObject,
    output: OutputSecret,
) -> AzureKeyVaultSecret {
    let mut resource = AzureKeyVaultSecret::new(
        name,
        AzureKeyVaultSecretSpec {
            vault: VaultSpec {
                name: "test-kv".to_string(),
                object,
            },
            output: SecretOutput { secret: output },
        },
    );
    resource.metadata.namespace = Some(namespace.to_string());
    resource.metadata.generation = Some(generation);
    resource.metadata.uid = Some(format!("uid-{namespace}-{name}"));
    resource
}

/// CA source secret holding `ca_cert` under `ca.crt`
pub fn ca_source_secret(ca_cert: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(CA_SOURCE_SECRET.to_string()),
            ..ObjectMeta::default()
        },
        data: Some(BTreeMap::from([(
            "ca.crt".to_string(),
            ByteString(ca_cert.as_bytes().to_vec()),
        )])),
        ..Secret::default()
    }
}
