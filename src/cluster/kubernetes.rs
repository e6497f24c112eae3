//! `kube::Api` implementation of [`ClusterApi`].

use super::{ClusterApi, ClusterError};
use crate::constants::{annotations, CONTROLLER_NAME};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret};
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::Client;

#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
}

impl std::fmt::Debug for KubeClusterApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterApi").finish_non_exhaustive()
    }
}

impl KubeClusterApi {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn config_maps(&self, namespace: &str) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn target(kind: &str, namespace: &str, name: &str) -> String {
    format!("{kind} {namespace}/{name}")
}

fn object_name<'a>(name: Option<&'a String>) -> &'a str {
    name.map_or("", String::as_str)
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ClusterError> {
        self.secrets(namespace)
            .get_opt(name)
            .await
            .map_err(|e| ClusterError::from_kube(&target("Secret", namespace, name), e))
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret, ClusterError> {
        let name = object_name(secret.metadata.name.as_ref());
        self.secrets(namespace)
            .create(&PostParams::default(), secret)
            .await
            .map_err(|e| ClusterError::from_kube(&target("Secret", namespace, name), e))
    }

    async fn replace_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret, ClusterError> {
        let name = object_name(secret.metadata.name.as_ref());
        self.secrets(namespace)
            .replace(name, &PostParams::default(), secret)
            .await
            .map_err(|e| ClusterError::from_kube(&target("Secret", namespace, name), e))
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<bool, ClusterError> {
        match self.secrets(namespace).delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(false),
            Err(e) => Err(ClusterError::from_kube(&target("Secret", namespace, name), e)),
        }
    }

    async fn list_labelled_namespaces(
        &self,
        label: &str,
        value: &str,
    ) -> Result<Vec<String>, ClusterError> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let params = ListParams::default().labels(&format!("{label}={value}"));
        let list = namespaces
            .list(&params)
            .await
            .map_err(|e| ClusterError::from_kube(&format!("Namespaces labelled {label}={value}"), e))?;
        Ok(list
            .items
            .into_iter()
            .filter_map(|ns| ns.metadata.name)
            .collect())
    }

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, ClusterError> {
        self.config_maps(namespace)
            .get_opt(name)
            .await
            .map_err(|e| ClusterError::from_kube(&target("ConfigMap", namespace, name), e))
    }

    async fn create_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<ConfigMap, ClusterError> {
        let name = object_name(config_map.metadata.name.as_ref());
        self.config_maps(namespace)
            .create(&PostParams::default(), config_map)
            .await
            .map_err(|e| ClusterError::from_kube(&target("ConfigMap", namespace, name), e))
    }

    async fn replace_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<ConfigMap, ClusterError> {
        let name = object_name(config_map.metadata.name.as_ref());
        self.config_maps(namespace)
            .replace(name, &PostParams::default(), config_map)
            .await
            .map_err(|e| ClusterError::from_kube(&target("ConfigMap", namespace, name), e))
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<bool, ClusterError> {
        match self
            .config_maps(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(false),
            Err(e) => Err(ClusterError::from_kube(&target("ConfigMap", namespace, name), e)),
        }
    }

    async fn list_managed_config_maps(&self, name: &str) -> Result<Vec<ConfigMap>, ClusterError> {
        let config_maps: Api<ConfigMap> = Api::all(self.client.clone());
        let params = ListParams::default()
            .labels(&format!("{}={}", annotations::MANAGED_BY, CONTROLLER_NAME))
            .fields(&format!("metadata.name={name}"));
        config_maps
            .list(&params)
            .await
            .map(|list| list.items)
            .map_err(|e| ClusterError::from_kube(&format!("managed ConfigMaps named {name}"), e))
    }
}
