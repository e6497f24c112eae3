//! # AzureKeyVaultSecret Spec

use serde::{Deserialize, Serialize};

/// AzureKeyVaultSecret Custom Resource Definition
///
/// Binds one Azure Key Vault object to one Kubernetes `Secret` in the same namespace.
/// The controller only reads this resource; it never writes status.
///
/// # Example
///
/// ```yaml
/// apiVersion: spv.no/v1
/// kind: AzureKeyVaultSecret
/// metadata:
///   name: db-password
///   namespace: payments
/// spec:
///   vault:
///     name: payments-kv
///     object:
///       name: db-password
///       type: secret
///   output:
///     secret:
///       name: db-credentials
///       dataKey: password
/// ```
#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "AzureKeyVaultSecret",
    group = "spv.no",
    version = "v1",
    namespaced,
    shortname = "akvs",
    printcolumn = r#"{"name":"Vault", "type":"string", "jsonPath":".spec.vault.name"}, {"name":"Vault Object", "type":"string", "jsonPath":".spec.vault.object.name"}, {"name":"Secret Name", "type":"string", "jsonPath":".spec.output.secret.name"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AzureKeyVaultSecretSpec {
    /// Key Vault object to read
    pub vault: crate::crd::VaultSpec,
    /// Kubernetes `Secret` to write
    pub output: crate::crd::SecretOutput,
}
