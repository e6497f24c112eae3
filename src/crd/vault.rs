//! # Vault Reference
//!
//! Which Key Vault object a binding reads.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VaultSpec {
    /// Key Vault name, e.g. `payments-kv` for `https://payments-kv.vault.azure.net`
    pub name: String,
    pub object: VaultObject,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VaultObject {
    /// Object name inside the vault
    pub name: String,
    /// Object type
    #[serde(rename = "type")]
    pub object_type: VaultObjectType,
    /// Pin a specific object version; the latest version is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Format of a `multi-key-value-secret` value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<ObjectContentType>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum VaultObjectType {
    Secret,
    Certificate,
    Key,
    /// A secret whose value is a flat JSON or YAML map
    MultiKeyValueSecret,
}

impl VaultObjectType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Secret => "secret",
            Self::Certificate => "certificate",
            Self::Key => "key",
            Self::MultiKeyValueSecret => "multi-key-value-secret",
        }
    }
}

impl fmt::Display for VaultObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ObjectContentType {
    #[serde(rename = "application/x-json")]
    Json,
    #[serde(rename = "application/x-yaml")]
    Yaml,
}
