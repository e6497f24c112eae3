//! # Output Secret
//!
//! Where and how vault material lands in Kubernetes.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretOutput {
    pub secret: OutputSecret,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OutputSecret {
    /// Destination `Secret` name in the binding's namespace
    pub name: String,
    /// Data key for single-value output. Required unless the secret type is
    /// `kubernetes.io/tls` or the object is a `multi-key-value-secret`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_key: Option<String>,
    /// Kubernetes secret type, defaults to `Opaque`
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub secret_type: Option<String>,
    /// The vault value is base64 and is decoded before it is stored
    #[serde(default)]
    pub base64_decode: bool,
}
