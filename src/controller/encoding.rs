//! # Output Encoding
//!
//! Turns fetched Key Vault material into the `data` map of the destination `Secret`.
//!
//! | Encoding        | Selected when                                       | Output                          |
//! |-----------------|-----------------------------------------------------|---------------------------------|
//! | `Plain`         | default                                             | material under `dataKey`        |
//! | `Base64`        | `output.secret.base64Decode: true`                  | decoded value under `dataKey`   |
//! | `Tls`           | `output.secret.type: kubernetes.io/tls`             | `tls.crt` and `tls.key`         |
//! | `MultiKeyValue` | object type `multi-key-value-secret`                | one key per map entry           |

use crate::controller::validation::{
    validate_data_key, validate_kubernetes_name, validate_object_name, validate_object_version,
    validate_vault_name,
};
use crate::crd::{AzureKeyVaultSecretSpec, ObjectContentType, VaultObjectType};
use crate::provider::ObjectMaterial;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use k8s_openapi::ByteString;
use std::collections::BTreeMap;
use thiserror::Error;

pub const SECRET_TYPE_OPAQUE: &str = "Opaque";
pub const SECRET_TYPE_TLS: &str = "kubernetes.io/tls";
pub const TLS_CERT_KEY: &str = "tls.crt";
pub const TLS_PRIVATE_KEY_KEY: &str = "tls.key";

const PKCS12_CONTENT_TYPE: &str = "application/x-pkcs12";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("value is not valid base64: {0}")]
    InvalidBase64(String),
    #[error("PKCS#12 material cannot be written as a TLS secret; store the certificate as PEM")]
    Pkcs12Unsupported,
    #[error("PEM material has no {0} block")]
    MissingPemBlock(&'static str),
    #[error("{0} cannot be written as a TLS secret")]
    NotTlsMaterial(&'static str),
    #[error("base64Decode only applies to secrets, not {0}")]
    Base64NotApplicable(&'static str),
    #[error("value is not a flat key/value map: {0}")]
    InvalidMap(String),
}

/// How material is laid out in the destination secret
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEncoding {
    Plain { data_key: String },
    Base64 { data_key: String },
    Tls,
    MultiKeyValue(ObjectContentType),
}

impl OutputEncoding {
    /// Validate a binding and pick its encoding
    ///
    /// # Errors
    /// Returns an error describing the first invalid field.
    pub fn for_binding(spec: &AzureKeyVaultSecretSpec) -> anyhow::Result<Self> {
        validate_vault_name(&spec.vault.name)?;
        validate_object_name(&spec.vault.object.name)?;
        if let Some(version) = &spec.vault.object.version {
            validate_object_version(version)?;
        }
        let output = &spec.output.secret;
        validate_kubernetes_name(&output.name, "output.secret.name")?;

        if output.secret_type.as_deref() == Some(SECRET_TYPE_TLS) {
            return Ok(Self::Tls);
        }

        if spec.vault.object.object_type == VaultObjectType::MultiKeyValueSecret {
            let content_type = spec.vault.object.content_type.ok_or_else(|| {
                anyhow::anyhow!(
                    "vault.object.contentType is required for multi-key-value-secret objects"
                )
            })?;
            return Ok(Self::MultiKeyValue(content_type));
        }

        let data_key = output.data_key.clone().ok_or_else(|| {
            anyhow::anyhow!(
                "output.secret.dataKey is required unless the secret type is {SECRET_TYPE_TLS}"
            )
        })?;
        validate_data_key(&data_key, "output.secret.dataKey")?;

        if output.base64_decode {
            Ok(Self::Base64 { data_key })
        } else {
            Ok(Self::Plain { data_key })
        }
    }

    /// Kubernetes secret type written on the destination
    #[must_use]
    pub fn secret_type(&self, spec: &AzureKeyVaultSecretSpec) -> String {
        match self {
            Self::Tls => SECRET_TYPE_TLS.to_string(),
            _ => spec
                .output
                .secret
                .secret_type
                .clone()
                .unwrap_or_else(|| SECRET_TYPE_OPAQUE.to_string()),
        }
    }

    /// Build the destination `data` map
    ///
    /// # Errors
    /// Returns [`EncodingError`] when the material does not fit the encoding.
    pub fn render(
        &self,
        material: &ObjectMaterial,
    ) -> Result<BTreeMap<String, ByteString>, EncodingError> {
        match self {
            Self::Plain { data_key } => Ok(single(data_key, plain_bytes(material)?)),
            Self::Base64 { data_key } => match material {
                ObjectMaterial::Secret { value, .. } => {
                    let decoded = STANDARD
                        .decode(value.trim())
                        .map_err(|e| EncodingError::InvalidBase64(e.to_string()))?;
                    Ok(single(data_key, decoded))
                }
                ObjectMaterial::Key { .. } => Err(EncodingError::Base64NotApplicable("keys")),
                ObjectMaterial::Certificate { .. } => {
                    Err(EncodingError::Base64NotApplicable("certificates"))
                }
            },
            Self::Tls => render_tls(material),
            Self::MultiKeyValue(content_type) => match material {
                ObjectMaterial::Secret { value, .. } => expand_map(value, *content_type),
                ObjectMaterial::Key { .. } | ObjectMaterial::Certificate { .. } => Err(
                    EncodingError::InvalidMap("only secrets can hold key/value maps".to_string()),
                ),
            },
        }
    }
}

fn single(key: &str, value: Vec<u8>) -> BTreeMap<String, ByteString> {
    BTreeMap::from([(key.to_string(), ByteString(value))])
}

fn plain_bytes(material: &ObjectMaterial) -> Result<Vec<u8>, EncodingError> {
    match material {
        ObjectMaterial::Secret { value, .. } => Ok(value.as_bytes().to_vec()),
        ObjectMaterial::Key { jwk } => Ok(jwk.as_bytes().to_vec()),
        ObjectMaterial::Certificate { cer, .. } => certificate_pem(cer).map(String::into_bytes),
    }
}

/// PEM-encode the `cer` field of a certificate bundle (base64url or base64 DER)
fn certificate_pem(cer: &str) -> Result<String, EncodingError> {
    let der = URL_SAFE_NO_PAD
        .decode(cer.trim_end_matches('='))
        .or_else(|_| STANDARD.decode(cer))
        .map_err(|e| EncodingError::InvalidBase64(e.to_string()))?;
    let body = STANDARD.encode(der);
    let mut pem = String::from("-----BEGIN CERTIFICATE-----\n");
    for line in body.as_bytes().chunks(64) {
        pem.push_str(&String::from_utf8_lossy(line));
        pem.push('\n');
    }
    pem.push_str("-----END CERTIFICATE-----\n");
    Ok(pem)
}

fn render_tls(material: &ObjectMaterial) -> Result<BTreeMap<String, ByteString>, EncodingError> {
    let (pem, content_type) = match material {
        ObjectMaterial::Certificate {
            secret_value,
            content_type,
            ..
        } => (secret_value, content_type),
        ObjectMaterial::Secret {
            value,
            content_type,
        } => (value, content_type),
        ObjectMaterial::Key { .. } => return Err(EncodingError::NotTlsMaterial("a key")),
    };
    if content_type.as_deref() == Some(PKCS12_CONTENT_TYPE) {
        return Err(EncodingError::Pkcs12Unsupported);
    }

    let mut certificates = String::new();
    let mut private_key = String::new();
    for (label, block) in pem_blocks(pem) {
        if label.ends_with("PRIVATE KEY") {
            if private_key.is_empty() {
                private_key.push_str(block);
                private_key.push('\n');
            }
        } else if label == "CERTIFICATE" {
            certificates.push_str(block);
            certificates.push('\n');
        }
    }
    if certificates.is_empty() {
        return Err(EncodingError::MissingPemBlock("CERTIFICATE"));
    }
    if private_key.is_empty() {
        return Err(EncodingError::MissingPemBlock("PRIVATE KEY"));
    }

    Ok(BTreeMap::from([
        (TLS_CERT_KEY.to_string(), ByteString(certificates.into_bytes())),
        (
            TLS_PRIVATE_KEY_KEY.to_string(),
            ByteString(private_key.into_bytes()),
        ),
    ]))
}

/// `(label, full block text)` for every PEM block in `pem`
fn pem_blocks(pem: &str) -> Vec<(&str, &str)> {
    let mut blocks = Vec::new();
    let mut rest = pem;
    while let Some(start) = rest.find("-----BEGIN ") {
        let after_begin = &rest[start + "-----BEGIN ".len()..];
        let Some(label_end) = after_begin.find("-----") else {
            break;
        };
        let label = &after_begin[..label_end];
        let end_marker = format!("-----END {label}-----");
        let Some(end) = rest[start..].find(&end_marker) else {
            break;
        };
        let block_end = start + end + end_marker.len();
        blocks.push((label, &rest[start..block_end]));
        rest = &rest[block_end..];
    }
    blocks
}

fn expand_map(
    value: &str,
    content_type: ObjectContentType,
) -> Result<BTreeMap<String, ByteString>, EncodingError> {
    let entries: BTreeMap<String, serde_json::Value> = match content_type {
        ObjectContentType::Json => {
            serde_json::from_str(value).map_err(|e| EncodingError::InvalidMap(e.to_string()))?
        }
        ObjectContentType::Yaml => {
            serde_yaml::from_str(value).map_err(|e| EncodingError::InvalidMap(e.to_string()))?
        }
    };

    let mut data = BTreeMap::new();
    for (key, entry) in entries {
        validate_data_key(&key, "key").map_err(|e| EncodingError::InvalidMap(e.to_string()))?;
        let text = match entry {
            serde_json::Value::String(s) => s,
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::Bool(b) => b.to_string(),
            serde_json::Value::Null => String::new(),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                return Err(EncodingError::InvalidMap(format!(
                    "value of '{key}' is nested"
                )));
            }
        };
        data.insert(key, ByteString(text.into_bytes()));
    }
    Ok(data)
}
