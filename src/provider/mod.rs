//! # Vault Provider
//!
//! Read-only access to Azure Key Vault objects.
//!
//! [`VaultService`] is the seam between the reconciler and Key Vault. The production
//! implementation is [`azure::KeyVaultClient`]; tests substitute an in-memory fake.

pub mod azure;

use crate::crd::VaultObjectType;
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

/// Identifies one object in one vault
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRequest {
    pub vault_name: String,
    pub object_name: String,
    pub object_type: VaultObjectType,
    /// Specific version; `None` reads the latest
    pub version: Option<String>,
}

impl fmt::Display for ObjectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} '{}' in vault '{}'",
            self.object_type, self.object_name, self.vault_name
        )?;
        if let Some(version) = &self.version {
            write!(f, " (version {version})")?;
        }
        Ok(())
    }
}

/// Object content as returned by Key Vault
#[derive(Clone, PartialEq, Eq)]
pub enum ObjectMaterial {
    /// Secret value with the content type Key Vault reports for it
    Secret {
        value: String,
        content_type: Option<String>,
    },
    /// JSON Web Key serialized as JSON
    Key { jwk: String },
    /// Certificate: public part as base64 DER plus the backing secret
    /// (PEM or PKCS#12 bundle including the private key)
    Certificate {
        cer: String,
        secret_value: String,
        content_type: Option<String>,
    },
}

impl fmt::Debug for ObjectMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Secret { content_type, .. } => f
                .debug_struct("Secret")
                .field("value", &"***")
                .field("content_type", content_type)
                .finish(),
            Self::Key { .. } => f.debug_struct("Key").field("jwk", &"***").finish(),
            Self::Certificate { content_type, .. } => f
                .debug_struct("Certificate")
                .field("secret_value", &"***")
                .field("content_type", content_type)
                .finish(),
        }
    }
}

/// A fetched object and the version it was read at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedObject {
    pub version: String,
    pub material: ObjectMaterial,
}

/// Vault read failure, classified for retry and event decisions
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VaultError {
    /// 401/403 or no token could be acquired
    #[error("not authorized to read {object}: {reason}")]
    Auth { object: String, reason: String },
    /// 404; the destination is left untouched
    #[error("{object} was not found")]
    NotFound { object: String },
    /// Network failure, throttling, 5xx or anything else worth retrying
    #[error("failed to read {object}: {reason}")]
    Transient { object: String, reason: String },
}

impl VaultError {
    /// Classify an HTTP status from Key Vault
    #[must_use]
    pub fn from_status(object: &ObjectRequest, status: u16, detail: &str) -> Self {
        let object = object.to_string();
        match status {
            401 | 403 => Self::Auth {
                object,
                reason: format!("HTTP {status}: {detail}"),
            },
            404 => Self::NotFound { object },
            _ => Self::Transient {
                object,
                reason: format!("HTTP {status}: {detail}"),
            },
        }
    }

    /// Short label for metrics
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth",
            Self::NotFound { .. } => "not_found",
            Self::Transient { .. } => "transient",
        }
    }
}

/// Read-only Key Vault access
#[async_trait]
pub trait VaultService: Send + Sync {
    async fn get_secret(&self, request: &ObjectRequest) -> Result<FetchedObject, VaultError>;

    async fn get_key(&self, request: &ObjectRequest) -> Result<FetchedObject, VaultError>;

    async fn get_certificate(&self, request: &ObjectRequest) -> Result<FetchedObject, VaultError>;

    /// Fetch by the request's object type
    async fn fetch(&self, request: &ObjectRequest) -> Result<FetchedObject, VaultError> {
        match request.object_type {
            VaultObjectType::Secret | VaultObjectType::MultiKeyValueSecret => {
                self.get_secret(request).await
            }
            VaultObjectType::Key => self.get_key(request).await,
            VaultObjectType::Certificate => self.get_certificate(request).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ObjectRequest {
        ObjectRequest {
            vault_name: "payments-kv".to_string(),
            object_name: "db-password".to_string(),
            object_type: VaultObjectType::Secret,
            version: None,
        }
    }

    #[test]
    fn test_status_classification() {
        let req = request();
        assert_eq!(VaultError::from_status(&req, 401, "").kind(), "auth");
        assert_eq!(VaultError::from_status(&req, 403, "").kind(), "auth");
        assert_eq!(VaultError::from_status(&req, 404, "").kind(), "not_found");
        assert_eq!(VaultError::from_status(&req, 429, "").kind(), "transient");
        assert_eq!(VaultError::from_status(&req, 503, "").kind(), "transient");
        assert_eq!(VaultError::from_status(&req, 400, "").kind(), "transient");
    }

    #[test]
    fn test_material_debug_is_redacted() {
        let material = ObjectMaterial::Secret {
            value: "hunter2".to_string(),
            content_type: None,
        };
        assert!(!format!("{material:?}").contains("hunter2"));
    }

    #[test]
    fn test_request_display() {
        let mut req = request();
        assert_eq!(req.to_string(), "secret 'db-password' in vault 'payments-kv'");
        req.version = Some("abc".to_string());
        assert!(req.to_string().ends_with("(version abc)"));
    }
}
