//! # Credential Resolution
//!
//! Produces the single [`CredentialSet`] used to authenticate against Azure Key Vault.
//!
//! Two strategies are supported and selected once at startup:
//! - `environment`: service principal from `AZURE_TENANT_ID` / `AZURE_CLIENT_ID` /
//!   `AZURE_CLIENT_SECRET` (enabled with `CUSTOM_AUTH=true`)
//! - `cloud_config`: the AKS cloud provider config (`/etc/kubernetes/azure.json`), which may
//!   name either a service principal or a managed identity
//!
//! Resolution never retries: a bad identity is an operator error.

mod cloud_config;
mod environment;

use crate::config::ConfigurationError;
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub use cloud_config::CloudConfig;

/// Where the controller's Azure identity comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// Process environment (`CUSTOM_AUTH=true`)
    Environment,
    /// Cloud provider config file at the given path
    CloudConfig(PathBuf),
}

impl CredentialSource {
    #[must_use]
    pub fn select(custom_auth: bool, cloud_config_path: PathBuf) -> Self {
        if custom_auth {
            Self::Environment
        } else {
            Self::CloudConfig(cloud_config_path)
        }
    }

    /// Resolve the credential set
    ///
    /// # Errors
    /// Returns [`ConfigurationError`] if the identity material is missing, unreadable or incomplete.
    pub fn resolve(&self) -> Result<CredentialSet, ConfigurationError> {
        match self {
            Self::Environment => environment::resolve(|key| std::env::var(key).ok()),
            Self::CloudConfig(path) => cloud_config::resolve(path),
        }
    }
}

/// Immutable identity for the vault service
///
/// Shared read-only behind an `Arc` for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialSet {
    pub cloud: AzureCloud,
    pub identity: Identity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// Azure AD application with a client secret
    ServicePrincipal {
        tenant_id: String,
        client_id: String,
        client_secret: ClientSecret,
    },
    /// Node or pod managed identity via IMDS; `client_id` selects a user-assigned identity
    ManagedIdentity { client_id: Option<String> },
}

impl Identity {
    /// Short label for logs; never includes secret material
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ServicePrincipal { .. } => "service-principal",
            Self::ManagedIdentity { client_id: None } => "system-assigned-managed-identity",
            Self::ManagedIdentity { client_id: Some(_) } => "user-assigned-managed-identity",
        }
    }
}

/// Client secret wiped from memory on drop
#[derive(Clone, PartialEq, Eq, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct ClientSecret(String);

impl ClientSecret {
    #[must_use]
    pub fn new(value: String) -> Self {
        Self(value)
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ClientSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ClientSecret(***)")
    }
}

/// Azure cloud environment; decides the AAD authority and the Key Vault DNS suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AzureCloud {
    #[default]
    Public,
    China,
    UsGovernment,
}

impl AzureCloud {
    /// Parse the cloud names used by `azure.json` and `AZURE_ENVIRONMENT`
    ///
    /// # Errors
    /// Returns [`ConfigurationError`] for unknown cloud names.
    pub fn parse(name: &str) -> Result<Self, ConfigurationError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "azurepubliccloud" | "azurecloud" | "public" => Ok(Self::Public),
            "azurechinacloud" | "china" => Ok(Self::China),
            "azureusgovernmentcloud" | "azureusgovernment" | "usgovernment" => {
                Ok(Self::UsGovernment)
            }
            other => Err(ConfigurationError::IncompleteIdentity(format!(
                "unknown Azure cloud '{other}'"
            ))),
        }
    }

    #[must_use]
    pub fn authority_host(self) -> &'static str {
        match self {
            Self::Public => "https://login.microsoftonline.com",
            Self::China => "https://login.chinacloudapi.cn",
            Self::UsGovernment => "https://login.microsoftonline.us",
        }
    }

    #[must_use]
    pub fn key_vault_dns_suffix(self) -> &'static str {
        match self {
            Self::Public => "vault.azure.net",
            Self::China => "vault.azure.cn",
            Self::UsGovernment => "vault.usgovcloudapi.net",
        }
    }

    /// OAuth2 resource identifier for Key Vault in this cloud
    #[must_use]
    pub fn key_vault_resource(self) -> String {
        format!("https://{}", self.key_vault_dns_suffix())
    }
}

/// Reject identifiers that cannot be valid tenant or client ids
fn validate_identifier(field: &str, value: &str) -> Result<String, ConfigurationError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ConfigurationError::IncompleteIdentity(format!(
            "{field} is empty"
        )));
    }
    if value.chars().any(|c| c.is_whitespace() || c == '/' || c == '?') {
        return Err(ConfigurationError::IncompleteIdentity(format!(
            "{field} is malformed"
        )));
    }
    Ok(value.to_string())
}
