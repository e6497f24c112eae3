//! Credentials from the Azure cloud provider config (`azure.json`).
//!
//! AKS writes this file on every node. It names either a service principal
//! (`aadClientId` / `aadClientSecret`) or a managed identity
//! (`useManagedIdentityExtension`, optionally `userAssignedIdentityID`).

use super::{validate_identifier, AzureCloud, ClientSecret, CredentialSet, Identity};
use crate::config::ConfigurationError;
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

/// The subset of `azure.json` the controller understands
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudConfig {
    #[serde(default)]
    pub cloud: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub aad_client_id: Option<String>,
    #[serde(default)]
    pub aad_client_secret: Option<ClientSecret>,
    #[serde(default)]
    pub use_managed_identity_extension: bool,
    #[serde(default, rename = "userAssignedIdentityID")]
    pub user_assigned_identity_id: Option<String>,
}

impl CloudConfig {
    /// Parse config content; JSON is accepted as a subset of YAML
    ///
    /// # Errors
    /// Returns [`ConfigurationError::CloudConfigUnparseable`] when the content is not a valid config.
    pub fn parse(content: &str, path: &str) -> Result<Self, ConfigurationError> {
        serde_yaml::from_str(content).map_err(|e| ConfigurationError::CloudConfigUnparseable {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    /// Convert into a credential set
    ///
    /// # Errors
    /// Returns [`ConfigurationError::IncompleteIdentity`] when neither a managed identity nor
    /// a complete service principal is configured.
    pub fn into_credentials(self) -> Result<CredentialSet, ConfigurationError> {
        let cloud = AzureCloud::parse(self.cloud.as_deref().unwrap_or_default())?;

        if self.use_managed_identity_extension {
            let client_id = self
                .user_assigned_identity_id
                .filter(|id| !id.trim().is_empty())
                .map(|id| validate_identifier("userAssignedIdentityID", &id))
                .transpose()?;
            return Ok(CredentialSet {
                cloud,
                identity: Identity::ManagedIdentity { client_id },
            });
        }

        let tenant_id = self
            .tenant_id
            .ok_or_else(|| ConfigurationError::IncompleteIdentity("tenantId is missing".into()))?;
        let client_id = self.aad_client_id.ok_or_else(|| {
            ConfigurationError::IncompleteIdentity("aadClientId is missing".into())
        })?;
        let client_secret = self
            .aad_client_secret
            .filter(|secret| !secret.expose().is_empty())
            .ok_or_else(|| {
                ConfigurationError::IncompleteIdentity("aadClientSecret is missing".into())
            })?;

        Ok(CredentialSet {
            cloud,
            identity: Identity::ServicePrincipal {
                tenant_id: validate_identifier("tenantId", &tenant_id)?,
                client_id: validate_identifier("aadClientId", &client_id)?,
                client_secret,
            },
        })
    }
}

pub(super) fn resolve(path: &Path) -> Result<CredentialSet, ConfigurationError> {
    let path_label = path.display().to_string();
    debug!("Reading Azure cloud config from {}", path_label);
    let content =
        std::fs::read_to_string(path).map_err(|source| ConfigurationError::CloudConfigUnreadable {
            path: path_label.clone(),
            source,
        })?;
    CloudConfig::parse(&content, &path_label)?.into_credentials()
}
