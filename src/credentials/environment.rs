//! Service principal credentials from environment variables.

use super::{validate_identifier, AzureCloud, ClientSecret, CredentialSet, Identity};
use crate::config::ConfigurationError;

const TENANT_ID: &str = "AZURE_TENANT_ID";
const CLIENT_ID: &str = "AZURE_CLIENT_ID";
const CLIENT_SECRET: &str = "AZURE_CLIENT_SECRET";
const ENVIRONMENT: &str = "AZURE_ENVIRONMENT";

pub(super) fn resolve<F>(lookup: F) -> Result<CredentialSet, ConfigurationError>
where
    F: Fn(&str) -> Option<String>,
{
    let required = |key: &str| {
        lookup(key)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigurationError::MissingVariable(key.to_string()))
    };

    let tenant_id = validate_identifier(TENANT_ID, &required(TENANT_ID)?)?;
    let client_id = validate_identifier(CLIENT_ID, &required(CLIENT_ID)?)?;
    let client_secret = ClientSecret::new(required(CLIENT_SECRET)?);
    let cloud = AzureCloud::parse(&lookup(ENVIRONMENT).unwrap_or_default())?;

    Ok(CredentialSet {
        cloud,
        identity: Identity::ServicePrincipal {
            tenant_id,
            client_id,
            client_secret,
        },
    })
}
