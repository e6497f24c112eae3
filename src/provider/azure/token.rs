//! # Azure AD Tokens
//!
//! Access tokens for the Key Vault resource.
//!
//! - Service principal: OAuth2 client-credentials grant against
//!   `{authority}/{tenant}/oauth2/v2.0/token`
//! - Managed identity: Azure Instance Metadata Service (IMDS)
//!
//! Tokens are cached and refreshed shortly before they expire. Concurrent callers share
//! one refresh.

use crate::credentials::{CredentialSet, Identity};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};
use zeroize::Zeroizing;

const IMDS_TOKEN_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
const IMDS_API_VERSION: &str = "2018-02-01";

/// Refresh this long before the reported expiry
const REFRESH_MARGIN: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("token endpoint returned HTTP {status}: {detail}")]
    Rejected { status: u16, detail: String },
    #[error("token response could not be parsed: {0}")]
    Malformed(String),
}

/// Bearer token with its expiry
#[derive(Clone)]
pub struct AccessToken {
    secret: Zeroizing<String>,
    expires_at: Instant,
}

impl AccessToken {
    #[must_use]
    pub fn new(secret: String, expires_in: Duration) -> Self {
        Self {
            secret: Zeroizing::new(secret),
            expires_at: Instant::now() + expires_in,
        }
    }

    #[must_use]
    pub fn secret(&self) -> &str {
        &self.secret
    }

    fn is_fresh(&self, now: Instant) -> bool {
        now + REFRESH_MARGIN < self.expires_at
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"***")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    /// AAD returns a number, IMDS a string
    expires_in: ExpiresIn,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ExpiresIn {
    Seconds(u64),
    Text(String),
}

impl ExpiresIn {
    fn seconds(&self) -> Result<u64, TokenError> {
        match self {
            Self::Seconds(s) => Ok(*s),
            Self::Text(s) => s
                .parse()
                .map_err(|_| TokenError::Malformed(format!("expires_in '{s}' is not a number"))),
        }
    }
}

fn parse_token_response(body: &str) -> Result<AccessToken, TokenError> {
    let response: TokenResponse =
        serde_json::from_str(body).map_err(|e| TokenError::Malformed(e.to_string()))?;
    let expires_in = Duration::from_secs(response.expires_in.seconds()?);
    Ok(AccessToken::new(response.access_token, expires_in))
}

/// Cached token source for one identity and resource
pub struct TokenProvider {
    http: reqwest::Client,
    credentials: Arc<CredentialSet>,
    resource: String,
    cached: Mutex<Option<AccessToken>>,
}

impl fmt::Debug for TokenProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenProvider")
            .field("identity", &self.credentials.identity.kind())
            .field("resource", &self.resource)
            .finish_non_exhaustive()
    }
}

impl TokenProvider {
    #[must_use]
    pub fn new(http: reqwest::Client, credentials: Arc<CredentialSet>, resource: String) -> Self {
        Self {
            http,
            credentials,
            resource,
            cached: Mutex::new(None),
        }
    }

    /// Return a valid token, refreshing it if needed
    ///
    /// # Errors
    /// Returns [`TokenError`] if the identity endpoint cannot be reached or rejects the request.
    pub async fn token(&self) -> Result<AccessToken, TokenError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.is_fresh(Instant::now()) {
                return Ok(token.clone());
            }
        }

        let token = self.acquire().await?;
        debug!("Acquired Azure AD token for {}", self.resource);
        *cached = Some(token.clone());
        Ok(token)
    }

    /// Drop the cached token, e.g. after Key Vault rejected it
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }

    async fn acquire(&self) -> Result<AccessToken, TokenError> {
        let response = match &self.credentials.identity {
            Identity::ServicePrincipal {
                tenant_id,
                client_id,
                client_secret,
            } => {
                let url = format!(
                    "{}/{}/oauth2/v2.0/token",
                    self.credentials.cloud.authority_host(),
                    tenant_id
                );
                let scope = format!("{}/.default", self.resource);
                let form = [
                    ("grant_type", "client_credentials"),
                    ("client_id", client_id.as_str()),
                    ("client_secret", client_secret.expose()),
                    ("scope", scope.as_str()),
                ];
                self.http.post(url).form(&form).send().await?
            }
            Identity::ManagedIdentity { client_id } => {
                let mut query = vec![
                    ("api-version", IMDS_API_VERSION),
                    ("resource", self.resource.as_str()),
                ];
                if let Some(client_id) = client_id {
                    query.push(("client_id", client_id.as_str()));
                }
                self.http
                    .get(IMDS_TOKEN_ENDPOINT)
                    .header("Metadata", "true")
                    .query(&query)
                    .send()
                    .await?
            }
        };

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            info!(
                "Azure AD rejected token request for {} identity with HTTP {}",
                self.credentials.identity.kind(),
                status.as_u16()
            );
            return Err(TokenError::Rejected {
                status: status.as_u16(),
                detail: error_detail(&body),
            });
        }
        parse_token_response(&body)
    }
}

/// Extract `error_description` or `error` from an AAD error body without echoing the rest
fn error_detail(body: &str) -> String {
    #[derive(Deserialize)]
    struct AadError {
        error: Option<String>,
        error_description: Option<String>,
    }
    serde_json::from_str::<AadError>(body)
        .ok()
        .and_then(|e| e.error_description.or(e.error))
        .map(|d| d.lines().next().unwrap_or_default().to_string())
        .unwrap_or_else(|| "no error detail".to_string())
}
