//! # Azure Key Vault Client
//!
//! Native REST client for the Key Vault data plane (API version 7.4).
//!
//! Only reads are issued:
//! - `GET /secrets/{name}/{version}`
//! - `GET /keys/{name}/{version}`
//! - `GET /certificates/{name}/{version}`, followed by a read of the certificate's
//!   backing secret (`sid`) for the private key
//!
//! The object version is the last path segment of the returned `id` (`kid` for keys).
//!
//! References:
//! - [Key Vault REST API](https://learn.microsoft.com/rest/api/keyvault/)

use super::token::{TokenError, TokenProvider};
use crate::constants::KEY_VAULT_API_VERSION;
use crate::credentials::CredentialSet;
use crate::observability::metrics;
use crate::provider::{FetchedObject, ObjectMaterial, ObjectRequest, VaultError, VaultService};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info_span, warn, Instrument};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// `GET /secrets/...` response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SecretBundle {
    id: String,
    #[serde(default)]
    value: String,
    #[serde(default)]
    content_type: Option<String>,
}

/// `GET /keys/...` response
#[derive(Debug, Deserialize)]
struct KeyBundle {
    key: serde_json::Value,
}

/// `GET /certificates/...` response
#[derive(Debug, Deserialize)]
struct CertificateBundle {
    id: String,
    /// Backing secret id
    sid: String,
    /// Public certificate, base64url DER
    cer: String,
}

/// `{"error": {"code": ..., "message": ...}}`
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Key Vault data-plane client shared by all workers
pub struct KeyVaultClient {
    http: reqwest::Client,
    tokens: TokenProvider,
    dns_suffix: &'static str,
}

impl std::fmt::Debug for KeyVaultClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyVaultClient")
            .field("dns_suffix", &self.dns_suffix)
            .field("tokens", &self.tokens)
            .finish()
    }
}

impl KeyVaultClient {
    /// Build a client for the cloud and identity in `credentials`
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(credentials: Arc<CredentialSet>) -> Result<Self, anyhow::Error> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("azure-keyvault-controller/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let resource = credentials.cloud.key_vault_resource();
        let dns_suffix = credentials.cloud.key_vault_dns_suffix();
        Ok(Self {
            tokens: TokenProvider::new(http.clone(), credentials, resource),
            http,
            dns_suffix,
        })
    }

    fn object_url(&self, collection: &str, request: &ObjectRequest) -> String {
        object_url(self.dns_suffix, collection, request)
    }

    /// GET a Key Vault URL and return the body of a 2xx response
    ///
    /// A 401 is retried once with a freshly acquired token.
    async fn get(&self, url: &str, request: &ObjectRequest) -> Result<String, VaultError> {
        let (status, body) = retry_unauthorized_once(
            move || self.send(url, request),
            move || async move {
                debug!("Key Vault rejected the cached token for {}, acquiring a new one", request);
                self.tokens.invalidate().await;
            },
        )
        .await?;

        if (200..300).contains(&status) {
            return Ok(body);
        }
        if status == 401 {
            // A revoked or rotated token is not retried from cache
            self.tokens.invalidate().await;
        }
        Err(VaultError::from_status(request, status, &error_detail(&body)))
    }

    /// One authorized GET, returning the status and body
    async fn send(&self, url: &str, request: &ObjectRequest) -> Result<(u16, String), VaultError> {
        let token = self.tokens.token().await.map_err(|e| token_error(request, &e))?;

        let response = self
            .http
            .get(url)
            .bearer_auth(token.secret())
            .send()
            .await
            .map_err(|e| VaultError::Transient {
                object: request.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| VaultError::Transient {
            object: request.to_string(),
            reason: e.to_string(),
        })?;
        Ok((status, body))
    }

    async fn instrumented<F>(&self, request: &ObjectRequest, fetch: F) -> Result<FetchedObject, VaultError>
    where
        F: std::future::Future<Output = Result<FetchedObject, VaultError>>,
    {
        let span = info_span!(
            "azure.keyvault.get",
            vault.name = request.vault_name.as_str(),
            object.name = request.object_name.as_str(),
            object.r#type = request.object_type.as_str(),
        );
        let start = Instant::now();
        let result = fetch.instrument(span).await;
        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.kind(),
        };
        metrics::record_vault_operation(
            request.object_type.as_str(),
            outcome,
            start.elapsed().as_secs_f64(),
        );
        match &result {
            Ok(fetched) => debug!("Read {} at version {}", request, fetched.version),
            Err(e) => warn!("{}", e),
        }
        result
    }
}

#[async_trait]
impl VaultService for KeyVaultClient {
    async fn get_secret(&self, request: &ObjectRequest) -> Result<FetchedObject, VaultError> {
        self.instrumented(request, async {
            let body = self.get(&self.object_url("secrets", request), request).await?;
            let bundle: SecretBundle = parse(request, &body)?;
            Ok(FetchedObject {
                version: version_from_id(&bundle.id),
                material: ObjectMaterial::Secret {
                    value: bundle.value,
                    content_type: bundle.content_type,
                },
            })
        })
        .await
    }

    async fn get_key(&self, request: &ObjectRequest) -> Result<FetchedObject, VaultError> {
        self.instrumented(request, async {
            let body = self.get(&self.object_url("keys", request), request).await?;
            let bundle: KeyBundle = parse(request, &body)?;
            let kid = bundle
                .key
                .get("kid")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string();
            Ok(FetchedObject {
                version: version_from_id(&kid),
                material: ObjectMaterial::Key {
                    jwk: bundle.key.to_string(),
                },
            })
        })
        .await
    }

    async fn get_certificate(&self, request: &ObjectRequest) -> Result<FetchedObject, VaultError> {
        self.instrumented(request, async {
            let body = self
                .get(&self.object_url("certificates", request), request)
                .await?;
            let certificate: CertificateBundle = parse(request, &body)?;

            let secret_url = format!("{}?api-version={}", certificate.sid, KEY_VAULT_API_VERSION);
            let body = self.get(&secret_url, request).await?;
            let secret: SecretBundle = parse(request, &body)?;

            Ok(FetchedObject {
                version: version_from_id(&certificate.id),
                material: ObjectMaterial::Certificate {
                    cer: certificate.cer,
                    secret_value: secret.value,
                    content_type: secret.content_type,
                },
            })
        })
        .await
    }
}

fn object_url(dns_suffix: &str, collection: &str, request: &ObjectRequest) -> String {
    let version = request.version.as_deref().unwrap_or_default();
    format!(
        "https://{}.{}/{}/{}/{}?api-version={}",
        request.vault_name, dns_suffix, collection, request.object_name, version, KEY_VAULT_API_VERSION
    )
}

/// Last path segment of a Key Vault object id
fn version_from_id(id: &str) -> String {
    id.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

fn parse<T: serde::de::DeserializeOwned>(request: &ObjectRequest, body: &str) -> Result<T, VaultError> {
    serde_json::from_str(body).map_err(|e| VaultError::Transient {
        object: request.to_string(),
        reason: format!("unexpected response body: {e}"),
    })
}

fn error_detail(body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => format!("{}: {}", envelope.error.code, envelope.error.message),
        Err(_) => "no error detail".to_string(),
    }
}

fn token_error(request: &ObjectRequest, error: &TokenError) -> VaultError {
    VaultError::Auth {
        object: request.to_string(),
        reason: format!("could not acquire Azure AD token: {error}"),
    }
}

/// Run `send`, and once more after `refresh` if the first answer is a 401
async fn retry_unauthorized_once<S, SF, R, RF>(send: S, refresh: R) -> Result<(u16, String), VaultError>
where
    S: Fn() -> SF,
    SF: std::future::Future<Output = Result<(u16, String), VaultError>>,
    R: FnOnce() -> RF,
    RF: std::future::Future<Output = ()>,
{
    let first = send().await?;
    if first.0 != 401 {
        return Ok(first);
    }
    refresh().await;
    send().await
}
