//! OIDC issuer discovery, memoized for the life of the process.

use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::OnceCell;
use url::Url;

use crate::error::DiscoveryError;
use crate::oauth::OAuthConfig;

const WELL_KNOWN_PATH: &str = ".well-known/openid-configuration";

/// Issuer endpoints plus the client credentials used against them.
///
/// Immutable once discovered; a restart is the only refresh path.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ProviderMetadata {
    pub issuer: Url,
    pub authorization_endpoint: Url,
    pub token_endpoint: Url,
    pub client_id: String,
    pub client_secret: Option<String>,
    /// Empty when the issuer does not advertise the field.
    pub code_challenge_methods_supported: Vec<String>,
}

impl ProviderMetadata {
    /// Whether the issuer accepts `method` as a PKCE challenge method.
    ///
    /// Issuers that do not advertise their methods are assumed to accept it.
    #[must_use]
    pub fn supports_challenge_method(&self, method: &str) -> bool {
        self.code_challenge_methods_supported.is_empty()
            || self
                .code_challenge_methods_supported
                .iter()
                .any(|m| m == method)
    }
}

#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    issuer: String,
    #[serde(default)]
    authorization_endpoint: Option<String>,
    #[serde(default)]
    token_endpoint: Option<String>,
    #[serde(default)]
    code_challenge_methods_supported: Vec<String>,
}

/// Single-flight, process-wide cache of [`ProviderMetadata`].
///
/// Concurrent first callers share one discovery request. A failed discovery
/// leaves the cache empty so the next call starts over.
pub struct MetadataCache {
    http: reqwest::Client,
    issuer: Url,
    client_id: String,
    client_secret: Option<String>,
    cell: OnceCell<Arc<ProviderMetadata>>,
}

impl MetadataCache {
    #[must_use]
    pub fn new(config: &OAuthConfig, http: reqwest::Client) -> Self {
        Self {
            http,
            issuer: config.issuer().clone(),
            client_id: config.client_id().to_owned(),
            client_secret: config.client_secret().map(str::to_owned),
            cell: OnceCell::new(),
        }
    }

    /// Provider metadata, discovering it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError`] if the well-known document cannot be fetched
    /// or does not describe the configured issuer. The failure is not cached.
    pub async fn configuration(&self) -> Result<Arc<ProviderMetadata>, DiscoveryError> {
        self.cell
            .get_or_try_init(|| async {
                let metadata = self.discover().await.inspect_err(|e| {
                    tracing::warn!(issuer = %self.issuer, error = %e, "OIDC discovery failed");
                })?;
                tracing::info!(
                    issuer = %metadata.issuer,
                    token_endpoint = %metadata.token_endpoint,
                    "OIDC provider metadata discovered"
                );
                Ok::<_, DiscoveryError>(Arc::new(metadata))
            })
            .await
            .cloned()
    }

    /// Metadata if a discovery already succeeded.
    #[must_use]
    pub fn cached(&self) -> Option<Arc<ProviderMetadata>> {
        self.cell.get().cloned()
    }

    async fn discover(&self) -> Result<ProviderMetadata, DiscoveryError> {
        let url = well_known_url(&self.issuer)?;
        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(DiscoveryError::Status(response.status().as_u16()));
        }
        let document: DiscoveryDocument = response
            .json()
            .await
            .map_err(|e| DiscoveryError::InvalidMetadata(e.to_string()))?;

        self.validate(document)
    }

    fn validate(&self, document: DiscoveryDocument) -> Result<ProviderMetadata, DiscoveryError> {
        if !same_issuer(&document.issuer, self.issuer.as_str()) {
            return Err(DiscoveryError::InvalidMetadata(format!(
                "issuer mismatch: expected '{}', got '{}'",
                self.issuer, document.issuer
            )));
        }

        Ok(ProviderMetadata {
            issuer: self.issuer.clone(),
            authorization_endpoint: required_endpoint(
                "authorization_endpoint",
                document.authorization_endpoint,
            )?,
            token_endpoint: required_endpoint("token_endpoint", document.token_endpoint)?,
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            code_challenge_methods_supported: document.code_challenge_methods_supported,
        })
    }
}

fn well_known_url(issuer: &Url) -> Result<Url, DiscoveryError> {
    let base = issuer.as_str().trim_end_matches('/');
    format!("{base}/{WELL_KNOWN_PATH}")
        .parse()
        .map_err(|e| DiscoveryError::InvalidMetadata(format!("issuer URL: {e}")))
}

fn same_issuer(a: &str, b: &str) -> bool {
    a.trim_end_matches('/') == b.trim_end_matches('/')
}

fn required_endpoint(name: &str, value: Option<String>) -> Result<Url, DiscoveryError> {
    let value =
        value.ok_or_else(|| DiscoveryError::InvalidMetadata(format!("missing {name}")))?;
    value
        .parse()
        .map_err(|e| DiscoveryError::InvalidMetadata(format!("{name}: {e}")))
}
