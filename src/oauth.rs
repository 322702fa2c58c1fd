use serde::Deserialize;
use url::Url;

use crate::discovery::ProviderMetadata;
use crate::error::{OAuthErrorFields, ProviderError};
use crate::pkce::CODE_CHALLENGE_METHOD;
use crate::types::{AccessToken, AuthorizationState};

/// `OAuth2` client configuration.
///
/// Required fields are constructor parameters; optional ones use `with_*`.
///
/// ```rust,ignore
/// use console_gateway::OAuthConfig;
///
/// let config = OAuthConfig::new(
///     "https://idp.example.com/realms/console".parse()?,
///     "console",
///     "https://console.example.com/auth/code".parse()?,
/// )
/// .with_client_secret("s3cret");
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct OAuthConfig {
    pub(crate) issuer: Url,
    pub(crate) client_id: String,
    pub(crate) client_secret: Option<String>,
    pub(crate) redirect_uri: Url,
    pub(crate) scopes: Vec<String>,
}

impl OAuthConfig {
    #[must_use]
    pub fn new(issuer: Url, client_id: impl Into<String>, redirect_uri: Url) -> Self {
        Self {
            issuer,
            client_id: client_id.into(),
            client_secret: None,
            redirect_uri,
            scopes: ["openid", "profile", "email", "offline_access"]
                .map(String::from)
                .to_vec(),
        }
    }

    /// Confidential client secret, sent with HTTP Basic auth to the token endpoint.
    #[must_use]
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    /// Override the `OAuth2` scopes (default: `openid profile email offline_access`).
    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    #[must_use]
    pub fn issuer(&self) -> &Url {
        &self.issuer
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn client_secret(&self) -> Option<&str> {
        self.client_secret.as_deref()
    }

    /// The fixed callback URL registered with the provider.
    #[must_use]
    pub fn redirect_uri(&self) -> &Url {
        &self.redirect_uri
    }

    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// Scopes joined for the `scope` parameter.
    #[must_use]
    pub fn scope(&self) -> String {
        self.scopes.join(" ")
    }
}

/// Token endpoint response.
#[derive(Debug, Clone, Deserialize)]
#[non_exhaustive]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenResponse {
    /// Convert into the session token, requiring the fields refresh depends on.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Processing`] if `refresh_token` or
    /// `expires_in` is missing, or [`ProviderError::UnsupportedOperation`]
    /// for a non-bearer token type.
    pub fn into_access_token(self, now_ms: i64) -> Result<AccessToken, ProviderError> {
        if !self.token_type.eq_ignore_ascii_case("bearer") {
            return Err(ProviderError::UnsupportedOperation(format!(
                "unsupported token_type '{}'",
                self.token_type
            )));
        }
        let refresh_token = self.refresh_token.ok_or_else(|| {
            ProviderError::Processing("token response is missing refresh_token".into())
        })?;
        let expires_in = self.expires_in.ok_or_else(|| {
            ProviderError::Processing("token response is missing expires_in".into())
        })?;
        Ok(AccessToken::new(
            self.access_token,
            refresh_token,
            now_ms,
            expires_in,
        ))
    }
}

/// `OAuth2` client for the provider's authorization and token endpoints.
pub struct AuthClient {
    http: reqwest::Client,
    redirect_uri: Url,
}

impl AuthClient {
    #[must_use]
    pub fn new(config: &OAuthConfig, http: reqwest::Client) -> Self {
        Self {
            http,
            redirect_uri: config.redirect_uri.clone(),
        }
    }

    /// Build the authorization-endpoint URL for `state`.
    #[must_use]
    pub fn authorization_url(
        &self,
        metadata: &ProviderMetadata,
        state: &AuthorizationState,
        scope: &str,
    ) -> Url {
        let mut url = metadata.authorization_endpoint.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &metadata.client_id)
            .append_pair("redirect_uri", self.redirect_uri.as_str())
            .append_pair("state", &state.id)
            .append_pair("code_challenge", &state.code_challenge())
            .append_pair("code_challenge_method", CODE_CHALLENGE_METHOD)
            .append_pair("scope", scope);
        url
    }

    /// Exchange an authorization code for tokens using PKCE.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Http`] on network failure,
    /// [`ProviderError::ResponseBody`] if the token endpoint returns an OAuth
    /// error, or [`ProviderError::Processing`] for any other unusable answer.
    pub async fn exchange_code(
        &self,
        metadata: &ProviderMetadata,
        code: &str,
        code_verifier: &str,
    ) -> Result<TokenResponse, ProviderError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("code_verifier", code_verifier),
        ];
        self.token_request(metadata, &params, "token exchange")
            .await
    }

    /// Redeem a refresh token for a new token set.
    ///
    /// # Errors
    ///
    /// Same classification as [`exchange_code`](Self::exchange_code).
    pub async fn refresh_token(
        &self,
        metadata: &ProviderMetadata,
        refresh_token: &str,
        scope: Option<&str>,
    ) -> Result<TokenResponse, ProviderError> {
        let mut params = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        if let Some(scope) = scope {
            params.push(("scope", scope));
        }
        self.token_request(metadata, &params, "token refresh").await
    }

    async fn token_request(
        &self,
        metadata: &ProviderMetadata,
        params: &[(&str, &str)],
        operation: &'static str,
    ) -> Result<TokenResponse, ProviderError> {
        let mut request = self
            .http
            .post(metadata.token_endpoint.clone())
            .header(reqwest::header::ACCEPT, "application/json");

        request = match &metadata.client_secret {
            Some(secret) => request
                .basic_auth(&metadata.client_id, Some(secret))
                .form(params),
            None => {
                let mut with_client: Vec<(&str, &str)> = params.to_vec();
                with_client.push(("client_id", metadata.client_id.as_str()));
                request.form(&with_client)
            }
        };

        let response = request.send().await?;
        let response = Self::ensure_success(response, operation).await?;
        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| ProviderError::Processing(format!("{operation}: invalid JSON: {e}")))
    }

    /// Checks HTTP response status; returns the response on success or a classified error.
    async fn ensure_success(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<reqwest::Response, ProviderError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<OAuthErrorFields>(&body) {
            Ok(fields) => Err(ProviderError::ResponseBody { status, fields }),
            Err(_) => Err(ProviderError::Processing(format!(
                "{operation}: unexpected status {status}"
            ))),
        }
    }
}

/// Validate the provider's redirect back to the callback and extract the code.
///
/// Checks run in order: `state` must equal `expected_state`; `iss`, when
/// present, must name `issuer`; an `error` parameter is reported as
/// [`ProviderError::AuthorizationResponse`]; `code` must be present.
///
/// # Errors
///
/// Returns the first failed check as a [`ProviderError`].
pub fn validate_callback(
    callback: &Url,
    expected_state: &str,
    issuer: &Url,
) -> Result<String, ProviderError> {
    let param = |name: &str| {
        callback
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    };

    match param("state") {
        Some(state) if state == expected_state => {}
        Some(_) => return Err(ProviderError::Processing("state mismatch".into())),
        None => return Err(ProviderError::Processing("missing state parameter".into())),
    }

    if let Some(iss) = param("iss")
        && iss.trim_end_matches('/') != issuer.as_str().trim_end_matches('/')
    {
        return Err(ProviderError::Processing(format!(
            "unexpected iss parameter '{iss}'"
        )));
    }

    if let Some(error) = param("error") {
        return Err(ProviderError::AuthorizationResponse(OAuthErrorFields {
            error,
            error_description: param("error_description"),
            error_uri: param("error_uri"),
        }));
    }

    param("code").ok_or_else(|| ProviderError::Processing("missing code parameter".into()))
}
