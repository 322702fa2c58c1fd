//! Authorization-code flow with PKCE: authorize, then exchange on callback.

use std::sync::Arc;

use url::Url;

use crate::discovery::MetadataCache;
use crate::error::{DiscoveryError, ErrorCode, OAuthErrorFields, ProviderError, SessionError};
use crate::oauth::{self, AuthClient};
use crate::pkce::CODE_CHALLENGE_METHOD;
use crate::session::{Bucket, STATE_KEY, SessionStore, TOKEN_KEY};
use crate::types::{AuthorizationState, now_millis};

/// Failure of [`AuthorizationFlow::authorize`] or [`AuthorizationFlow::exchange`].
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// Callback arrived without a login in progress: stale tab, replayed
    /// callback, or a forged request.
    #[error("no authorization in progress")]
    MissingAuthorizationState,

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("provider discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl FlowError {
    /// Code forwarded to the error page.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::MissingAuthorizationState => ErrorCode::MissingAuthorizationState,
            Self::Provider(e) => ErrorCode::from(e),
            Self::Discovery(_) | Self::Session(_) => ErrorCode::InternalError,
        }
    }

    /// Provider-reported `error`, `error_description`, `error_uri`, if any.
    #[must_use]
    pub fn oauth_fields(&self) -> Option<&OAuthErrorFields> {
        match self {
            Self::Provider(e) => e.oauth_fields(),
            _ => None,
        }
    }
}

/// Orchestrates authorize → redirect → callback → token exchange.
pub struct AuthorizationFlow {
    metadata: Arc<MetadataCache>,
    client: Arc<AuthClient>,
}

impl AuthorizationFlow {
    #[must_use]
    pub fn new(metadata: Arc<MetadataCache>, client: Arc<AuthClient>) -> Self {
        Self { metadata, client }
    }

    /// Start a login for `intended_uri` and return the provider URL to redirect to.
    ///
    /// The new [`AuthorizationState`] is written to the session before the URL
    /// is returned and replaces any login already in progress.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::Discovery`] if provider metadata is unavailable,
    /// [`FlowError::Provider`] if the provider cannot do `S256` PKCE, or
    /// [`FlowError::Session`] if the state cannot be stored.
    pub async fn authorize<S: SessionStore>(
        &self,
        session: &mut S,
        intended_uri: &str,
        scope: &str,
    ) -> Result<Url, FlowError> {
        let metadata = self.metadata.configuration().await?;
        if !metadata.supports_challenge_method(CODE_CHALLENGE_METHOD) {
            return Err(ProviderError::UnsupportedOperation(format!(
                "provider does not support {CODE_CHALLENGE_METHOD} code challenges"
            ))
            .into());
        }

        let state = AuthorizationState::generate(intended_uri);
        let url = self.client.authorization_url(&metadata, &state, scope);

        if session
            .get::<AuthorizationState>(Bucket::Authorization, STATE_KEY)
            .is_some()
        {
            tracing::debug!("Replacing authorization already in progress");
        }
        session.set(Bucket::Authorization, STATE_KEY, &state)?;

        Ok(url)
    }

    /// Complete the login from the provider's redirect to the callback.
    ///
    /// Consumes the stored [`AuthorizationState`] whatever the outcome, so a
    /// callback can never be replayed. On success the access token is stored
    /// and the originally intended URI is returned.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::MissingAuthorizationState`] without a login in
    /// progress, [`FlowError::Provider`] for an invalid callback or a failed
    /// grant, [`FlowError::Discovery`] or [`FlowError::Session`] otherwise.
    pub async fn exchange<S: SessionStore>(
        &self,
        session: &mut S,
        callback_uri: &Url,
    ) -> Result<String, FlowError> {
        let state: AuthorizationState = session
            .get(Bucket::Authorization, STATE_KEY)
            .ok_or(FlowError::MissingAuthorizationState)?;
        session.remove(Bucket::Authorization, STATE_KEY);

        let metadata = self.metadata.configuration().await?;
        let code = oauth::validate_callback(callback_uri, &state.id, &metadata.issuer)?;

        let token = self
            .client
            .exchange_code(&metadata, &code, &state.verifier)
            .await?
            .into_access_token(now_millis())?;

        session.set(Bucket::Token, TOKEN_KEY, &token)?;
        Ok(state.uri)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::oauth::OAuthConfig;
    use crate::session::tests::settings;
    use crate::session::{CookieSession, SessionData};
    use crate::types::AccessToken;

    pub(crate) const REDIRECT_URI: &str = "https://console.example.com/auth/code";

    pub(crate) async fn mock_provider() -> MockServer {
        let server = MockServer::start().await;
        let issuer = format!("{}/realms/console", server.uri());
        Mock::given(method("GET"))
            .and(path("/realms/console/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issuer": issuer,
                "authorization_endpoint": format!("{issuer}/auth"),
                "token_endpoint": format!("{issuer}/token"),
                "code_challenge_methods_supported": ["S256"],
            })))
            .mount(&server)
            .await;
        server
    }

    pub(crate) fn oauth_config(server: &MockServer) -> OAuthConfig {
        OAuthConfig::new(
            format!("{}/realms/console", server.uri()).parse().unwrap(),
            "console",
            REDIRECT_URI.parse().unwrap(),
        )
        .with_client_secret("s3cret")
    }

    fn flow(server: &MockServer) -> AuthorizationFlow {
        let config = oauth_config(server);
        let http = reqwest::Client::new();
        AuthorizationFlow::new(
            Arc::new(MetadataCache::new(&config, http.clone())),
            Arc::new(AuthClient::new(&config, http)),
        )
    }

    async fn mount_token(server: &MockServer, body: serde_json::Value, status: u16) {
        Mock::given(method("POST"))
            .and(path("/realms/console/token"))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(server)
            .await;
    }

    fn param(url: &Url, name: &str) -> String {
        url.query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
            .unwrap()
    }

    fn callback(query: &str) -> Url {
        format!("{REDIRECT_URI}?{query}").parse().unwrap()
    }

    #[tokio::test]
    async fn authorize_stores_state_before_returning_url() {
        let server = mock_provider().await;
        let flow = flow(&server);
        let mut session = CookieSession::new(settings());

        let url = flow
            .authorize(&mut session, "https://app/x", "openid")
            .await
            .unwrap();

        let stored = SessionData::load(&session).state.expect("state stored");
        assert_eq!(stored.uri, "https://app/x");
        assert_eq!(param(&url, "state"), stored.id);
        assert_eq!(param(&url, "code_challenge"), stored.code_challenge());
        assert!(url.path().ends_with("/realms/console/auth"));
    }

    #[tokio::test]
    async fn second_authorize_overwrites_first() {
        let server = mock_provider().await;
        let flow = flow(&server);
        let mut session = CookieSession::new(settings());

        flow.authorize(&mut session, "/first", "openid").await.unwrap();
        let url = flow.authorize(&mut session, "/second", "openid").await.unwrap();

        let stored = SessionData::load(&session).state.unwrap();
        assert_eq!(stored.uri, "/second");
        assert_eq!(param(&url, "state"), stored.id);
    }

    #[tokio::test]
    async fn happy_path_then_replay() {
        let server = mock_provider().await;
        Mock::given(method("POST"))
            .and(path("/realms/console/token"))
            .and(body_string_contains("code=abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at",
                "token_type": "Bearer",
                "expires_in": 300,
                "refresh_token": "rt",
            })))
            .expect(1)
            .mount(&server)
            .await;
        let flow = flow(&server);
        let mut session = CookieSession::new(settings());

        let url = flow
            .authorize(&mut session, "https://app/x", "openid")
            .await
            .unwrap();
        let cb = callback(&format!("code=abc&state={}", param(&url, "state")));

        let intended = flow.exchange(&mut session, &cb).await.unwrap();
        assert_eq!(intended, "https://app/x");

        let data = SessionData::load(&session);
        assert!(data.state.is_none());
        let token: AccessToken = data.token.expect("authenticated");
        assert_eq!(token.access_token, "at");

        let replay = flow.exchange(&mut session, &cb).await.unwrap_err();
        assert!(matches!(replay, FlowError::MissingAuthorizationState));
        assert_eq!(replay.code().as_str(), "missing_authorization_state");
    }

    #[tokio::test]
    async fn exchange_without_state_is_missing_authorization_state() {
        let server = mock_provider().await;
        let mut session = CookieSession::new(settings());

        let err = flow(&server)
            .exchange(&mut session, &callback("code=abc&state=xyz"))
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::MissingAuthorizationState));
    }

    #[tokio::test]
    async fn state_mismatch_clears_state() {
        let server = mock_provider().await;
        let flow = flow(&server);
        let mut session = CookieSession::new(settings());
        flow.authorize(&mut session, "/x", "openid").await.unwrap();

        let err = flow
            .exchange(&mut session, &callback("code=abc&state=forged"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ProcessingError);
        assert_eq!(SessionData::load(&session), SessionData::default());
    }

    #[tokio::test]
    async fn provider_denial_forwards_oauth_fields() {
        let server = mock_provider().await;
        let flow = flow(&server);
        let mut session = CookieSession::new(settings());
        let url = flow.authorize(&mut session, "/x", "openid").await.unwrap();

        let cb = callback(&format!(
            "state={}&error=access_denied&error_description=denied",
            param(&url, "state")
        ));
        let err = flow.exchange(&mut session, &cb).await.unwrap_err();

        assert_eq!(err.code(), ErrorCode::AuthorizationResponseError);
        let fields = err.oauth_fields().unwrap();
        assert_eq!(fields.error, "access_denied");
        assert_eq!(fields.error_description.as_deref(), Some("denied"));
        assert!(SessionData::load(&session).state.is_none());
    }

    #[tokio::test]
    async fn reused_code_is_response_body_error() {
        let server = mock_provider().await;
        mount_token(&server, json!({"error": "invalid_grant"}), 400).await;
        let flow = flow(&server);
        let mut session = CookieSession::new(settings());
        let url = flow.authorize(&mut session, "/x", "openid").await.unwrap();

        let cb = callback(&format!("code=used&state={}", param(&url, "state")));
        let err = flow.exchange(&mut session, &cb).await.unwrap_err();

        assert_eq!(err.code(), ErrorCode::ResponseBodyError);
        assert_eq!(SessionData::load(&session), SessionData::default());
    }

    #[tokio::test]
    async fn token_without_refresh_token_is_rejected() {
        let server = mock_provider().await;
        mount_token(
            &server,
            json!({"access_token": "at", "token_type": "Bearer", "expires_in": 60}),
            200,
        )
        .await;
        let flow = flow(&server);
        let mut session = CookieSession::new(settings());
        let url = flow.authorize(&mut session, "/x", "openid").await.unwrap();

        let cb = callback(&format!("code=c&state={}", param(&url, "state")));
        let err = flow.exchange(&mut session, &cb).await.unwrap_err();

        assert_eq!(err.code(), ErrorCode::ProcessingError);
        assert!(SessionData::load(&session).token.is_none());
    }

    #[tokio::test]
    async fn plain_only_provider_is_unsupported() {
        let server = MockServer::start().await;
        let issuer = format!("{}/realms/console", server.uri());
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issuer": issuer,
                "authorization_endpoint": format!("{issuer}/auth"),
                "token_endpoint": format!("{issuer}/token"),
                "code_challenge_methods_supported": ["plain"],
            })))
            .mount(&server)
            .await;

        let mut session = CookieSession::new(settings());
        let err = flow(&server)
            .authorize(&mut session, "/x", "openid")
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnsupportedOperation);
        assert!(SessionData::load(&session).state.is_none());
    }

    #[tokio::test]
    async fn discovery_failure_is_internal_error() {
        let server = MockServer::start().await;
        let mut session = CookieSession::new(settings());
        let err = flow(&server)
            .authorize(&mut session, "/x", "openid")
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::Discovery(_)));
        assert_eq!(err.code(), ErrorCode::InternalError);
    }
}
