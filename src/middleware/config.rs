use std::time::Duration;

use url::Url;

use super::error::AuthError;
use crate::oauth::OAuthConfig;
use crate::session::SessionSettings;

const DEFAULT_SCOPES: &str = "openid profile email offline_access";

/// Route and redirect settings used by both config and runtime state.
#[derive(Clone)]
pub(crate) struct GatewaySettings {
    pub(crate) auth_path: String,
    pub(crate) api_prefix: String,
    pub(crate) login_redirect: String,
    pub(crate) logout_redirect: String,
    pub(crate) error_redirect: String,
    pub(crate) http_timeout: Duration,
    pub(crate) connect_timeout: Duration,
}

impl GatewaySettings {
    fn defaults() -> Self {
        Self {
            auth_path: "/auth".into(),
            api_prefix: "/api".into(),
            login_redirect: "/".into(),
            logout_redirect: "/".into(),
            error_redirect: "/login/error".into(),
            http_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Gateway configuration.
///
/// Required values are constructor parameters; optional ones use `with_*`.
/// The public origin of the console is the origin of the OAuth redirect URI,
/// which must point at `<auth_path>/code`.
///
/// Use [`from_env()`](GatewayConfig::from_env) for convention-based setup.
pub struct GatewayConfig {
    pub(super) oauth: OAuthConfig,
    pub(super) backend_url: Url,
    pub(super) session: SessionSettings,
    pub(super) settings: GatewaySettings,
}

impl GatewayConfig {
    #[must_use]
    pub fn new(oauth: OAuthConfig, backend_url: Url, session: SessionSettings) -> Self {
        Self {
            oauth,
            backend_url,
            session,
            settings: GatewaySettings::defaults(),
        }
    }

    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `GATEWAY_ISSUER_URI`: OIDC issuer
    /// - `GATEWAY_CLIENT_ID`: OAuth2 client ID
    /// - `GATEWAY_PUBLIC_URL`: public origin of the console
    /// - `GATEWAY_BACKEND_URL`: backend API base URL
    /// - `GATEWAY_AUTH_SESSION_SECRET`, `GATEWAY_TOKEN_SESSION_SECRET`:
    ///   distinct cookie secrets of at least 32 bytes
    ///
    /// # Optional env vars
    /// - `GATEWAY_CLIENT_SECRET`: confidential client secret
    /// - `GATEWAY_SCOPES`: space or comma separated scopes
    /// - `GATEWAY_DEV`: `"1"` or `"true"` disables secure cookies
    /// - `GATEWAY_HTTP_TIMEOUT_SECS`: outbound request timeout (default 30)
    /// - `GATEWAY_TOKEN_TTL_DAYS`: token cookie lifetime (default 30)
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if required env vars are missing or a
    /// value is invalid.
    pub fn from_env() -> Result<Self, AuthError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, AuthError> {
        let required = |name: &str| {
            var(name)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| AuthError::Config(format!("{name} is required")))
        };
        let url = |name: &str| -> Result<Url, AuthError> {
            required(name)?
                .parse()
                .map_err(|e| AuthError::Config(format!("{name}: {e}")))
        };

        let issuer = url("GATEWAY_ISSUER_URI")?;
        let client_id = required("GATEWAY_CLIENT_ID")?;
        let public_url = url("GATEWAY_PUBLIC_URL")?;
        let backend_url = url("GATEWAY_BACKEND_URL")?;
        let auth_secret = required("GATEWAY_AUTH_SESSION_SECRET")?;
        let token_secret = required("GATEWAY_TOKEN_SESSION_SECRET")?;

        let settings = GatewaySettings::defaults();
        let redirect_uri = callback_uri(&public_url, &settings.auth_path)?;

        let scopes = var("GATEWAY_SCOPES").unwrap_or_else(|| DEFAULT_SCOPES.into());
        let mut oauth =
            OAuthConfig::new(issuer, client_id, redirect_uri).with_scopes(parse_scopes(&scopes));
        if let Some(secret) = var("GATEWAY_CLIENT_SECRET").filter(|s| !s.is_empty()) {
            oauth = oauth.with_client_secret(secret);
        }

        let dev = matches!(var("GATEWAY_DEV").as_deref(), Some("1" | "true"));
        let token_ttl_days = parse_number(&var, "GATEWAY_TOKEN_TTL_DAYS", 30)?;
        let timeout_secs = parse_number(&var, "GATEWAY_HTTP_TIMEOUT_SECS", 30)?;

        let session = SessionSettings::new(
            auth_secret.as_bytes(),
            token_secret.as_bytes(),
            token_ttl_days,
        )
        .map_err(|e| AuthError::Config(format!("session settings: {e}")))?
        .with_secure_cookies(!dev);

        if dev {
            tracing::warn!("Development mode: session cookies are not marked Secure");
        }

        Ok(Self::new(oauth, backend_url, session)
            .with_http_timeout(Duration::from_secs(timeout_secs.unsigned_abs())))
    }

    #[must_use]
    pub fn oauth(&self) -> &OAuthConfig {
        &self.oauth
    }

    #[must_use]
    pub fn backend_url(&self) -> &Url {
        &self.backend_url
    }

    #[must_use]
    pub fn auth_path(&self) -> &str {
        &self.settings.auth_path
    }

    /// Mount point of the auth routes. Keep the OAuth redirect URI in sync.
    #[must_use]
    pub fn with_auth_path(mut self, path: impl Into<String>) -> Self {
        self.settings.auth_path = path.into();
        self
    }

    #[must_use]
    pub fn with_api_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.settings.api_prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn with_login_redirect(mut self, path: impl Into<String>) -> Self {
        self.settings.login_redirect = path.into();
        self
    }

    #[must_use]
    pub fn with_logout_redirect(mut self, path: impl Into<String>) -> Self {
        self.settings.logout_redirect = path.into();
        self
    }

    #[must_use]
    pub fn with_error_redirect(mut self, path: impl Into<String>) -> Self {
        self.settings.error_redirect = path.into();
        self
    }

    #[must_use]
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.settings.http_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.settings.connect_timeout = timeout;
        self
    }
}

/// `<public_url>/<auth_path>/code`.
fn callback_uri(public_url: &Url, auth_path: &str) -> Result<Url, AuthError> {
    public_url
        .join(&format!("{}/code", auth_path.trim_end_matches('/')))
        .map_err(|e| AuthError::Config(format!("GATEWAY_PUBLIC_URL: {e}")))
}

fn parse_scopes(raw: &str) -> Vec<String> {
    raw.split([' ', ','])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_number(
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: i64,
) -> Result<i64, AuthError> {
    match var(name) {
        None => Ok(default),
        Some(raw) => match raw.trim().parse::<i64>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(AuthError::Config(format!(
                "{name} must be a positive integer, got {raw:?}"
            ))),
        },
    }
}
