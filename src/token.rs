//! Access-token lifecycle: expiry checks, bearer headers, refresh and logout.

use std::sync::Arc;

use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, HeaderValue};

use crate::discovery::MetadataCache;
use crate::error::{AuthenticationError, DiscoveryError, ProviderError};
use crate::session::{Bucket, STATE_KEY, SessionStore, TOKEN_KEY};
use crate::types::{AccessToken, now_millis};

/// Failure of [`TokenManager::refresh`]. The stored token is left untouched.
#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("provider discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Session(#[from] crate::error::SessionError),
}

impl RefreshError {
    /// The provider no longer accepts the refresh token; only a new login helps.
    #[must_use]
    pub fn requires_reauthorization(&self) -> bool {
        matches!(self, Self::Provider(e) if e.is_invalid_grant())
    }
}

/// Tracks the access token in the session and renews it.
pub struct TokenManager {
    metadata: Arc<MetadataCache>,
    client: Arc<crate::oauth::AuthClient>,
}

impl TokenManager {
    #[must_use]
    pub fn new(metadata: Arc<MetadataCache>, client: Arc<crate::oauth::AuthClient>) -> Self {
        Self { metadata, client }
    }

    #[must_use]
    pub fn token<S: SessionStore>(&self, session: &S) -> Option<AccessToken> {
        session.get(Bucket::Token, TOKEN_KEY)
    }

    /// A token is present, expired or not.
    #[must_use]
    pub fn authenticated<S: SessionStore>(&self, session: &S) -> bool {
        self.token(session).is_some()
    }

    /// No token, or `expiresAt <= now_ms`.
    #[must_use]
    pub fn expired_at<S: SessionStore>(&self, session: &S, now_ms: i64) -> bool {
        self.token(session)
            .is_none_or(|token| token.is_expired_at(now_ms))
    }

    #[must_use]
    pub fn expired<S: SessionStore>(&self, session: &S) -> bool {
        self.expired_at(session, now_millis())
    }

    /// Set `Authorization: Bearer <access token>` on an outgoing request.
    ///
    /// # Errors
    ///
    /// Returns [`AuthenticationError`] if the session holds no token. Check
    /// [`authenticated`](Self::authenticated) first.
    pub fn authorize_request<S: SessionStore>(
        &self,
        session: &S,
        headers: &mut HeaderMap,
    ) -> Result<(), AuthenticationError> {
        let token = self.token(session).ok_or(AuthenticationError)?;
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token.access_token))
            .map_err(|_| AuthenticationError)?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
        Ok(())
    }

    /// Redeem the refresh token and replace the stored token wholesale.
    ///
    /// No-op without a token. The authorization state is never touched.
    ///
    /// # Errors
    ///
    /// Returns [`RefreshError`] if the grant fails; the old token stays in
    /// the session and the caller decides whether to force a new login.
    pub async fn refresh<S: SessionStore>(
        &self,
        session: &mut S,
        scope: Option<&str>,
    ) -> Result<(), RefreshError> {
        let Some(current) = self.token(session) else {
            return Ok(());
        };

        let metadata = self.metadata.configuration().await?;
        let renewed = self
            .client
            .refresh_token(&metadata, &current.refresh_token, scope)
            .await
            .inspect_err(|e| tracing::warn!(error = %e, "Token refresh failed"))?
            .into_access_token(now_millis())?;

        session.set(Bucket::Token, TOKEN_KEY, &renewed)?;
        tracing::debug!(expires_at = renewed.expires_at, "Access token refreshed");
        Ok(())
    }

    /// Drop the token, keeping any login in progress.
    pub fn reset<S: SessionStore>(&self, session: &mut S) {
        session.clear(Bucket::Token);
    }

    /// Drop the token and any login in progress.
    pub fn logout<S: SessionStore>(&self, session: &mut S) {
        session.clear(Bucket::Token);
        session.remove(Bucket::Authorization, STATE_KEY);
    }
}
