use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::pkce;

/// Bearer credential stored in the token bucket.
///
/// Owned by the session; never persisted outside the encrypted cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessToken {
    pub access_token: String,
    /// Single use. The provider rotates it on every refresh.
    pub refresh_token: String,
    /// Epoch milliseconds.
    pub expires_at: i64,
}

impl AccessToken {
    /// Build a token expiring `expires_in_secs` after `now_ms`.
    #[must_use]
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        now_ms: i64,
        expires_in_secs: u64,
    ) -> Self {
        let lifetime_ms = i64::try_from(expires_in_secs)
            .unwrap_or(i64::MAX)
            .saturating_mul(1000);
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at: now_ms.saturating_add(lifetime_ms),
        }
    }

    #[must_use]
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        self.expires_at <= now_ms
    }
}

/// In-flight authorization attempt, stored in the authorization bucket
/// between the redirect to the provider and the callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationState {
    /// The OAuth `state` parameter.
    pub id: String,
    /// PKCE code verifier.
    pub verifier: String,
    /// Where to send the user after login.
    pub uri: String,
}

impl AuthorizationState {
    /// Fresh state with random `id` and `verifier` for `uri`.
    #[must_use]
    pub fn generate(uri: impl Into<String>) -> Self {
        Self {
            id: pkce::generate_state(),
            verifier: pkce::generate_code_verifier(),
            uri: uri.into(),
        }
    }

    /// `S256` challenge for this attempt's verifier.
    #[must_use]
    pub fn code_challenge(&self) -> String {
        pkce::generate_code_challenge(&self.verifier)
    }
}

/// Current wall clock in epoch milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    i64::try_from(OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
}
