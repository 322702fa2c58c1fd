//! Encrypted cookie session.
//!
//! Two buckets ride in two cookies, each sealed with its own key: the
//! authorization bucket holds the in-flight [`AuthorizationState`], the token
//! bucket holds the [`AccessToken`]. A bucket's payload is a JSON object
//! encrypted as a whole (AES-GCM via the private cookie jar).

use std::convert::Infallible;
use std::sync::Arc;

use axum::http::HeaderMap;
use axum::response::{IntoResponseParts, ResponseParts};
use axum_extra::extract::PrivateCookieJar;
use axum_extra::extract::cookie::{Cookie, Key, SameSite};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use time::Duration;

use crate::error::SessionError;
use crate::types::{AccessToken, AuthorizationState};

/// Minimum secret length accepted for key derivation.
pub const MIN_SECRET_LEN: usize = 32;

/// Entry name of the [`AuthorizationState`] in [`Bucket::Authorization`].
pub const STATE_KEY: &str = "state";
/// Entry name of the [`AccessToken`] in [`Bucket::Token`].
pub const TOKEN_KEY: &str = "token";

const SECONDS_PER_DAY: i64 = 86_400;

const DEFAULT_AUTHORIZATION_COOKIE: &str = "__gateway_auth";
const DEFAULT_TOKEN_COOKIE: &str = "__gateway_token";

/// A named, independently encrypted part of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    /// OAuth state for a login in progress. Short-lived.
    Authorization,
    /// Backend access token. Long-lived.
    Token,
}

/// Request-scoped key/value session, split into [`Bucket`]s.
///
/// Reads never fail: an absent, forged or undecryptable bucket reads as empty.
pub trait SessionStore {
    /// Read and deserialize one entry.
    fn get<T: DeserializeOwned>(&self, bucket: Bucket, key: &str) -> Option<T>;

    /// Serialize `value` under `key`, rewriting the whole bucket.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Serialize`] if `value` cannot be serialized.
    fn set<T: Serialize + ?Sized>(
        &mut self,
        bucket: Bucket,
        key: &str,
        value: &T,
    ) -> Result<(), SessionError>;

    /// Delete one entry, rewriting the bucket.
    fn remove(&mut self, bucket: Bucket, key: &str);

    /// Delete the whole bucket.
    fn clear(&mut self, bucket: Bucket);
}

/// Logical view over both buckets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionData {
    pub token: Option<AccessToken>,
    pub state: Option<AuthorizationState>,
}

impl SessionData {
    #[must_use]
    pub fn load<S: SessionStore>(session: &S) -> Self {
        Self {
            token: session.get(Bucket::Token, TOKEN_KEY),
            state: session.get(Bucket::Authorization, STATE_KEY),
        }
    }

    /// Write both fields, removing entries that are `None`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if a field cannot be serialized.
    pub fn store<S: SessionStore>(&self, session: &mut S) -> Result<(), SessionError> {
        match &self.token {
            Some(token) => session.set(Bucket::Token, TOKEN_KEY, token)?,
            None => session.remove(Bucket::Token, TOKEN_KEY),
        }
        match &self.state {
            Some(state) => session.set(Bucket::Authorization, STATE_KEY, state)?,
            None => session.remove(Bucket::Authorization, STATE_KEY),
        }
        Ok(())
    }
}

/// Cookie name, key and lifetime of one bucket.
#[derive(Clone)]
pub struct BucketSettings {
    name: String,
    key: Key,
    max_age: Duration,
}

impl BucketSettings {
    /// Derive the bucket key from `secret` (HKDF expansion).
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::SecretTooShort`] for secrets under
    /// [`MIN_SECRET_LEN`] bytes.
    pub fn new(
        name: impl Into<String>,
        secret: &[u8],
        max_age: Duration,
    ) -> Result<Self, SessionError> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(SessionError::SecretTooShort {
                min: MIN_SECRET_LEN,
                actual: secret.len(),
            });
        }
        Ok(Self {
            name: name.into(),
            key: Key::derive_from(secret),
            max_age,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Cookie settings shared by every request.
#[derive(Clone)]
pub struct SessionSettings {
    authorization: BucketSettings,
    token: BucketSettings,
    secure: bool,
}

impl SessionSettings {
    /// Default cookie names, a 10 minute authorization bucket and a
    /// `token_ttl_days` token bucket. Cookies are `Secure`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if a secret is too short, both secrets are
    /// the same, or `token_ttl_days` is not a positive number of days that
    /// fits in a cookie max-age.
    pub fn new(
        authorization_secret: &[u8],
        token_secret: &[u8],
        token_ttl_days: i64,
    ) -> Result<Self, SessionError> {
        if authorization_secret == token_secret {
            return Err(SessionError::SharedSecret);
        }
        Ok(Self {
            authorization: BucketSettings::new(
                DEFAULT_AUTHORIZATION_COOKIE,
                authorization_secret,
                Duration::minutes(10),
            )?,
            token: BucketSettings::new(
                DEFAULT_TOKEN_COOKIE,
                token_secret,
                token_lifetime(token_ttl_days)?,
            )?,
            secure: true,
        })
    }

    #[must_use]
    pub fn with_authorization_bucket(mut self, bucket: BucketSettings) -> Self {
        self.authorization = bucket;
        self
    }

    #[must_use]
    pub fn with_token_bucket(mut self, bucket: BucketSettings) -> Self {
        self.token = bucket;
        self
    }

    /// Drop the `Secure` attribute (plain-http development only).
    #[must_use]
    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    #[must_use]
    pub fn bucket(&self, bucket: Bucket) -> &BucketSettings {
        match bucket {
            Bucket::Authorization => &self.authorization,
            Bucket::Token => &self.token,
        }
    }
}

/// [`SessionStore`] backed by the request's cookies.
///
/// Changes are emitted as `Set-Cookie` headers when the session is returned
/// from a handler (it implements [`IntoResponseParts`]).
pub struct CookieSession {
    settings: Arc<SessionSettings>,
    authorization: PrivateCookieJar,
    token: PrivateCookieJar,
}

impl CookieSession {
    /// An empty session (no incoming cookies).
    #[must_use]
    pub fn new(settings: Arc<SessionSettings>) -> Self {
        Self {
            authorization: PrivateCookieJar::new(settings.authorization.key.clone()),
            token: PrivateCookieJar::new(settings.token.key.clone()),
            settings,
        }
    }

    /// Session from the request's `Cookie` headers.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap, settings: Arc<SessionSettings>) -> Self {
        Self {
            authorization: PrivateCookieJar::from_headers(
                headers,
                settings.authorization.key.clone(),
            ),
            token: PrivateCookieJar::from_headers(headers, settings.token.key.clone()),
            settings,
        }
    }

    fn jar(&self, bucket: Bucket) -> &PrivateCookieJar {
        match bucket {
            Bucket::Authorization => &self.authorization,
            Bucket::Token => &self.token,
        }
    }

    fn payload(&self, bucket: Bucket) -> Map<String, Value> {
        let name = self.settings.bucket(bucket).name();
        let Some(cookie) = self.jar(bucket).get(name) else {
            return Map::new();
        };
        match serde_json::from_str(cookie.value()) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::debug!(cookie = %name, error = %e, "Discarding malformed session payload");
                Map::new()
            }
        }
    }

    fn write(&mut self, bucket: Bucket, payload: &Map<String, Value>) -> Result<(), SessionError> {
        if payload.is_empty() {
            self.clear(bucket);
            return Ok(());
        }
        let value = serde_json::to_string(payload)?;
        let secure = self.settings.secure;
        let (settings, slot) = match bucket {
            Bucket::Authorization => (&self.settings.authorization, &mut self.authorization),
            Bucket::Token => (&self.settings.token, &mut self.token),
        };
        let jar = std::mem::replace(slot, PrivateCookieJar::new(settings.key.clone()));
        *slot = jar.add(bucket_cookie(settings, secure, value));
        Ok(())
    }
}

impl SessionStore for CookieSession {
    fn get<T: DeserializeOwned>(&self, bucket: Bucket, key: &str) -> Option<T> {
        let mut payload = self.payload(bucket);
        let value = payload.remove(key)?;
        serde_json::from_value(value)
            .inspect_err(|e| tracing::debug!(key, error = %e, "Discarding unreadable session entry"))
            .ok()
    }

    fn set<T: Serialize + ?Sized>(
        &mut self,
        bucket: Bucket,
        key: &str,
        value: &T,
    ) -> Result<(), SessionError> {
        let mut payload = self.payload(bucket);
        payload.insert(key.to_owned(), serde_json::to_value(value)?);
        self.write(bucket, &payload)
    }

    fn remove(&mut self, bucket: Bucket, key: &str) {
        let mut payload = self.payload(bucket);
        if payload.remove(key).is_some() {
            // Serializing a `Map<String, Value>` cannot fail.
            let _ = self.write(bucket, &payload);
        }
    }

    fn clear(&mut self, bucket: Bucket) {
        let (settings, slot) = match bucket {
            Bucket::Authorization => (&self.settings.authorization, &mut self.authorization),
            Bucket::Token => (&self.settings.token, &mut self.token),
        };
        let jar = std::mem::replace(slot, PrivateCookieJar::new(settings.key.clone()));
        *slot = jar.remove(removal_cookie(settings));
    }
}

impl IntoResponseParts for CookieSession {
    type Error = Infallible;

    fn into_response_parts(self, res: ResponseParts) -> Result<ResponseParts, Self::Error> {
        let res = self.authorization.into_response_parts(res)?;
        self.token.into_response_parts(res)
    }
}

fn token_lifetime(days: i64) -> Result<Duration, SessionError> {
    days
        .checked_mul(SECONDS_PER_DAY)
        .filter(|_| days > 0)
        .map(Duration::seconds)
        .ok_or(SessionError::InvalidLifetime { days })
}

fn bucket_cookie(settings: &BucketSettings, secure: bool, value: String) -> Cookie<'static> {
    Cookie::build((settings.name.clone(), value))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(settings.max_age)
        .build()
}

fn removal_cookie(settings: &BucketSettings) -> Cookie<'static> {
    Cookie::build((settings.name.clone(), ""))
        .path("/")
        .max_age(Duration::ZERO)
        .build()
}

#[cfg(test)]
pub(crate) mod tests {
    use axum::http::header::{COOKIE, SET_COOKIE};
    use axum::http::{HeaderValue, StatusCode};
    use axum::response::IntoResponse;

    use super::*;

    pub(crate) const AUTH_SECRET: &[u8] = b"authorization-bucket-secret-0123456789";
    pub(crate) const TOKEN_SECRET: &[u8] = b"token-bucket-secret-abcdefghijklmnopqrs";

    pub(crate) fn settings() -> Arc<SessionSettings> {
        Arc::new(SessionSettings::new(AUTH_SECRET, TOKEN_SECRET, 30).unwrap())
    }

    /// Replay the session's `Set-Cookie` headers as a browser would.
    pub(crate) fn carry(session: CookieSession) -> HeaderMap {
        let response = (session, StatusCode::OK).into_response();
        cookie_header(response.headers())
    }

    pub(crate) fn cookie_header(response_headers: &HeaderMap) -> HeaderMap {
        let pairs: Vec<String> = response_headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|v| v.split(';').next())
            .filter(|pair| pair.split_once('=').is_some_and(|(_, v)| !v.is_empty()))
            .map(str::to_owned)
            .collect();
        let mut headers = HeaderMap::new();
        if !pairs.is_empty() {
            headers.insert(COOKIE, HeaderValue::from_str(&pairs.join("; ")).unwrap());
        }
        headers
    }

    fn token() -> AccessToken {
        AccessToken {
            access_token: "at".into(),
            refresh_token: "rt".into(),
            expires_at: 1_700_000_000_000,
        }
    }

    #[test]
    fn get_set_within_one_request() {
        let mut session = CookieSession::new(settings());
        assert!(session.get::<AccessToken>(Bucket::Token, TOKEN_KEY).is_none());

        session.set(Bucket::Token, TOKEN_KEY, &token()).unwrap();
        assert_eq!(session.get(Bucket::Token, TOKEN_KEY), Some(token()));
    }

    #[test]
    fn session_data_round_trips_across_requests() {
        let data = SessionData {
            token: Some(token()),
            state: Some(AuthorizationState::generate("https://app/x")),
        };
        let mut session = CookieSession::new(settings());
        data.store(&mut session).unwrap();

        let next = CookieSession::from_headers(&carry(session), settings());
        assert_eq!(SessionData::load(&next), data);
    }

    #[test]
    fn buckets_use_distinct_cookies() {
        let mut session = CookieSession::new(settings());
        session.set(Bucket::Token, TOKEN_KEY, &token()).unwrap();
        session
            .set(Bucket::Authorization, STATE_KEY, &AuthorizationState::generate("/"))
            .unwrap();

        let headers = carry(session);
        let cookie = headers.get(COOKIE).unwrap().to_str().unwrap();
        assert!(cookie.contains("__gateway_auth="));
        assert!(cookie.contains("__gateway_token="));
        assert!(!cookie.contains("refreshToken"), "payload must be encrypted");
    }

    #[test]
    fn wrong_secret_reads_as_absent() {
        let mut session = CookieSession::new(settings());
        session.set(Bucket::Token, TOKEN_KEY, &token()).unwrap();
        let headers = carry(session);

        let other = Arc::new(
            SessionSettings::new(
                b"some-other-authorization-secret-xxxxxxx",
                b"some-other-token-secret-yyyyyyyyyyyyyyyy",
                30,
            )
            .unwrap(),
        );
        let foreign = CookieSession::from_headers(&headers, other);
        assert!(foreign.get::<AccessToken>(Bucket::Token, TOKEN_KEY).is_none());
    }

    #[test]
    fn bucket_keys_do_not_cross_read() {
        let mut session = CookieSession::new(settings());
        session.set(Bucket::Token, TOKEN_KEY, &token()).unwrap();
        let headers = carry(session);
        let token_cookie = headers.get(COOKIE).unwrap().to_str().unwrap();
        let forged_value = token_cookie
            .strip_prefix("__gateway_token=")
            .unwrap()
            .to_owned();

        // Token ciphertext replayed under the authorization cookie name.
        let mut forged = HeaderMap::new();
        forged.insert(
            COOKIE,
            HeaderValue::from_str(&format!("__gateway_auth={forged_value}")).unwrap(),
        );
        let session = CookieSession::from_headers(&forged, settings());
        assert!(
            session
                .get::<AccessToken>(Bucket::Authorization, TOKEN_KEY)
                .is_none()
        );
    }

    #[test]
    fn tampered_cookie_reads_as_absent() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("__gateway_token=bm90LWEtcmVhbC1jaXBoZXJ0ZXh0; __gateway_auth=%%%"),
        );
        let session = CookieSession::from_headers(&headers, settings());
        assert_eq!(SessionData::load(&session), SessionData::default());
    }

    #[test]
    fn remove_keeps_other_entries() {
        let mut session = CookieSession::new(settings());
        session.set(Bucket::Token, TOKEN_KEY, &token()).unwrap();
        session.set(Bucket::Token, "note", "kept").unwrap();
        session.remove(Bucket::Token, TOKEN_KEY);

        let next = CookieSession::from_headers(&carry(session), settings());
        assert!(next.get::<AccessToken>(Bucket::Token, TOKEN_KEY).is_none());
        assert_eq!(next.get::<String>(Bucket::Token, "note").as_deref(), Some("kept"));
    }

    #[test]
    fn clear_emits_removal_cookie() {
        let mut session = CookieSession::new(settings());
        session.set(Bucket::Token, TOKEN_KEY, &token()).unwrap();
        let incoming = carry(session);

        let mut session = CookieSession::from_headers(&incoming, settings());
        session.clear(Bucket::Token);
        assert!(session.get::<AccessToken>(Bucket::Token, TOKEN_KEY).is_none());

        let response = (session, StatusCode::OK).into_response();
        let removal = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find(|v| v.starts_with("__gateway_token="))
            .expect("removal cookie");
        assert!(removal.contains("Max-Age=0"));
    }

    #[test]
    fn removing_last_entry_clears_bucket() {
        let mut session = CookieSession::new(settings());
        session
            .set(Bucket::Authorization, STATE_KEY, &AuthorizationState::generate("/"))
            .unwrap();
        session.remove(Bucket::Authorization, STATE_KEY);

        let headers = carry(session);
        assert!(headers.get(COOKIE).is_none());
    }

    #[test]
    fn cookie_attributes() {
        let mut session = CookieSession::new(settings());
        session.set(Bucket::Token, TOKEN_KEY, &token()).unwrap();
        let response = (session, StatusCode::OK).into_response();
        let set_cookie = response.headers().get(SET_COOKIE).unwrap().to_str().unwrap();

        assert!(set_cookie.contains("HttpOnly"));
        assert!(set_cookie.contains("Secure"));
        assert!(set_cookie.contains("SameSite=Lax"));
        assert!(set_cookie.contains("Path=/"));
    }

    #[test]
    fn insecure_mode_drops_secure_attribute() {
        let settings = Arc::new(
            SessionSettings::new(AUTH_SECRET, TOKEN_SECRET, 30)
                .unwrap()
                .with_secure_cookies(false),
        );
        let mut session = CookieSession::new(settings);
        session.set(Bucket::Token, TOKEN_KEY, &token()).unwrap();
        let response = (session, StatusCode::OK).into_response();
        let set_cookie = response.headers().get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(!set_cookie.contains("Secure"));
    }

    #[test]
    fn secrets_are_validated() {
        assert!(matches!(
            SessionSettings::new(b"short", TOKEN_SECRET, 30),
            Err(SessionError::SecretTooShort { actual: 5, .. })
        ));
        assert!(matches!(
            SessionSettings::new(TOKEN_SECRET, TOKEN_SECRET, 30),
            Err(SessionError::SharedSecret)
        ));
    }

    #[test]
    fn token_lifetime_is_bounded() {
        for days in [0, -1, 9_223_372_036_854_775, i64::MAX] {
            assert!(
                matches!(
                    SessionSettings::new(AUTH_SECRET, TOKEN_SECRET, days),
                    Err(SessionError::InvalidLifetime { days: d }) if d == days
                ),
                "{days}"
            );
        }
        assert!(SessionSettings::new(AUTH_SECRET, TOKEN_SECRET, 365).is_ok());
    }
}
