use std::fmt;

/// Failures originating from the identity provider during authorize, exchange
/// or refresh.
///
/// Produced once at the token-endpoint / callback boundary in
/// [`crate::oauth`]; everything above it matches on this type instead of
/// inspecting raw responses.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ProviderError {
    /// The provider does not support what the flow needs (e.g. PKCE `S256`).
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// The provider answered with something the flow cannot use: state
    /// mismatch, missing fields, unexpected status, malformed JSON.
    #[error("processing error: {0}")]
    Processing(String),

    /// The authorization redirect carried an `error` parameter.
    #[error("authorization response error: {}", .0.error)]
    AuthorizationResponse(OAuthErrorFields),

    /// The token endpoint answered with an OAuth error body.
    #[error("response body error ({status}): {}", .fields.error)]
    ResponseBody { status: u16, fields: OAuthErrorFields },

    /// The request never produced a response (DNS, refused, timeout).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ProviderError {
    /// OAuth error fields reported by the provider, if any.
    #[must_use]
    pub fn oauth_fields(&self) -> Option<&OAuthErrorFields> {
        match self {
            Self::AuthorizationResponse(fields) | Self::ResponseBody { fields, .. } => {
                Some(fields)
            }
            _ => None,
        }
    }

    /// True when the provider rejected a grant (`invalid_grant`): the code or
    /// refresh token is used, expired or revoked.
    #[must_use]
    pub fn is_invalid_grant(&self) -> bool {
        matches!(
            self,
            Self::ResponseBody { fields, .. } if fields.error == "invalid_grant"
        )
    }
}

/// The standard OAuth2 error triple (RFC 6749 §4.1.2.1 and §5.2).
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct OAuthErrorFields {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
    #[serde(default)]
    pub error_uri: Option<String>,
}

/// Issuer metadata could not be discovered. Never cached.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DiscoveryError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("discovery endpoint returned status {0}")]
    Status(u16),

    #[error("invalid provider metadata: {0}")]
    InvalidMetadata(String),
}

/// Session keys could not be derived or a bucket could not be written.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("session secret must be at least {min} bytes, got {actual}")]
    SecretTooShort { min: usize, actual: usize },

    #[error("authorization and token buckets must use distinct secrets")]
    SharedSecret,

    #[error("token lifetime of {days} days is out of range")]
    InvalidLifetime { days: i64 },
}

/// An outbound request was authorized without a token in the session.
///
/// Callers check [`crate::token::TokenManager::authenticated`] first; seeing
/// this error means the control flow is wrong.
#[derive(Debug, thiserror::Error)]
#[error("no access token in session")]
pub struct AuthenticationError;

/// Fixed error codes forwarded to the error page as `?code=`.
///
/// The console renders provider-specific guidance keyed on these strings, so
/// they must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    MissingAuthorizationState,
    UnsupportedOperation,
    ProcessingError,
    AuthorizationResponseError,
    ResponseBodyError,
    InternalError,
}

impl ErrorCode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingAuthorizationState => "missing_authorization_state",
            Self::UnsupportedOperation => "unsupported_operation",
            Self::ProcessingError => "processing_error",
            Self::AuthorizationResponseError => "authorization_response_error",
            Self::ResponseBodyError => "response_body_error",
            Self::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&ProviderError> for ErrorCode {
    fn from(e: &ProviderError) -> Self {
        match e {
            ProviderError::UnsupportedOperation(_) => Self::UnsupportedOperation,
            ProviderError::Processing(_) => Self::ProcessingError,
            ProviderError::AuthorizationResponse(_) => Self::AuthorizationResponseError,
            ProviderError::ResponseBody { .. } => Self::ResponseBodyError,
            ProviderError::Http(_) => Self::InternalError,
        }
    }
}
