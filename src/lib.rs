//! OAuth2/OIDC authentication gateway for a web console.
//!
//! Runs the authorization-code flow with PKCE against an OIDC issuer, keeps
//! the authorization state and access token in encrypted cookies, refreshes
//! tokens, and proxies `/api` requests to a backend with a bearer token.
//! Failures reach the browser as `application/problem+json`.
//!
//! The axum surface lives in [`middleware`]; the pieces below it are usable
//! on their own with any [`session::SessionStore`].

pub mod discovery;
pub mod error;
pub mod flow;
pub mod middleware;
pub mod oauth;
pub mod pkce;
pub mod problem;
pub mod proxy;
pub mod session;
pub mod token;
pub mod types;

// Re-exports for convenient access
pub use discovery::{MetadataCache, ProviderMetadata};
pub use error::{
    AuthenticationError, DiscoveryError, ErrorCode, OAuthErrorFields, ProviderError, SessionError,
};
pub use flow::{AuthorizationFlow, FlowError};
pub use middleware::{AuthError, GatewayConfig, gateway_routes};
pub use oauth::{AuthClient, OAuthConfig, TokenResponse};
pub use pkce::{generate_code_challenge, generate_code_verifier, generate_state};
pub use problem::ProblemDetail;
pub use proxy::ReverseProxy;
pub use session::{Bucket, CookieSession, SessionData, SessionSettings, SessionStore};
pub use token::{RefreshError, TokenManager};
pub use types::{AccessToken, AuthorizationState};
