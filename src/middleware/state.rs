use std::sync::Arc;

use url::Url;

use super::config::GatewaySettings;
use crate::flow::AuthorizationFlow;
use crate::proxy::ReverseProxy;
use crate::session::SessionSettings;
use crate::token::TokenManager;

/// Shared state for gateway route handlers.
#[derive(Clone)]
pub(super) struct GatewayState {
    pub(super) flow: Arc<AuthorizationFlow>,
    pub(super) tokens: Arc<TokenManager>,
    pub(super) proxy: Arc<ReverseProxy>,
    pub(super) session: Arc<SessionSettings>,
    pub(super) settings: Arc<GatewaySettings>,
    /// OAuth callback URL; its origin is the console's public origin.
    pub(super) redirect_uri: Arc<Url>,
    pub(super) scope: Arc<str>,
}
