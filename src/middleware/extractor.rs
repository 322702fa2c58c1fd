use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use super::state::GatewayState;
use crate::session::CookieSession;

/// Request-scoped session read from the gateway's cookies.
///
/// Never rejects: missing, tampered or undecryptable cookies read as an
/// empty session. Return it from the handler to emit its `Set-Cookie`
/// headers.
///
/// ```rust,ignore
/// async fn handler(mut session: CookieSession) -> impl IntoResponse {
///     tokens.logout(&mut session);
///     (session, Redirect::temporary("/"))
/// }
/// ```
impl FromRequestParts<GatewayState> for CookieSession {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &GatewayState,
    ) -> Result<Self, Self::Rejection> {
        Ok(CookieSession::from_headers(
            &parts.headers,
            Arc::clone(&state.session),
        ))
    }
}
