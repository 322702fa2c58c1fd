//! Gateway routes: login flow handlers under `<auth_path>` and the `/api`
//! proxy handler.

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{OriginalUri, Query, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{any, get, post};
use serde::{Deserialize, Serialize};
use url::{Position, Url};

use super::config::GatewayConfig;
use super::error::AuthError;
use super::state::GatewayState;
use crate::discovery::MetadataCache;
use crate::error::ProviderError;
use crate::flow::{AuthorizationFlow, FlowError};
use crate::oauth::AuthClient;
use crate::proxy::ReverseProxy;
use crate::session::CookieSession;
use crate::token::TokenManager;

/// Create the gateway router: auth routes under `auth_path` and the
/// authenticated proxy under the API prefix.
///
/// # Errors
///
/// Returns [`AuthError::Config`] if the outbound HTTP client cannot be built.
pub fn gateway_routes(config: GatewayConfig) -> Result<Router, AuthError> {
    let GatewayConfig {
        oauth,
        backend_url,
        session,
        settings,
    } = config;

    let http = reqwest::Client::builder()
        .timeout(settings.http_timeout)
        .connect_timeout(settings.connect_timeout)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| AuthError::Config(format!("HTTP client: {e}")))?;

    let metadata = Arc::new(MetadataCache::new(&oauth, http.clone()));
    let client = Arc::new(AuthClient::new(&oauth, http.clone()));
    let tokens = Arc::new(TokenManager::new(Arc::clone(&metadata), Arc::clone(&client)));
    let proxy = ReverseProxy::new(http, backend_url, Arc::clone(&tokens))
        .with_prefix(settings.api_prefix.as_str());

    let auth_path = settings.auth_path.trim_end_matches('/').to_owned();
    let api_prefix = proxy.prefix().to_owned();

    let state = GatewayState {
        flow: Arc::new(AuthorizationFlow::new(metadata, client)),
        tokens,
        proxy: Arc::new(proxy),
        session: Arc::new(session),
        settings: Arc::new(settings),
        redirect_uri: Arc::new(oauth.redirect_uri().clone()),
        scope: oauth.scope().into(),
    };

    let router = Router::new()
        .route(&format!("{auth_path}/authorize"), get(authorize))
        .route(&format!("{auth_path}/code"), get(callback))
        .route(&format!("{auth_path}/logout"), get(logout).post(logout))
        .route(&format!("{auth_path}/refresh"), post(refresh))
        .route(&format!("{auth_path}/session"), get(session_status))
        .route(&api_prefix, any(api))
        .route(&format!("{api_prefix}/{{*path}}"), any(api));

    Ok(router.with_state(state))
}

// ── Authorize ──────────────────────────────────────────────────────

#[derive(Deserialize)]
struct AuthorizeParams {
    redirect: Option<String>,
}

async fn authorize(
    State(state): State<GatewayState>,
    mut session: CookieSession,
    Query(params): Query<AuthorizeParams>,
) -> Response {
    let intended = intended_uri(&state, params.redirect.as_deref());

    match state.flow.authorize(&mut session, &intended, &state.scope).await {
        Ok(url) => (session, Redirect::temporary(url.as_str())).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, code = %e.code(), "Authorization request failed");
            login_error(&state.settings.error_redirect, &e).into_response()
        }
    }
}

// ── Callback ───────────────────────────────────────────────────────

async fn callback(
    State(state): State<GatewayState>,
    mut session: CookieSession,
    OriginalUri(uri): OriginalUri,
) -> Response {
    let callback = match state.redirect_uri.join(&uri.to_string()) {
        Ok(url) => url,
        Err(e) => {
            tracing::warn!(error = %e, "Unparseable callback URI");
            let error =
                FlowError::Provider(ProviderError::Processing("malformed callback URI".into()));
            return login_error(&state.settings.error_redirect, &error).into_response();
        }
    };

    match state.flow.exchange(&mut session, &callback).await {
        Ok(intended) => {
            tracing::info!("Login completed");
            (session, Redirect::temporary(&intended)).into_response()
        }
        Err(e) => {
            tracing::warn!(error = %e, code = %e.code(), "Authorization callback failed");
            (session, login_error(&state.settings.error_redirect, &e)).into_response()
        }
    }
}

// ── Logout ─────────────────────────────────────────────────────────

async fn logout(
    State(state): State<GatewayState>,
    mut session: CookieSession,
) -> (CookieSession, Redirect) {
    state.tokens.logout(&mut session);
    (session, Redirect::temporary(&state.settings.logout_redirect))
}

// ── Refresh ────────────────────────────────────────────────────────

async fn refresh(State(state): State<GatewayState>, mut session: CookieSession) -> Response {
    match state.tokens.refresh(&mut session, Some(&*state.scope)).await {
        Ok(()) => (session, StatusCode::NO_CONTENT).into_response(),
        Err(e) => {
            if e.requires_reauthorization() {
                tracing::info!("Refresh token rejected, signing out");
                state.tokens.reset(&mut session);
            }
            (session, AuthError::from(e)).into_response()
        }
    }
}

// ── Session status ─────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionStatus {
    authenticated: bool,
    expired: bool,
    expires_at: Option<i64>,
}

async fn session_status(
    State(state): State<GatewayState>,
    session: CookieSession,
) -> Json<SessionStatus> {
    let token = state.tokens.token(&session);
    Json(SessionStatus {
        authenticated: token.is_some(),
        expired: state.tokens.expired(&session),
        expires_at: token.map(|t| t.expires_at),
    })
}

// ── API proxy ──────────────────────────────────────────────────────

async fn api(
    State(state): State<GatewayState>,
    session: CookieSession,
    request: Request,
) -> Response {
    state.proxy.proxy(&session, request).await
}

// ── Helpers ────────────────────────────────────────────────────────

/// Same-origin target of `redirect` as path, query and fragment; anything
/// else falls back to the login redirect.
fn intended_uri(state: &GatewayState, redirect: Option<&str>) -> String {
    let Some(raw) = redirect.filter(|r| !r.is_empty()) else {
        return state.settings.login_redirect.clone();
    };
    match state.redirect_uri.join(raw) {
        Ok(target) if same_origin(&target, &state.redirect_uri) => {
            let local = &target[Position::BeforePath..];
            // `//host/...` in a Location header is protocol-relative.
            if local.starts_with("//") || local.starts_with("/\\") {
                tracing::warn!(redirect = %raw, "Ignoring protocol-relative redirect target");
                return state.settings.login_redirect.clone();
            }
            local.to_owned()
        }
        _ => {
            tracing::warn!(redirect = %raw, "Ignoring cross-origin redirect target");
            state.settings.login_redirect.clone()
        }
    }
}

fn same_origin(a: &Url, b: &Url) -> bool {
    a.origin() == b.origin()
}

fn login_error(error_redirect: &str, error: &FlowError) -> Redirect {
    let mut params = vec![("code", error.code().as_str())];
    if let Some(fields) = error.oauth_fields() {
        params.push(("error", fields.error.as_str()));
        if let Some(description) = &fields.error_description {
            params.push(("error_description", description.as_str()));
        }
        if let Some(uri) = &fields.error_uri {
            params.push(("error_uri", uri.as_str()));
        }
    }

    let query = params
        .iter()
        .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    let separator = if error_redirect.contains('?') { '&' } else { '?' };
    Redirect::temporary(&format!("{error_redirect}{separator}{query}"))
}
