//! Authenticated reverse proxy from the console to the backend API.

use std::sync::Arc;

use axum::body::Body;
use axum::http::header::{CONTENT_LENGTH, COOKIE, HOST, TRANSFER_ENCODING};
use axum::http::{HeaderMap, HeaderName, Method, Request, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use url::Url;

use crate::problem::ProblemDetail;
use crate::session::SessionStore;
use crate::token::TokenManager;

/// Connection-identity headers that never reach the backend.
const DENIED_HEADERS: [HeaderName; 2] = [COOKIE, HOST];

/// Framing headers recomputed by the outbound client for the body it sends.
const FRAMING_HEADERS: [HeaderName; 2] = [CONTENT_LENGTH, TRANSFER_ENCODING];

const DEFAULT_PREFIX: &str = "/api";

/// Forwards browser requests under `/api` to the backend with the session's
/// bearer token.
pub struct ReverseProxy {
    http: reqwest::Client,
    backend_url: Url,
    prefix: String,
    tokens: Arc<TokenManager>,
}

impl ReverseProxy {
    #[must_use]
    pub fn new(http: reqwest::Client, backend_url: Url, tokens: Arc<TokenManager>) -> Self {
        Self {
            http,
            backend_url,
            prefix: DEFAULT_PREFIX.into(),
            tokens,
        }
    }

    /// Override the path prefix stripped before forwarding (default `/api`).
    /// Trailing slashes are ignored.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.prefix = prefix.trim_end_matches('/').to_owned();
        self
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Backend URL for an incoming request URI.
    ///
    /// # Errors
    ///
    /// Returns [`url::ParseError`] if the joined URL is not valid.
    pub fn target_url(&self, uri: &Uri) -> Result<Url, url::ParseError> {
        let path = uri.path();
        let rest = path
            .strip_prefix(self.prefix.as_str())
            .filter(|rest| rest.is_empty() || rest.starts_with('/'))
            .unwrap_or(path);

        let mut target = format!("{}{rest}", self.backend_url.as_str().trim_end_matches('/'));
        if let Some(query) = uri.query() {
            target.push('?');
            target.push_str(query);
        }
        target.parse()
    }

    /// Forward `request` and translate the outcome.
    ///
    /// Never fails: every error becomes a [`ProblemDetail`] response carrying
    /// the request path as `instance`.
    pub async fn proxy<S: SessionStore>(&self, session: &S, request: Request<Body>) -> Response {
        let (parts, body) = request.into_parts();
        let instance = parts.uri.path().to_owned();

        if self.tokens.expired(session) {
            return ProblemDetail::not_authenticated()
                .with_instance(instance)
                .into_response();
        }

        let target = match self.target_url(&parts.uri) {
            Ok(target) => target,
            Err(e) => {
                tracing::error!(path = %instance, error = %e, "Invalid proxy target URL");
                return ProblemDetail::internal()
                    .with_instance(instance)
                    .into_response();
            }
        };

        let mut headers = forwarded_headers(&parts.headers);
        if let Err(e) = self.tokens.authorize_request(session, &mut headers) {
            tracing::error!(path = %instance, error = %e, "Proxy reached without a token");
            return ProblemDetail::not_authenticated()
                .with_instance(instance)
                .into_response();
        }

        let mut outbound = self
            .http
            .request(parts.method.clone(), target)
            .headers(headers);
        if carries_body(&parts.method) {
            outbound = outbound.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }

        let upstream = match outbound.send().await {
            Ok(upstream) => upstream,
            Err(e) => {
                tracing::error!(
                    method = %parts.method,
                    path = %instance,
                    timeout = e.is_timeout(),
                    error = %e,
                    "Upstream request failed"
                );
                return ProblemDetail::internal()
                    .with_instance(instance)
                    .into_response();
            }
        };

        let status = upstream.status();
        if is_unavailable(status) {
            tracing::warn!(
                method = %parts.method,
                path = %instance,
                status = status.as_u16(),
                "Upstream unavailable"
            );
            return ProblemDetail::unavailable(status)
                .with_instance(instance)
                .into_response();
        }

        pass_through(upstream)
    }
}

fn forwarded_headers(incoming: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(incoming.len());
    for (name, value) in incoming {
        if DENIED_HEADERS.contains(name) || FRAMING_HEADERS.contains(name) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

fn carries_body(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

fn is_unavailable(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    )
}

fn pass_through(upstream: reqwest::Response) -> Response {
    let status = upstream.status();
    let headers = upstream.headers().clone();
    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
