use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

const PROBLEM_CONTENT_TYPE: &str = "application/problem+json";

/// Error envelope returned to the browser for every failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemDetail {
    pub status: u16,
    pub title: String,
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}

impl ProblemDetail {
    #[must_use]
    pub fn new(status: StatusCode, title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            status: status.as_u16(),
            title: title.into(),
            detail: detail.into(),
            instance: None,
        }
    }

    /// `401`: no usable access token.
    #[must_use]
    pub fn not_authenticated() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "Not authenticated",
            "You must sign in to access this resource.",
        )
    }

    /// `502`/`503`/`504`: the backend is temporarily down.
    #[must_use]
    pub fn unavailable(status: StatusCode) -> Self {
        Self::new(
            status,
            "Unavailable",
            "The server is currently unavailable, please try again later.",
        )
    }

    /// `500`: anything else, without leaking the cause.
    #[must_use]
    pub fn internal() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal Server Error",
            "An unexpected error occurred while processing the request.",
        )
    }

    /// Attach the original request path.
    #[must_use]
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl IntoResponse for ProblemDetail {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match serde_json::to_vec(&self) {
            Ok(body) => (
                status,
                [(CONTENT_TYPE, HeaderValue::from_static(PROBLEM_CONTENT_TYPE))],
                body,
            )
                .into_response(),
            Err(e) => {
                tracing::error!(error = %e, "Problem detail serialization failed");
                status.into_response()
            }
        }
    }
}
