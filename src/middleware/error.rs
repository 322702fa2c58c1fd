//! HTTP-layer errors rendered as problem details.

use axum::response::{IntoResponse, Response};

use crate::problem::ProblemDetail;
use crate::token::RefreshError;

/// Errors of the gateway's HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Token refresh failed.
    #[error("Token refresh failed: {0}")]
    Refresh(#[from] RefreshError),

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match self {
            Self::Refresh(ref e) if e.requires_reauthorization() => {
                ProblemDetail::not_authenticated().into_response()
            }
            Self::Refresh(_) | Self::Config(_) => {
                tracing::error!(error = %self, "Gateway internal error");
                ProblemDetail::internal().into_response()
            }
        }
    }
}
