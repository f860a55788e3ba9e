//! Error taxonomy shared by the REST surface and the sync channel.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Errors surfaced to API callers.
///
/// Storage-layer failures arrive wrapped in [`ApiError::Internal`]; the
/// response body carries the human-readable message, the status code carries
/// the category.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Missing or invalid identity token. Rejected before touching storage.
    #[error("Authentication required")]
    Unauthorized,

    /// Credential check failed (unknown user, wrong password).
    #[error("{0}")]
    AuthFailed(String),

    /// Malformed request body or parameters. No state change.
    #[error("{0}")]
    Validation(String),

    /// The referenced row does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Upload bytes do not match a known image signature.
    #[error("Invalid image file format")]
    InvalidImage,

    /// Storage or I/O failure.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized | Self::AuthFailed(_) => StatusCode::UNAUTHORIZED,
            Self::Validation(_) | Self::InvalidImage => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "Request failed");
        }

        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
