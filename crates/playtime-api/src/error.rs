//! Error types for the query API.
//!
//! [`ApiError`] converts into an Axum response via its
//! [`IntoResponse`](axum::response::IntoResponse) implementation. A missing
//! player is a client-visible 404, never a server fault.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Errors that can occur in the query API layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// No player is registered under the requested identifier.
    #[error("Player not found")]
    PlayerNotFound,
}

impl ApiError {
    /// The HTTP status for this error.
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::PlayerNotFound => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}
