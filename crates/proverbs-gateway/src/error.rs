//! HTTP-facing errors.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use proverbs_core::error::ProverbsError;

#[derive(Debug, Error)]
pub enum ApiError {
    /// The agent could not be reached or the connection broke before a response.
    #[error("{0}")]
    BadGateway(String),

    #[error("{0}")]
    Internal(String),
}

impl From<ProverbsError> for ApiError {
    fn from(err: ProverbsError) -> Self {
        match err {
            ProverbsError::Agent(msg) => Self::BadGateway(msg),
            ProverbsError::Http(e) => Self::BadGateway(e.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
