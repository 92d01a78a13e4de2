//! HTTP error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::error;

use cadence_core::CadenceError;

/// Error returned by route handlers as JSON `{ "error": ... }`
#[derive(Debug)]
pub enum ApiError {
    /// Missing or malformed request fields (400)
    BadRequest(String),
    /// Synthesis or transport failure (500)
    Internal(String),
    /// No inference service configured (501)
    NotImplemented(String),
}

impl ApiError {
    /// Status code of this error
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::BadRequest(msg) | ApiError::Internal(msg) | ApiError::NotImplemented(msg) => msg,
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<CadenceError> for ApiError {
    fn from(err: CadenceError) -> Self {
        if err.is_client_error() {
            return ApiError::BadRequest(err.to_string());
        }
        // Remote details stay in the log
        error!(error = %err, "Speech synthesis failed");
        ApiError::Internal("Speech synthesis failed".to_string())
    }
}
