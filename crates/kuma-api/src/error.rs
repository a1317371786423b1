use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("External dependency error: {0}")]
    External(String),
    #[error("Internal server error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn external(message: impl Into<String>) -> Self {
        Self::External(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::External(_) => StatusCode::BAD_GATEWAY,
            Self::Config(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand back to clients; details stay in the server log.
    fn public_message(&self) -> String {
        match self {
            Self::BadRequest(_) => self.to_string(),
            Self::Unauthorized(_) => "Unauthorized".to_string(),
            Self::External(_) => "Upstream service unavailable".to_string(),
            Self::Config(_) => "Internal server error".to_string(),
            Self::Internal(_) => "Failed to sync data".to_string(),
        }
    }
}

/// Single-line rendering of an upstream error for log messages.
pub(crate) fn sanitize(error: &impl std::fmt::Display) -> String {
    error.to_string().replace('\n', " ").trim().to_string()
}

impl From<kuma_core::Error> for AppError {
    fn from(error: kuma_core::Error) -> Self {
        if error.is_invalid_input() {
            Self::BadRequest(error.to_string())
        } else {
            Self::Internal(error.to_string())
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            Self::Unauthorized(detail) => tracing::warn!(reason = %detail, "Rejected credential"),
            Self::BadRequest(detail) => tracing::warn!(reason = %detail, "Rejected request"),
            Self::External(_) | Self::Config(_) | Self::Internal(_) => {
                tracing::error!(status = status.as_u16(), error = %self, "Request failed");
            }
        }
        let body = ErrorBody {
            error: self.public_message(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_map_to_status() {
        let invalid = AppError::from(kuma_core::Error::InvalidInput("bad".into()));
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);

        let storage = AppError::from(kuma_core::Error::Database("disk full".into()));
        assert_eq!(storage.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn internal_details_are_not_exposed() {
        let error = AppError::internal("libSQL error: disk I/O error at /var/lib/kuma.db");
        assert_eq!(error.public_message(), "Failed to sync data");

        let error = AppError::unauthorized("Token validation failed: ExpiredSignature");
        assert_eq!(error.public_message(), "Unauthorized");
    }

    #[test]
    fn sanitize_flattens_multiline_errors() {
        assert_eq!(
            sanitize(&"connection refused\n  at 127.0.0.1:9\n"),
            "connection refused   at 127.0.0.1:9"
        );
    }
}
