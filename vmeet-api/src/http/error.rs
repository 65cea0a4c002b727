// HTTP error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for HTTP handlers
pub type AppResult<T> = Result<T, AppError>;

/// Application error with HTTP status code and the stable numeric code
/// shared with the directory service.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: u16,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, code: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, 10, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, 7, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, 5, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, 13, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, 14, message)
    }
}

impl From<vmeet_core::Error> for AppError {
    fn from(err: vmeet_core::Error) -> Self {
        let status = match err.code() {
            5 => StatusCode::NOT_FOUND,
            7 => StatusCode::FORBIDDEN,
            10 => StatusCode::BAD_REQUEST,
            14 => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.code(), err.to_string())
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for AppError {}

/// Error response JSON structure
#[derive(Debug, Serialize, Deserialize)]
struct ErrorResponse {
    error: String,
    code: u16,
    status: u16,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            error: self.message,
            code: self.code,
            status: status.as_u16(),
        });
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_errors_map_to_http_statuses() {
        let cases = [
            (vmeet_core::Error::NotFound("x".into()), StatusCode::NOT_FOUND, 5),
            (
                vmeet_core::Error::PermissionDenied("x".into()),
                StatusCode::FORBIDDEN,
                7,
            ),
            (
                vmeet_core::Error::InvalidInput("x".into()),
                StatusCode::BAD_REQUEST,
                10,
            ),
            (
                vmeet_core::Error::Unavailable("x".into()),
                StatusCode::SERVICE_UNAVAILABLE,
                14,
            ),
            (
                vmeet_core::Error::Internal("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
                13,
            ),
        ];
        for (err, status, code) in cases {
            let app: AppError = err.into();
            assert_eq!(app.status, status);
            assert_eq!(app.code, code);
        }
    }
}
