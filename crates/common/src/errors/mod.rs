//! Error types for KGForge services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for different failure modes
//! - Retry classification for upstream failures
//! - HTTP status code mapping
//! - Structured error responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,

    // Retrieval errors (4xxx)
    ExpansionFailed,
    ReformulationFailed,

    // Database errors (7xxx)
    DatabaseError,

    // External service errors (8xxx)
    UpstreamUnavailable,
    UpstreamError,
    EmbeddingError,
    CacheError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 1001,

            ErrorCode::ExpansionFailed => 4001,
            ErrorCode::ReformulationFailed => 4002,

            ErrorCode::DatabaseError => 7001,

            ErrorCode::UpstreamUnavailable => 8001,
            ErrorCode::UpstreamError => 8002,
            ErrorCode::EmbeddingError => 8003,
            ErrorCode::CacheError => 8004,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    // Configuration errors (missing index, invalid knobs) are fatal
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    // Upstream errors
    #[error("Upstream service '{service}' unavailable: {message}")]
    UpstreamUnavailable { service: String, message: String },

    #[error("Embedding service error: {message}")]
    EmbeddingError { message: String },

    #[error("Query reformulation failed: {message}")]
    Reformulation { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Retrieval errors
    #[error("Expansion failed for document '{document}': {message}")]
    Expansion { document: String, message: String },

    // Database errors
    #[error("Database error: {0}")]
    Database(sea_orm::DbErr),

    #[error("Cache error: {message}")]
    CacheError { message: String },

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Shorthand for an upstream outage
    pub fn upstream(service: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::UpstreamUnavailable {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a configuration failure
    pub fn configuration(message: impl Into<String>) -> Self {
        AppError::Configuration {
            message: message.into(),
        }
    }

    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::UpstreamUnavailable { .. } => ErrorCode::UpstreamUnavailable,
            AppError::EmbeddingError { .. } => ErrorCode::EmbeddingError,
            AppError::Reformulation { .. } => ErrorCode::ReformulationFailed,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Expansion { .. } => ErrorCode::ExpansionFailed,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::CacheError { .. } => ErrorCode::CacheError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,

            // 500 Internal Server Error
            AppError::Configuration { .. } |
            AppError::Expansion { .. } |
            AppError::Database(_) |
            AppError::Internal { .. } |
            AppError::Serialization(_) |
            AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::EmbeddingError { .. } |
            AppError::Reformulation { .. } |
            AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            AppError::UpstreamUnavailable { .. } |
            AppError::CacheError { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Whether a bounded retry may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::UpstreamUnavailable { .. })
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let field = match &self {
            AppError::Validation { field, .. } => field.clone(),
            _ => None,
        };

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message,
                field,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<sea_orm::DbErr> for AppError {
    fn from(err: sea_orm::DbErr) -> Self {
        // Pool exhaustion and dropped connections are outages, not query bugs
        match err {
            sea_orm::DbErr::Conn(_) | sea_orm::DbErr::ConnectionAcquire(_) => {
                AppError::upstream("graph-store", err.to_string())
            }
            other => AppError::Database(other),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::CacheError {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::configuration("vector index missing");
        assert_eq!(err.code(), ErrorCode::ConfigurationError);
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code().as_code(), 9002);
    }

    #[test]
    fn test_validation_error() {
        let err = AppError::Validation {
            message: "empty conversation".into(),
            field: Some("messages".into()),
        };
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(!err.is_server_error());
        assert!(err.is_client_error());
    }

    #[test]
    fn test_only_upstream_outages_are_retryable() {
        assert!(AppError::upstream("embedding", "connection refused").is_retryable());
        assert!(!AppError::configuration("bad").is_retryable());
        assert!(!AppError::Reformulation { message: "x".into() }.is_retryable());
        assert!(!AppError::Expansion {
            document: "a.pdf".into(),
            message: "x".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_connection_errors_become_upstream() {
        let err: AppError =
            sea_orm::DbErr::Conn(sea_orm::RuntimeErr::Internal("refused".into())).into();
        assert_eq!(err.code(), ErrorCode::UpstreamUnavailable);

        let err: AppError = sea_orm::DbErr::Custom("syntax".into()).into();
        assert_eq!(err.code(), ErrorCode::DatabaseError);
    }
}
