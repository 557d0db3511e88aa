//! Error types for DeskWise services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for different failure modes
//! - A retryable-vs-fatal classification used by the orchestrator
//! - HTTP status code mapping
//! - Structured error responses
//! - Error codes for client handling

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
    MissingField,
    InvalidFormat,

    // Authentication errors (2xxx)
    Unauthorized,
    InvalidApiKey,

    // Authorization errors (3xxx)
    Forbidden,
    TenantMismatch,

    // Resource errors (4xxx)
    NotFound,
    UnknownTool,

    // Upstream errors (8xxx)
    EmbeddingUnavailable,
    VectorStoreUnavailable,
    ModelUnavailable,
    ModelRejected,
    UpstreamError,
    CacheError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,

    // Budget ceiling hit mid-request (9xxx)
    DeadlineExceeded,

    // Service unavailable
    ServiceUnavailable,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            // Validation (1xxx)
            ErrorCode::ValidationError => 1001,
            ErrorCode::MissingField => 1002,
            ErrorCode::InvalidFormat => 1003,

            // Auth (2xxx)
            ErrorCode::Unauthorized => 2001,
            ErrorCode::InvalidApiKey => 2002,

            // Authz (3xxx)
            ErrorCode::Forbidden => 3001,
            ErrorCode::TenantMismatch => 3002,

            // Resources (4xxx)
            ErrorCode::NotFound => 4001,
            ErrorCode::UnknownTool => 4002,

            // Upstream (8xxx)
            ErrorCode::EmbeddingUnavailable => 8001,
            ErrorCode::VectorStoreUnavailable => 8002,
            ErrorCode::ModelUnavailable => 8003,
            ErrorCode::ModelRejected => 8004,
            ErrorCode::UpstreamError => 8005,
            ErrorCode::CacheError => 8006,

            // Internal (9xxx)
            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
            ErrorCode::DeadlineExceeded => 9004,

            ErrorCode::ServiceUnavailable => 9999,
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

    #[error("Required field missing: {field}")]
    MissingField { field: String },

    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },

    // Authentication errors
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("Invalid API key")]
    InvalidApiKey,

    // Authorization errors
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    #[error("Tenant mismatch")]
    TenantMismatch,

    // Resource errors
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound { resource_type: String, id: String },

    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    // Upstream errors - retryable
    #[error("Embedding provider unavailable: {message}")]
    EmbeddingUnavailable { message: String },

    #[error("Vector store unavailable: {message}")]
    VectorStoreUnavailable { message: String },

    #[error("Model unavailable: {message}")]
    ModelUnavailable { message: String },

    // Upstream errors - fatal
    #[error("Model rejected request: {message}")]
    ModelRejected { message: String },

    #[error("Cache error: {message}")]
    CacheError { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Request budget exhausted mid-stage; the orchestrator converts this
    // into a best-effort finalize, it never reaches the caller directly
    #[error("Deadline exceeded during stage {stage}")]
    DeadlineExceeded { stage: String },

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Service unavailable: {message}")]
    ServiceUnavailable { message: String },

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::MissingField { .. } => ErrorCode::MissingField,
            AppError::InvalidFormat { .. } => ErrorCode::InvalidFormat,
            AppError::Unauthorized { .. } => ErrorCode::Unauthorized,
            AppError::InvalidApiKey => ErrorCode::InvalidApiKey,
            AppError::Forbidden { .. } => ErrorCode::Forbidden,
            AppError::TenantMismatch => ErrorCode::TenantMismatch,
            AppError::NotFound { .. } => ErrorCode::NotFound,
            AppError::UnknownTool { .. } => ErrorCode::UnknownTool,
            AppError::EmbeddingUnavailable { .. } => ErrorCode::EmbeddingUnavailable,
            AppError::VectorStoreUnavailable { .. } => ErrorCode::VectorStoreUnavailable,
            AppError::ModelUnavailable { .. } => ErrorCode::ModelUnavailable,
            AppError::ModelRejected { .. } => ErrorCode::ModelRejected,
            AppError::CacheError { .. } => ErrorCode::CacheError,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::DeadlineExceeded { .. } => ErrorCode::DeadlineExceeded,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::ServiceUnavailable { .. } => ErrorCode::ServiceUnavailable,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Whether the orchestrator may retry the failed call with backoff.
    ///
    /// Retryable: rate limits, timeouts, transient connection failures on
    /// model/vector/cache calls. Everything else is fatal for the stage.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::EmbeddingUnavailable { .. }
            | AppError::VectorStoreUnavailable { .. }
            | AppError::ModelUnavailable { .. }
            | AppError::ServiceUnavailable { .. } => true,
            AppError::HttpClient(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. }
            | AppError::MissingField { .. }
            | AppError::InvalidFormat { .. } => StatusCode::BAD_REQUEST,

            // 401 Unauthorized
            AppError::Unauthorized { .. } | AppError::InvalidApiKey => StatusCode::UNAUTHORIZED,

            // 403 Forbidden
            AppError::Forbidden { .. } | AppError::TenantMismatch => StatusCode::FORBIDDEN,

            // 404 Not Found
            AppError::NotFound { .. } | AppError::UnknownTool { .. } => StatusCode::NOT_FOUND,

            // 500 Internal Server Error
            AppError::Internal { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_)
            | AppError::DeadlineExceeded { .. }
            | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::EmbeddingUnavailable { .. }
            | AppError::VectorStoreUnavailable { .. }
            | AppError::ModelUnavailable { .. }
            | AppError::ModelRejected { .. }
            | AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            AppError::CacheError { .. } | AppError::ServiceUnavailable { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
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
    pub request_id: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        // Log based on severity
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

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message,
                request_id: None, // Should be filled by middleware
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::UnknownTool {
            name: "weather".into(),
        };
        assert_eq!(err.code(), ErrorCode::UnknownTool);
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_validation_error() {
        let err = AppError::Validation {
            message: "Empty query".into(),
            field: Some("query_text".into()),
        };
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(!err.is_server_error());
        assert!(err.is_client_error());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_retryable_classification() {
        // The two retrieval failure modes stay distinct so the orchestrator
        // can apply different backoff policies
        let embed = AppError::EmbeddingUnavailable {
            message: "connection refused".into(),
        };
        let store = AppError::VectorStoreUnavailable {
            message: "503".into(),
        };
        assert!(embed.is_retryable());
        assert!(store.is_retryable());
        assert_ne!(embed.code(), store.code());

        let rejected = AppError::ModelRejected {
            message: "invalid api key".into(),
        };
        assert!(!rejected.is_retryable());
    }

    #[test]
    fn test_server_error() {
        let err = AppError::Internal {
            message: "Something went wrong".into(),
        };
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.is_server_error());
    }
}
