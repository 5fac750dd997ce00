//! Error types for ConvoForge services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for different failure modes
//! - A retry classification used by the job executors
//! - HTTP status code mapping for the gateway
//! - Error codes for machine-readable inspection

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

    // Tenant isolation (3xxx)
    TenantViolation,

    // Resource errors (4xxx)
    NotFound,

    // Conflict errors (5xxx)
    Conflict,

    // Attachment processing (6xxx)
    AttachmentBlocked,
    AttachmentTooLarge,
    ExtractionFailed,

    // Database errors (7xxx)
    DatabaseError,
    ConnectionError,

    // External service errors (8xxx)
    UpstreamError,
    EmbeddingError,
    EmbeddingTimeout,
    DimensionMismatch,
    QueueError,
    VectorStoreError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,

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

            // Tenant isolation (3xxx)
            ErrorCode::TenantViolation => 3001,

            // Resources (4xxx)
            ErrorCode::NotFound => 4001,

            // Conflicts (5xxx)
            ErrorCode::Conflict => 5001,

            // Attachments (6xxx)
            ErrorCode::AttachmentBlocked => 6001,
            ErrorCode::AttachmentTooLarge => 6002,
            ErrorCode::ExtractionFailed => 6003,

            // Database (7xxx)
            ErrorCode::DatabaseError => 7001,
            ErrorCode::ConnectionError => 7002,

            // External (8xxx)
            ErrorCode::UpstreamError => 8001,
            ErrorCode::EmbeddingError => 8002,
            ErrorCode::EmbeddingTimeout => 8003,
            ErrorCode::DimensionMismatch => 8004,
            ErrorCode::QueueError => 8005,
            ErrorCode::VectorStoreError => 8006,

            // Internal (9xxx)
            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,

            ErrorCode::ServiceUnavailable => 9999,
        }
    }
}

/// Retry classification consumed by the job executors.
///
/// Each class has a fixed broker policy: Transient retries with backoff
/// until the attempt cap, Permanent dead-letters immediately, NotFound
/// acks as a no-op, Conflict re-reads before deciding, TenantViolation
/// fails closed and is never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Permanent,
    NotFound,
    Conflict,
    TenantViolation,
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

    // Resource errors
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound { resource_type: String, id: String },

    // Conflict errors (compare-and-swap misses)
    #[error("Conflict: {message}")]
    Conflict { message: String },

    // Tenant isolation failures. Never recoverable.
    #[error("Tenant violation: {message}")]
    TenantViolation { message: String },

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    // External service errors
    #[error("Embedding service error: {message}")]
    EmbeddingError { message: String },

    #[error("Embedding timeout after {timeout_ms}ms")]
    EmbeddingTimeout { timeout_ms: u64 },

    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Queue error: {message}")]
    QueueError { message: String },

    #[error("Vector store error: {message}")]
    VectorStore { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Attachment processing
    #[error("Blocked attachment extension: {extension}")]
    AttachmentBlocked { extension: String },

    #[error("Attachment too large: {size} bytes exceeds limit of {limit} bytes")]
    AttachmentTooLarge { size: u64, limit: u64 },

    #[error("Extraction failed: {message}")]
    ExtractionFailed { message: String },

    // Internal errors
    #[error("Internal error: {message}")]
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
            AppError::NotFound { .. } => ErrorCode::NotFound,
            AppError::Conflict { .. } => ErrorCode::Conflict,
            AppError::TenantViolation { .. } => ErrorCode::TenantViolation,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::DatabaseConnection { .. } => ErrorCode::ConnectionError,
            AppError::EmbeddingError { .. } => ErrorCode::EmbeddingError,
            AppError::EmbeddingTimeout { .. } => ErrorCode::EmbeddingTimeout,
            AppError::DimensionMismatch { .. } => ErrorCode::DimensionMismatch,
            AppError::QueueError { .. } => ErrorCode::QueueError,
            AppError::VectorStore { .. } => ErrorCode::VectorStoreError,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::AttachmentBlocked { .. } => ErrorCode::AttachmentBlocked,
            AppError::AttachmentTooLarge { .. } => ErrorCode::AttachmentTooLarge,
            AppError::ExtractionFailed { .. } => ErrorCode::ExtractionFailed,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::ServiceUnavailable { .. } => ErrorCode::ServiceUnavailable,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Classify this error for the worker retry policy.
    pub fn class(&self) -> ErrorClass {
        match self {
            AppError::NotFound { .. } => ErrorClass::NotFound,
            AppError::Conflict { .. } => ErrorClass::Conflict,
            AppError::TenantViolation { .. } => ErrorClass::TenantViolation,

            // Malformed input never heals on retry.
            AppError::Validation { .. }
            | AppError::MissingField { .. }
            | AppError::InvalidFormat { .. }
            | AppError::DimensionMismatch { .. }
            | AppError::AttachmentBlocked { .. }
            | AppError::AttachmentTooLarge { .. }
            | AppError::ExtractionFailed { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_) => ErrorClass::Permanent,

            // Network, database and upstream failures are retried.
            AppError::Database(_)
            | AppError::DatabaseConnection { .. }
            | AppError::EmbeddingError { .. }
            | AppError::EmbeddingTimeout { .. }
            | AppError::QueueError { .. }
            | AppError::VectorStore { .. }
            | AppError::HttpClient(_)
            | AppError::ServiceUnavailable { .. }
            | AppError::Internal { .. }
            | AppError::Other(_) => ErrorClass::Transient,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation { .. }
            | AppError::MissingField { .. }
            | AppError::InvalidFormat { .. } => StatusCode::BAD_REQUEST,

            AppError::NotFound { .. } => StatusCode::NOT_FOUND,

            AppError::Conflict { .. } => StatusCode::CONFLICT,

            AppError::AttachmentTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,

            AppError::AttachmentBlocked { .. } => StatusCode::UNPROCESSABLE_ENTITY,

            AppError::EmbeddingError { .. }
            | AppError::EmbeddingTimeout { .. }
            | AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,

            AppError::QueueError { .. }
            | AppError::VectorStore { .. }
            | AppError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,

            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

/// Structured error response for the gateway API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        if matches!(self, AppError::TenantViolation { .. }) {
            tracing::error!(
                error = %message,
                code = ?code,
                "TENANT VIOLATION - failing closed"
            );
        } else if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        // Internal failure details never leave the process.
        let public_message = if status.is_server_error() {
            "not available".to_string()
        } else {
            message
        };

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message: public_message,
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::NotFound {
            resource_type: "session".into(),
            id: "abc".into(),
        };
        assert_eq!(err.code(), ErrorCode::NotFound);
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.class(), ErrorClass::NotFound);
    }

    #[test]
    fn test_transient_classification() {
        let err = AppError::EmbeddingTimeout { timeout_ms: 10_000 };
        assert_eq!(err.class(), ErrorClass::Transient);

        let err = AppError::VectorStore {
            message: "connection reset".into(),
        };
        assert_eq!(err.class(), ErrorClass::Transient);
    }

    #[test]
    fn test_permanent_classification() {
        let err = AppError::DimensionMismatch {
            expected: 768,
            actual: 1536,
        };
        assert_eq!(err.class(), ErrorClass::Permanent);

        let err = AppError::AttachmentBlocked {
            extension: ".exe".into(),
        };
        assert_eq!(err.class(), ErrorClass::Permanent);
    }

    #[test]
    fn test_tenant_violation_never_retryable() {
        let err = AppError::TenantViolation {
            message: "search without guild filter".into(),
        };
        assert_eq!(err.class(), ErrorClass::TenantViolation);
        assert!(err.is_server_error());
    }
}
