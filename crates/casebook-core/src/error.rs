//! Error types for engine operations
//!
//! Every fallible operation in this crate returns [`CoreError`]. The HTTP
//! layer maps errors to responses with [`CoreError::status_code`] and
//! [`CoreError::error_code`].

use casebook_rbac::{RbacError, TargetRef};
use thiserror::Error;

use crate::blob::BlobError;
use crate::config::ConfigError;

/// Engine error types.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Record, permission, role or link does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Request is structurally invalid
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A value could not be coerced to the declared field type
    #[error("Type mismatch on '{field}': expected {expected}, got {value}")]
    TypeMismatch {
        /// Field name
        field: String,
        /// Declared type
        expected: String,
        /// Offending value
        value: String,
    },

    /// Caller lacks the required permission level
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Another transaction committed first
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Blob storage failed
    #[error("Blob storage error: {0}")]
    Blob(#[from] BlobError),

    /// A two-step operation completed one step and failed the other
    #[error("Partial failure: '{completed}' completed but '{failed}' failed: {message}")]
    PartialFailure {
        /// Step that completed
        completed: String,
        /// Step that failed
        failed: String,
        /// Underlying error
        message: String,
    },

    /// Configuration is invalid
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for engine operations.
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Not-found error for a target.
    pub fn not_found(target: TargetRef) -> Self {
        CoreError::NotFound(target.to_string())
    }

    /// Type mismatch for `field`.
    pub fn mismatch(field: &str, expected: impl Into<String>, value: impl ToString) -> Self {
        CoreError::TypeMismatch {
            field: field.to_string(),
            expected: expected.into(),
            value: value.to_string(),
        }
    }

    /// Check if this error should be logged at error level.
    ///
    /// Not-found, validation and authorization failures are caller mistakes
    /// and should not be logged as errors.
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            CoreError::Blob(_)
                | CoreError::PartialFailure { .. }
                | CoreError::Config(_)
                | CoreError::Serialization(_)
        )
    }

    /// Get HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            CoreError::NotFound(_) => 404,
            CoreError::Validation(_) => 400,
            CoreError::TypeMismatch { .. } => 422,
            CoreError::Unauthorized(_) => 403,
            CoreError::Conflict(_) => 409,
            CoreError::Blob(_) => 502,
            CoreError::PartialFailure { .. }
            | CoreError::Config(_)
            | CoreError::Serialization(_) => 500,
        }
    }

    /// Get error code for API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::NotFound(_) => "NOT_FOUND",
            CoreError::Validation(_) => "VALIDATION_ERROR",
            CoreError::TypeMismatch { .. } => "TYPE_MISMATCH",
            CoreError::Unauthorized(_) => "UNAUTHORIZED",
            CoreError::Conflict(_) => "CONFLICT",
            CoreError::Blob(_) => "BLOB_ERROR",
            CoreError::PartialFailure { .. } => "PARTIAL_FAILURE",
            CoreError::Config(_) => "CONFIG_ERROR",
            CoreError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

impl From<RbacError> for CoreError {
    fn from(err: RbacError) -> Self {
        CoreError::Validation(err.to_string())
    }
}
