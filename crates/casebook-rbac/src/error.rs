//! Error types for parsing RBAC identifiers.

use thiserror::Error;

/// Errors raised while parsing kinds, levels and target references.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RbacError {
    /// The string does not name a known entity kind
    #[error("Unknown entity kind: {0}")]
    UnknownKind(String),

    /// The string does not name a permission level
    #[error("Unknown permission level: {0}")]
    UnknownLevel(String),

    /// A target reference was not of the form `kind:id`
    #[error("Malformed target reference: {0}")]
    MalformedTarget(String),
}

/// Result type for RBAC parsing operations.
pub type RbacResult<T> = Result<T, RbacError>;
