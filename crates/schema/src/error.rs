//! Error types for the schema crate

use crate::schema::ValueType;
use thiserror::Error;

/// Errors raised by schema registration, decoding and diffing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A schema definition breaks one of the attribute invariants
    #[error("invalid schema for {key}: {reason}")]
    InvalidSchema { key: String, reason: String },

    /// The same resource type was registered twice
    #[error("resource type registered twice: {0}")]
    DuplicateResource(String),

    /// A configuration value does not fit the schema's type
    #[error("{key}: expected {expected}, got {found}")]
    SchemaValidation {
        key: String,
        expected: ValueType,
        found: &'static str,
    },

    /// A key that the schema does not declare
    #[error("unknown attribute: {0}")]
    UnknownAttribute(String),

    /// A diff customization the schema does not allow
    #[error("invalid diff customization of {key}: {reason}")]
    InvalidCustomization { key: String, reason: String },

    /// A resource-defined check rejected the diff
    #[error("{0}")]
    Custom(String),
}

/// Result type for schema operations
pub type Result<T> = std::result::Result<T, Error>;
