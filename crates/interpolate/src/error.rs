//! Interpolation errors

use thiserror::Error;

/// Why an expression failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Cause {
    #[error("parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },

    #[error("reference to undeclared resource {0}")]
    UndefinedResource(String),

    #[error("resource {resource} has no attribute {attribute}")]
    UndefinedAttribute { resource: String, attribute: String },

    #[error("undefined variable {0}")]
    UndefinedVariable(String),

    #[error("{0} cannot reference itself")]
    SelfReference(String),

    #[error("unknown function {0}")]
    UnknownFunction(String),

    #[error("{function}: expected {expected} arguments, got {found}")]
    Arity {
        function: String,
        expected: String,
        found: usize,
    },

    #[error("{context}: expected {expected}, got {found}")]
    TypeMismatch {
        context: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("division by zero")]
    DivisionByZero,

    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: i64, len: usize },

    #[error("key {0} not found")]
    KeyNotFound(String),

    #[error("{0}")]
    InvalidArgument(String),
}

impl Cause {
    pub(crate) fn mismatch(context: impl Into<String>, expected: &'static str, found: &'static str) -> Self {
        Self::TypeMismatch {
            context: context.into(),
            expected,
            found,
        }
    }
}

/// An expression and the reason it failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{expression}: {cause}")]
pub struct InterpolationError {
    pub expression: String,
    pub cause: Cause,
}

impl InterpolationError {
    pub fn new(expression: impl Into<String>, cause: Cause) -> Self {
        Self {
            expression: expression.into(),
            cause,
        }
    }
}

/// Result type for interpolation
pub type Result<T> = std::result::Result<T, InterpolationError>;
