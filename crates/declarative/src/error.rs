//! Engine errors
//!
//! Build errors are static and stop an operation before any side effect.
//! Eval errors belong to one node of a walk and never abort its siblings.

use dag::GraphError;
use interpolate::InterpolationError;
use schema::ChangeType;
use std::fmt;
use thiserror::Error;

/// Problems found while building the graph for an operation
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("invalid resource address {0:?}")]
    InvalidAddress(String),

    #[error("resource {0} is declared more than once")]
    DuplicateResource(String),

    #[error("{resource}: provider {provider} is not available")]
    UnknownProvider { resource: String, provider: String },

    #[error("{resource}: provider {provider} has no resource type {resource_type}")]
    UnknownResourceType {
        resource: String,
        provider: String,
        resource_type: String,
    },

    #[error("{resource}: depends_on references undeclared resource {dependency}")]
    UndefinedDependency { resource: String, dependency: String },

    #[error("{resource}: {source}")]
    Interpolation {
        resource: String,
        #[source]
        source: InterpolationError,
    },

    #[error("target {0} is not a known resource")]
    UnknownTarget(String),

    #[error("{resource}: reference to {reference} has no dependency edge")]
    MissingEdge { resource: String, reference: String },

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// The provider call an error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderOperation {
    Configure,
    Validate,
    Diff,
    Apply,
    Refresh,
    Import,
}

impl fmt::Display for ProviderOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Configure => "Configure",
            Self::Validate => "Validate",
            Self::Diff => "Diff",
            Self::Apply => "Apply",
            Self::Refresh => "Refresh",
            Self::Import => "Import",
        };
        f.write_str(name)
    }
}

/// A failed provider call, with the operation it was part of
#[derive(Debug, Error)]
#[error("{operation} failed: {source:#}")]
pub struct ProviderError {
    pub operation: ProviderOperation,
    #[source]
    pub source: anyhow::Error,
}

impl ProviderError {
    pub fn new(operation: ProviderOperation, source: anyhow::Error) -> Self {
        Self { operation, source }
    }
}

/// Failure of a single node during a walk
#[derive(Debug, Error)]
pub enum EvalError {
    #[error(transparent)]
    Interpolation(#[from] InterpolationError),

    #[error(transparent)]
    Schema(#[from] schema::Error),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("invalid configuration: {}", .errors.join("; "))]
    Validation { errors: Vec<String> },

    #[error("lifecycle.prevent_destroy forbids this plan ({change})")]
    PreventDestroy { change: ChangeType },

    #[error("planned {planned} but the change is now {actual}; plan again")]
    StalePlan {
        planned: ChangeType,
        actual: ChangeType,
    },

    #[error("provider {0} is not configured")]
    ProviderNotConfigured(String),

    #[error("failed to persist state: {0:#}")]
    State(anyhow::Error),
}

/// Failure of an engine operation as a whole
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("failed to load state: {0:#}")]
    LoadState(#[source] anyhow::Error),

    #[error("failed to persist state: {0:#}")]
    PersistState(#[source] anyhow::Error),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("{address}: {source}")]
    Resource {
        address: String,
        #[source]
        source: EvalError,
    },
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
