//! Error types for graph construction and walking

use crate::graph::NodeId;
use thiserror::Error;

/// Errors raised while building, validating or walking a graph.
///
/// All of these are static problems: they surface before any node is
/// visited, so no side effect has happened when one is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// The edge set contains a cycle
    #[error("dependency cycle: {}", format_path(.path))]
    Cycle {
        /// Nodes along the cycle, following dependency edges, with the
        /// first node repeated at the end
        path: Vec<NodeId>,
    },

    /// An edge could not be added
    #[error("invalid edge {from} -> {to}: {reason}")]
    InvalidEdge {
        from: NodeId,
        to: NodeId,
        reason: &'static str,
    },

    /// The worker pool could not be created
    #[error("failed to start walker thread pool: {0}")]
    Pool(String),
}

fn format_path(path: &[NodeId]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Result type for graph operations
pub type Result<T> = std::result::Result<T, GraphError>;
