//! # dag
//!
//! A typed directed acyclic graph of work nodes and a concurrent walker that
//! visits them in dependency order.
//!
//! Edges point *toward dependencies*: `graph.connect(a, b)` means `a` depends on
//! `b`, so `b` is visited (and finishes) before `a` starts.
//!
//! ## Example
//!
//! ```
//! use dag::{Graph, Walker};
//!
//! let mut graph = Graph::new();
//! let network = graph.add_node("network");
//! let server = graph.add_node("server");
//! graph.connect(server, network).unwrap();
//!
//! let report = Walker::new()
//!     .jobs(2)
//!     .walk(&graph, |_, name| {
//!         println!("visiting {name}");
//!         Ok::<_, String>(())
//!     })
//!     .unwrap();
//!
//! assert!(report.is_success());
//! ```
//!
//! ## Failure semantics
//!
//! A failing node does not abort the walk. Everything that transitively
//! depends on it is marked [`NodeStatus::DependencyFailed`] and never visited,
//! while independent branches run to completion.

pub mod cancel;
pub mod error;
pub mod graph;
pub mod walker;

pub use cancel::CancelToken;
pub use error::{GraphError, Result};
pub use graph::{Graph, NodeId, TopoOrder};
pub use walker::{NodeRecord, NodeStatus, WalkError, WalkReport, Walker};
