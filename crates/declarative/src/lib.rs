//! # Declarative
//!
//! An engine that converges infrastructure onto a declared configuration.
//!
//! A [`Configuration`] declares providers, resources and outputs. The engine
//! turns it into a dependency graph, walks the graph in parallel and asks
//! each resource's provider to diff, create, update or destroy it. What
//! exists is recorded in [`State`], persisted through a [`StateStore`].
//!
//! ## Core Concepts
//!
//! - **Configuration**: Declared resources whose attributes may reference
//!   other resources (`${test_server.web.id}`) or variables (`${var.region}`)
//! - **Provider**: Owns a set of resource types and their schemas
//! - **Plan**: The changes an apply would make, computed without side effects
//! - **State**: The last known attributes of every managed resource
//!
//! ## Example
//!
//! ```ignore
//! use declarative::{
//!     Configuration, Engine, MemoryStateStore, NoProgress, ResourceBlock,
//! };
//! use std::sync::Arc;
//!
//! let config = Configuration::new()
//!     .resource(ResourceBlock::new("test_resource.web".parse()?).attr("required", "yes"))
//!     .resource(
//!         ResourceBlock::new("test_resource.db".parse()?)
//!             .attr("required", "${test_resource.web.id}"),
//!     );
//!
//! let engine = Engine::new(Arc::new(MemoryStateStore::default()))
//!     .provider("test", Arc::new(my_provider));
//!
//! let plan = engine.plan(&config, &mut NoProgress)?;
//! println!("{} to add", plan.summary().additions);
//!
//! let report = engine.apply(&config, Some(&plan), &mut NoProgress)?;
//! assert!(report.is_success());
//! ```
//!
//! ## Provider Traits
//!
//! The crate uses traits for dependency injection:
//!
//! - [`ResourceProvider`]: Declares resource schemas and configures clients
//! - [`ConfiguredProvider`]: Applies diffs and refreshes instances
//! - [`StateStore`]: Loads and persists state
//! - [`ProgressCallback`]: Receives progress updates
//!
//! [`SchemaProvider`] implements the provider traits from a schema and
//! plain CRUD functions, which covers most providers.

pub mod config;
pub mod context;
pub mod diff;
pub mod error;
pub mod eval;
pub mod executor;
pub mod planner;
pub mod provider;
pub mod schema_provider;
pub mod state;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export main types at crate root
pub use config::{Configuration, OutputBlock, ProviderBlock, ResourceBlock};
pub use context::{EvalContext, NoProgress, ProgressCallback};
pub use diff::{DiffSummary, Plan, PlannedChange};
pub use error::{BuildError, EngineError, EvalError, ProviderError, ProviderOperation, Result};
pub use executor::{Engine, RunReport};
pub use planner::{ExecutionGraph, GraphBuilder, GraphNode};
pub use provider::{ApplyError, ConfiguredProvider, ResourceProvider};
pub use schema_provider::{ConfigureFn, CrudFn, ResourceDefinition, SchemaProvider, SchemaProviderBuilder};
pub use state::{MemoryStateStore, ResourceState, State, StateStore};
pub use types::{
    Action, ExecuteOptions, Operation, ResourceAddress, ResourceOutcome, RunSummary,
};
