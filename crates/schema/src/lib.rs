//! Attribute schemas, flattened state and type-aware diffing
//!
//! Resources declare their attributes as a [`SchemaMap`]. Live instances are
//! recorded as flattened string attributes in an [`InstanceState`]. Given a
//! state and an interpolated [`ResourceConfig`], [`ResourceSchema::diff`]
//! computes the [`InstanceDiff`] that converges one onto the other:
//!
//! ```
//! use schema::{ChangeType, InstanceState, ResourceConfig, ResourceSchema, Schema};
//!
//! let disk = ResourceSchema::default()
//!     .attribute("name", Schema::string().required())
//!     .attribute("size", Schema::int().required().force_new());
//!
//! let config = ResourceConfig::default().with("name", "data").with("size", 20_i64);
//! assert_eq!(disk.diff(None, &config)?.change_type(), ChangeType::Create);
//!
//! let state = InstanceState::new("d-1")
//!     .with_attribute("name", "data")
//!     .with_attribute("size", "10");
//! assert_eq!(disk.diff(Some(&state), &config)?.change_type(), ChangeType::DestroyCreate);
//! # Ok::<(), schema::Error>(())
//! ```

pub mod config;
pub mod diff;
pub mod differ;
pub mod error;
pub mod flatmap;
pub mod reader;
pub mod registry;
pub mod resource_data;
pub mod resource_diff;
pub mod schema;
pub mod state;
pub mod value;

pub use config::{Diagnostics, ResourceConfig};
pub use diff::{AttrDiff, ChangeType, DiffAttrType, InstanceDiff};
pub use error::{Error, Result};
pub use reader::{FieldRead, FlatView};
pub use registry::{CustomizeDiffFn, Registry, RegistryBuilder, ResourceSchema};
pub use resource_data::ResourceData;
pub use resource_diff::ResourceDiff;
pub use schema::{Elem, Schema, SchemaMap, SetHashFn, ValidateFn, ValueType};
pub use state::InstanceState;
pub use value::Value;
