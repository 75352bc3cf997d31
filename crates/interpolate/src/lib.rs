//! `${...}` interpolation over configuration values
//!
//! Strings in a resource configuration may embed expressions:
//!
//! ```
//! use interpolate::{MapScope, Template};
//! use schema::Value;
//!
//! let scope = MapScope::new()
//!     .with("var.env", "prod")
//!     .with("test_resource.web.id", "i-42");
//!
//! let template = Template::parse("${upper(var.env)}-${test_resource.web.id}")?;
//! assert_eq!(template.evaluate(&scope)?, Value::string("PROD-i-42"));
//! # Ok::<(), interpolate::InterpolationError>(())
//! ```
//!
//! References to values that are not known yet evaluate to
//! [`Value::Unknown`](schema::Value::Unknown), and anything computed from an
//! unknown is unknown too.

pub mod ast;
pub mod error;
pub mod eval;
pub mod functions;
pub mod parser;

pub use ast::{Expr, Reference};
pub use error::{Cause, InterpolationError, Result};
pub use eval::{MapScope, Scope, Template, interpolate_value, value_references};
pub use functions::{function_names, lookup_function};
