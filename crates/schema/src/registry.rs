//! Resource schemas and the registry of resource types

use crate::config::{Diagnostics, ResourceConfig, validate_config};
use crate::diff::InstanceDiff;
use crate::differ;
use crate::error::{Error, Result};
use crate::resource_data::ResourceData;
use crate::resource_diff::ResourceDiff;
use crate::schema::{Schema, SchemaMap, validate_map};
use crate::state::InstanceState;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Hook that may adjust a planned diff before it is finalized
pub type CustomizeDiffFn = fn(&mut ResourceDiff<'_>) -> Result<()>;

/// Schema of one resource type
#[derive(Debug, Clone, Default)]
pub struct ResourceSchema {
    pub schema: SchemaMap,
    pub customize_diff: Option<CustomizeDiffFn>,
    pub description: String,
}

impl ResourceSchema {
    pub fn new(schema: SchemaMap) -> Self {
        Self {
            schema,
            customize_diff: None,
            description: String::new(),
        }
    }

    /// Builder-style attribute insert
    pub fn attribute(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.schema.insert(name.into(), schema);
        self
    }

    pub fn customize_diff(mut self, hook: CustomizeDiffFn) -> Self {
        self.customize_diff = Some(hook);
        self
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = text.into();
        self
    }

    /// Check the schema invariants of every attribute
    pub fn internal_validate(&self) -> Result<()> {
        validate_map(&self.schema, None)
    }

    /// Validate a configuration against this schema
    pub fn validate(&self, config: &ResourceConfig) -> Diagnostics {
        validate_config(&self.schema, config)
    }

    /// Compute the diff from `state` to `config`, then run the customization
    /// hook on any non-empty result.
    pub fn diff(
        &self,
        state: Option<&InstanceState>,
        config: &ResourceConfig,
    ) -> Result<InstanceDiff> {
        let diff = differ::diff(&self.schema, state, config)?;
        let Some(customize) = self.customize_diff else {
            return Ok(diff);
        };
        if diff.is_empty() {
            return Ok(diff);
        }
        let empty = InstanceState::default();
        let state = state.unwrap_or(&empty);
        let mut view = ResourceDiff::new(&self.schema, state, config, &diff);
        customize(&mut view)?;
        view.finish()
    }

    /// Attribute access for create, read, update and delete
    pub fn data<'a>(
        &'a self,
        state: Option<&InstanceState>,
        diff: Option<&'a InstanceDiff>,
    ) -> ResourceData<'a> {
        ResourceData::new(&self.schema, state, diff)
    }

    /// Whether `attribute` is declared and computed
    pub fn is_computed(&self, attribute: &str) -> bool {
        self.schema.get(attribute).is_some_and(|s| s.computed)
    }
}

/// Immutable set of resource type schemas, shared across concurrent walks
#[derive(Debug, Clone, Default)]
pub struct Registry {
    resources: BTreeMap<String, Arc<ResourceSchema>>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn get(&self, resource_type: &str) -> Option<&Arc<ResourceSchema>> {
        self.resources.get(resource_type)
    }

    pub fn contains(&self, resource_type: &str) -> bool {
        self.resources.contains_key(resource_type)
    }

    pub fn resource_types(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// Collects resource schemas and validates them once on build
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    resources: BTreeMap<String, ResourceSchema>,
    duplicate: Option<String>,
}

impl RegistryBuilder {
    pub fn register(mut self, resource_type: impl Into<String>, schema: ResourceSchema) -> Self {
        let resource_type = resource_type.into();
        if self.resources.contains_key(&resource_type) && self.duplicate.is_none() {
            self.duplicate = Some(resource_type.clone());
        }
        self.resources.insert(resource_type, schema);
        self
    }

    pub fn build(self) -> Result<Registry> {
        if let Some(duplicate) = self.duplicate {
            return Err(Error::DuplicateResource(duplicate));
        }
        let mut resources = BTreeMap::new();
        for (name, schema) in self.resources {
            schema.internal_validate().map_err(|err| match err {
                Error::InvalidSchema { key, reason } => Error::InvalidSchema {
                    key: format!("{name}.{key}"),
                    reason,
                },
                other => other,
            })?;
            log::debug!("registered resource type {name}");
            resources.insert(name, Arc::new(schema));
        }
        Ok(Registry { resources })
    }
}
