//! In-memory configuration: what the user declared
//!
//! Values are raw and may still contain `${...}` expressions; they are
//! interpolated per resource during a walk.

use crate::error::BuildError;
use crate::types::ResourceAddress;
use schema::Value;
use std::collections::{BTreeMap, BTreeSet};

/// A declared provider and its settings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderBlock {
    pub name: String,
    pub config: BTreeMap<String, Value>,
}

impl ProviderBlock {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: BTreeMap::new(),
        }
    }

    pub fn attr(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }
}

/// A declared resource
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceBlock {
    pub address: ResourceAddress,
    /// Explicit provider, otherwise implied by the type prefix
    pub provider: Option<String>,
    pub depends_on: Vec<ResourceAddress>,
    pub prevent_destroy: bool,
    pub config: BTreeMap<String, Value>,
}

impl ResourceBlock {
    pub fn new(address: ResourceAddress) -> Self {
        Self {
            address,
            provider: None,
            depends_on: Vec::new(),
            prevent_destroy: false,
            config: BTreeMap::new(),
        }
    }

    pub fn attr(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn provider(mut self, name: impl Into<String>) -> Self {
        self.provider = Some(name.into());
        self
    }

    pub fn depends_on(mut self, address: ResourceAddress) -> Self {
        self.depends_on.push(address);
        self
    }

    pub fn prevent_destroy(mut self) -> Self {
        self.prevent_destroy = true;
        self
    }

    /// Name of the provider that manages this resource
    pub fn provider_name(&self) -> &str {
        self.provider
            .as_deref()
            .unwrap_or_else(|| self.address.implied_provider())
    }
}

/// A named value exported after a walk
#[derive(Debug, Clone, PartialEq)]
pub struct OutputBlock {
    pub name: String,
    pub value: Value,
}

/// Everything declared for one run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Configuration {
    pub variables: BTreeMap<String, Value>,
    pub providers: Vec<ProviderBlock>,
    pub resources: Vec<ResourceBlock>,
    pub outputs: Vec<OutputBlock>,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn provider(mut self, block: ProviderBlock) -> Self {
        self.providers.push(block);
        self
    }

    pub fn resource(mut self, block: ResourceBlock) -> Self {
        self.resources.push(block);
        self
    }

    pub fn output(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.outputs.push(OutputBlock {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn find_resource(&self, address: &ResourceAddress) -> Option<&ResourceBlock> {
        self.resources.iter().find(|r| &r.address == address)
    }

    pub fn find_provider(&self, name: &str) -> Option<&ProviderBlock> {
        self.providers.iter().find(|p| p.name == name)
    }

    /// Fail on resources or providers declared twice
    pub fn check_unique(&self) -> Result<(), BuildError> {
        let mut seen = BTreeSet::new();
        for block in &self.resources {
            if !seen.insert(&block.address) {
                return Err(BuildError::DuplicateResource(block.address.to_string()));
            }
        }
        let mut names = BTreeSet::new();
        for block in &self.providers {
            if !names.insert(block.name.as_str()) {
                return Err(BuildError::DuplicateResource(format!("provider.{}", block.name)));
            }
        }
        Ok(())
    }
}
