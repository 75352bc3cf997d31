//! Provider traits: the boundary between the engine and real infrastructure
//!
//! A [`ResourceProvider`] describes the resource types it manages and
//! validates configuration without side effects. Configuring it yields a
//! [`ConfiguredProvider`] that talks to the outside world.

use crate::types::ResourceAddress;
use anyhow::Result;
use schema::{Diagnostics, InstanceDiff, InstanceState, Registry, ResourceConfig, ResourceSchema};
use std::fmt;

/// A provider before configuration
pub trait ResourceProvider: Send + Sync {
    /// Schemas of every resource type this provider manages
    fn registry(&self) -> &Registry;

    /// Static checks of the provider's own configuration
    fn validate(&self, _config: &ResourceConfig) -> Diagnostics {
        Diagnostics::default()
    }

    /// Static checks of one resource's configuration, no network calls
    fn validate_resource(&self, resource_type: &str, config: &ResourceConfig) -> Diagnostics {
        match self.registry().get(resource_type) {
            Some(schema) => schema.validate(config),
            None => {
                let mut diagnostics = Diagnostics::default();
                diagnostics.error(format!("unsupported resource type {resource_type}"));
                diagnostics
            }
        }
    }

    /// Establish a session with the given settings
    fn configure(&self, config: &ResourceConfig) -> Result<Box<dyn ConfiguredProvider>>;
}

/// A configured provider, able to change and observe real resources
pub trait ConfiguredProvider: Send + Sync {
    /// Compute the changes that converge `state` onto `config`
    fn diff(
        &self,
        schema: &ResourceSchema,
        state: Option<&InstanceState>,
        config: &ResourceConfig,
    ) -> schema::Result<InstanceDiff> {
        schema.diff(state, config)
    }

    /// Carry out a diff.
    ///
    /// Returns the new state, or `None` when the instance is gone. A diff
    /// that both destroys and carries attributes is a replacement: destroy
    /// the old instance, then create the new one.
    fn apply(
        &self,
        address: &ResourceAddress,
        state: Option<&InstanceState>,
        diff: &InstanceDiff,
    ) -> std::result::Result<Option<InstanceState>, ApplyError>;

    /// Read the live instance. `None` means it no longer exists.
    fn refresh(&self, address: &ResourceAddress, state: &InstanceState)
    -> Result<Option<InstanceState>>;

    /// Adopt an existing instance by its ID
    fn import(&self, address: &ResourceAddress, _id: &str) -> Result<Option<InstanceState>> {
        anyhow::bail!("{} does not support import", address.resource_type)
    }
}

/// A failed apply, with whatever state the provider could still determine
pub struct ApplyError {
    /// State of a partially created or modified instance. An instance
    /// without an ID means the old instance was deleted and nothing
    /// replaced it.
    pub partial: Option<InstanceState>,
    pub source: anyhow::Error,
}

impl ApplyError {
    pub fn new(source: anyhow::Error) -> Self {
        Self {
            partial: None,
            source,
        }
    }

    pub fn with_partial(mut self, state: InstanceState) -> Self {
        self.partial = Some(state);
        self
    }
}

impl From<anyhow::Error> for ApplyError {
    fn from(source: anyhow::Error) -> Self {
        Self::new(source)
    }
}

impl fmt::Debug for ApplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplyError")
            .field("partial", &self.partial.as_ref().map(|s| &s.id))
            .field("source", &self.source)
            .finish()
    }
}

impl fmt::Display for ApplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.source)
    }
}
