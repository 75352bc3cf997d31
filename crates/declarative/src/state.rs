//! Recorded state of managed resources and the storage boundary for it

use crate::types::ResourceAddress;
use anyhow::Result;
use schema::{InstanceState, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// What is known about one managed resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceState {
    pub provider: String,
    /// Resources this one depended on when it was last applied
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<ResourceAddress>,
    pub primary: InstanceState,
}

/// State of every managed resource plus the last evaluated outputs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    #[serde(default)]
    pub resources: BTreeMap<ResourceAddress, ResourceState>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, Value>,
}

impl State {
    pub fn get(&self, address: &ResourceAddress) -> Option<&ResourceState> {
        self.resources.get(address)
    }

    /// Instance of a resource, if it exists
    pub fn instance(&self, address: &ResourceAddress) -> Option<&InstanceState> {
        self.resources
            .get(address)
            .map(|r| &r.primary)
            .filter(|instance| instance.exists())
    }

    /// Record a resource, or forget it when the instance no longer exists
    pub fn put(&mut self, address: &ResourceAddress, resource: Option<ResourceState>) {
        match resource {
            Some(resource) if resource.primary.exists() => {
                self.resources.insert(address.clone(), resource);
            }
            _ => {
                self.resources.remove(address);
            }
        }
    }

    pub fn addresses(&self) -> impl Iterator<Item = &ResourceAddress> {
        self.resources.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// Storage for [`State`], keyed by resource address
///
/// Implement this trait to persist state somewhere. The engine persists
/// after every resource it changes, so partial progress survives a failed
/// walk.
pub trait StateStore: Send + Sync {
    /// Load the last persisted state, empty when nothing was stored yet
    fn load(&self) -> Result<State>;

    /// Replace the stored state with `state`
    fn persist(&self, state: &State) -> Result<()>;

    /// Last persisted instance of one resource
    fn get(&self, address: &ResourceAddress) -> Result<Option<InstanceState>> {
        Ok(self.load()?.instance(address).cloned())
    }
}

/// State kept in memory, for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Mutex<State>,
    writes: Mutex<usize>,
}

impl MemoryStateStore {
    pub fn new(state: State) -> Self {
        Self {
            state: Mutex::new(state),
            writes: Mutex::new(0),
        }
    }

    /// Number of times the state was persisted
    pub fn writes(&self) -> usize {
        self.writes.lock().map_or(0, |w| *w)
    }

    /// Copy of the stored state
    pub fn snapshot(&self) -> State {
        self.state
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<State> {
        self.state
            .lock()
            .map(|s| s.clone())
            .map_err(|_| anyhow::anyhow!("state lock poisoned"))
    }

    fn persist(&self, state: &State) -> Result<()> {
        let mut stored = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("state lock poisoned"))?;
        *stored = state.clone();
        if let Ok(mut writes) = self.writes.lock() {
            *writes += 1;
        }
        Ok(())
    }
}
