//! Evaluation context and progress traits
//!
//! The [`EvalContext`] is the only state shared between nodes of a walk.
//! Every access goes through a short-lived lock; no lock is held while a
//! provider is called.

use crate::config::Configuration;
use crate::error::EvalError;
use crate::provider::{ConfiguredProvider, ResourceProvider};
use crate::state::{ResourceState, State, StateStore};
use crate::types::{Action, Operation, ResourceAddress, ResourceOutcome, RunSummary};
use interpolate::{Cause, Reference, Scope};
use schema::{FlatView, InstanceDiff, InstanceState, ResourceSchema, Value, ValueType};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Progress callback for engine operations
///
/// Implement this trait to receive progress updates during a walk. Calls
/// are serialized, but resources run concurrently so their start and
/// complete calls interleave.
pub trait ProgressCallback: Send {
    /// Called before the walk begins, with the number of resources in it
    fn on_walk_start(&mut self, operation: Operation, count: usize);

    /// Called when a resource's change is about to be carried out
    fn on_resource_start(&mut self, address: &ResourceAddress, action: Action);

    /// Called when a resource reaches its outcome
    fn on_resource_complete(&mut self, address: &ResourceAddress, outcome: &ResourceOutcome);

    /// Called after the walk finishes
    fn on_walk_complete(&mut self, summary: &RunSummary);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_walk_start(&mut self, _operation: Operation, _count: usize) {}
    fn on_resource_start(&mut self, _address: &ResourceAddress, _action: Action) {}
    fn on_resource_complete(&mut self, _address: &ResourceAddress, _outcome: &ResourceOutcome) {}
    fn on_walk_complete(&mut self, _summary: &RunSummary) {}
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared state of one walk
pub struct EvalContext<'a> {
    pub(crate) operation: Operation,
    pub(crate) config: &'a Configuration,
    providers: &'a BTreeMap<String, Arc<dyn ResourceProvider>>,
    configured: Mutex<BTreeMap<String, Arc<dyn ConfiguredProvider>>>,
    state: Mutex<State>,
    planned: Mutex<BTreeMap<ResourceAddress, InstanceDiff>>,
    outcomes: Mutex<BTreeMap<ResourceAddress, ResourceOutcome>>,
    store: Option<&'a dyn StateStore>,
    progress: Mutex<&'a mut dyn ProgressCallback>,
}

impl<'a> EvalContext<'a> {
    pub fn new(
        operation: Operation,
        config: &'a Configuration,
        providers: &'a BTreeMap<String, Arc<dyn ResourceProvider>>,
        state: State,
        progress: &'a mut dyn ProgressCallback,
    ) -> Self {
        Self {
            operation,
            config,
            providers,
            configured: Mutex::new(BTreeMap::new()),
            state: Mutex::new(state),
            planned: Mutex::new(BTreeMap::new()),
            outcomes: Mutex::new(BTreeMap::new()),
            store: None,
            progress: Mutex::new(progress),
        }
    }

    /// Persist state through `store` after every write
    pub fn with_store(mut self, store: &'a dyn StateStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn provider(&self, name: &str) -> Option<&Arc<dyn ResourceProvider>> {
        self.providers.get(name)
    }

    /// Schema of a resource type, looked up through its provider
    pub fn schema(&self, provider: &str, resource_type: &str) -> Option<Arc<ResourceSchema>> {
        self.providers
            .get(provider)?
            .registry()
            .get(resource_type)
            .cloned()
    }

    pub fn set_configured(&self, name: &str, provider: Box<dyn ConfiguredProvider>) {
        lock(&self.configured).insert(name.to_string(), Arc::from(provider));
    }

    /// Configured handle of a provider, cloned out so no lock outlives the call
    pub fn configured(&self, name: &str) -> Result<Arc<dyn ConfiguredProvider>, EvalError> {
        lock(&self.configured)
            .get(name)
            .cloned()
            .ok_or_else(|| EvalError::ProviderNotConfigured(name.to_string()))
    }

    /// Current instance of a resource, if it exists
    pub fn instance(&self, address: &ResourceAddress) -> Option<InstanceState> {
        lock(&self.state).instance(address).cloned()
    }

    pub fn resource_state(&self, address: &ResourceAddress) -> Option<ResourceState> {
        lock(&self.state).get(address).cloned()
    }

    /// Record a resource in the shared state and persist it when a store is set
    pub fn write_state(
        &self,
        address: &ResourceAddress,
        resource: Option<ResourceState>,
    ) -> Result<(), EvalError> {
        let mut state = lock(&self.state);
        state.put(address, resource);
        log::debug!("state written for {address}");
        // Persisting under the lock keeps snapshots in write order.
        if let Some(store) = self.store {
            store.persist(&state).map_err(EvalError::State)?;
        }
        Ok(())
    }

    pub fn set_output(&self, name: &str, value: Value) {
        lock(&self.state).outputs.insert(name.to_string(), value);
    }

    pub fn clear_outputs(&self) {
        lock(&self.state).outputs.clear();
    }

    pub fn record_diff(&self, address: &ResourceAddress, diff: InstanceDiff) {
        lock(&self.planned).insert(address.clone(), diff);
    }

    pub fn planned_diff(&self, address: &ResourceAddress) -> Option<InstanceDiff> {
        lock(&self.planned).get(address).cloned()
    }

    pub fn start(&self, address: &ResourceAddress, action: Action) {
        lock(&self.progress).on_resource_start(address, action);
    }

    /// Record a resource's outcome and report it
    pub fn complete(&self, address: &ResourceAddress, outcome: ResourceOutcome) {
        lock(&self.progress).on_resource_complete(address, &outcome);
        lock(&self.outcomes).insert(address.clone(), outcome);
    }

    pub fn outcome(&self, address: &ResourceAddress) -> Option<ResourceOutcome> {
        lock(&self.outcomes).get(address).cloned()
    }

    pub(crate) fn progress(&self) -> MutexGuard<'_, &'a mut dyn ProgressCallback> {
        lock(&self.progress)
    }

    /// Persist the final state, outputs included
    pub fn flush(&self) -> anyhow::Result<()> {
        if let Some(store) = self.store {
            store.persist(&lock(&self.state))?;
        }
        Ok(())
    }

    pub fn into_parts(self) -> (State, BTreeMap<ResourceAddress, InstanceDiff>) {
        let state = self
            .state
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        let planned = self
            .planned
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        (state, planned)
    }

    /// Interpolation scope for expressions declared on `current`
    pub fn scope<'c>(&'c self, current: Option<&'c ResourceAddress>) -> ResourceScope<'c, 'a> {
        ResourceScope { ctx: self, current }
    }

    fn resolve_attribute(&self, address: &ResourceAddress, attribute: &str) -> Result<Value, Cause> {
        let undefined = || Cause::UndefinedResource(address.to_string());
        let block = self.config.find_resource(address).ok_or_else(undefined)?;
        let schema = self
            .schema(block.provider_name(), &address.resource_type)
            .ok_or_else(undefined)?;

        let top = attribute.split('.').next().unwrap_or(attribute);
        if top != "id" && !schema.schema.contains_key(top) {
            return Err(Cause::UndefinedAttribute {
                resource: address.to_string(),
                attribute: attribute.to_string(),
            });
        }
        if self.operation == Operation::Validate {
            return Ok(Value::Unknown);
        }

        let instance = self.instance(address);
        let diff = self.planned_diff(address);
        let pending = diff
            .as_ref()
            .is_some_and(|d| d.destroy || (instance.is_none() && !d.is_empty()));
        let base = instance.unwrap_or_default();
        if !base.exists() && diff.is_none() {
            // Declared but not created yet: known after apply.
            return Ok(Value::Unknown);
        }

        let view = match &diff {
            Some(diff) => FlatView::with_diff(&base, diff),
            None => FlatView::from_state(&base),
        };

        if attribute == "id" {
            let computed = diff
                .as_ref()
                .and_then(|d| d.attributes.get("id"))
                .is_some_and(|a| a.new_computed);
            return Ok(match view.get("id") {
                Some(id) if !computed && !id.is_empty() => Value::string(id),
                _ => Value::Unknown,
            });
        }

        let read = view.read(&schema.schema, attribute);
        if read.computed {
            return Ok(Value::Unknown);
        }
        if let Some(value) = read.value {
            return Ok(value);
        }
        if attribute != top {
            return Err(Cause::UndefinedAttribute {
                resource: address.to_string(),
                attribute: attribute.to_string(),
            });
        }
        if pending && schema.is_computed(top) {
            return Ok(Value::Unknown);
        }
        Ok(schema
            .schema
            .get(top)
            .map_or(Value::Unknown, |s| zero_value(s.ty)))
    }
}

fn zero_value(ty: ValueType) -> Value {
    match ty {
        ValueType::String => Value::string(""),
        ValueType::Int | ValueType::Float => Value::Number(0.0),
        ValueType::Bool => Value::Bool(false),
        ValueType::List => Value::List(Vec::new()),
        ValueType::Set => Value::Set(Vec::new()),
        ValueType::Map => Value::Map(BTreeMap::new()),
    }
}

/// Resolves references for expressions declared on one resource
pub struct ResourceScope<'c, 'a> {
    ctx: &'c EvalContext<'a>,
    current: Option<&'c ResourceAddress>,
}

impl Scope for ResourceScope<'_, '_> {
    fn resolve(&self, reference: &Reference) -> Result<Value, Cause> {
        match reference {
            Reference::Variable { name } => self
                .ctx
                .config
                .variables
                .get(name)
                .cloned()
                .ok_or_else(|| Cause::UndefinedVariable(name.clone())),
            Reference::Resource {
                resource_type,
                name,
                attribute,
            } => {
                let address = ResourceAddress::new(resource_type.as_str(), name.as_str());
                if self.current == Some(&address) {
                    return Err(Cause::SelfReference(address.to_string()));
                }
                self.ctx.resolve_attribute(&address, attribute)
            }
        }
    }
}
