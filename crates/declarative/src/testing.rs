//! Mock provider shared by the engine's unit tests

use crate::provider::{ApplyError, ConfiguredProvider, ResourceProvider};
use crate::types::ResourceAddress;
use anyhow::Result;
use schema::{
    ChangeType, InstanceDiff, InstanceState, Registry, ResourceConfig, ResourceSchema, Schema,
};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// One provider call observed by the mock
#[derive(Debug, Clone)]
pub struct Call {
    pub address: String,
    pub change: ChangeType,
    pub started: Instant,
    pub finished: Instant,
}

#[derive(Debug, Default)]
pub struct Shared {
    pub next_id: AtomicUsize,
    pub fail: BTreeSet<String>,
    pub partial: BTreeSet<String>,
    /// Replacements whose create step fails after the old instance is gone
    pub lost_on_replace: BTreeSet<String>,
    pub gone: BTreeSet<String>,
    pub fail_configure: bool,
    pub delay: Duration,
    pub calls: Mutex<Vec<Call>>,
}

impl Shared {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call(&self, address: &str) -> Option<Call> {
        self.calls().into_iter().find(|c| c.address == address)
    }
}

/// Provider `test` managing `test_server` resources
pub struct MockProvider {
    registry: Registry,
    pub shared: Arc<Shared>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::with(Shared::default())
    }

    pub fn with(shared: Shared) -> Self {
        let server = ResourceSchema::default()
            .attribute("name", Schema::string().required())
            .attribute("size", Schema::string().optional().force_new())
            .attribute("tags", Schema::map().optional())
            .attribute("address", Schema::string().computed());
        Self {
            registry: Registry::builder()
                .register("test_server", server)
                .build()
                .expect("mock schema is valid"),
            shared: Arc::new(shared),
        }
    }
}

impl ResourceProvider for MockProvider {
    fn registry(&self) -> &Registry {
        &self.registry
    }

    fn configure(&self, _config: &ResourceConfig) -> Result<Box<dyn ConfiguredProvider>> {
        if self.shared.fail_configure {
            anyhow::bail!("invalid credentials");
        }
        Ok(Box::new(MockClient {
            shared: Arc::clone(&self.shared),
        }))
    }
}

struct MockClient {
    shared: Arc<Shared>,
}

impl ConfiguredProvider for MockClient {
    fn apply(
        &self,
        address: &ResourceAddress,
        state: Option<&InstanceState>,
        diff: &InstanceDiff,
    ) -> std::result::Result<Option<InstanceState>, ApplyError> {
        let started = Instant::now();
        std::thread::sleep(self.shared.delay);
        let change = diff.change_type();
        let record = |shared: &Shared| {
            if let Ok(mut calls) = shared.calls.lock() {
                calls.push(Call {
                    address: address.to_string(),
                    change,
                    started,
                    finished: Instant::now(),
                });
            }
        };

        if self.shared.fail.contains(&address.name) {
            record(&self.shared);
            return Err(anyhow::anyhow!("{} exploded", address.name).into());
        }
        if change == ChangeType::Destroy {
            record(&self.shared);
            return Ok(None);
        }
        if diff.destroy && self.shared.lost_on_replace.contains(&address.name) {
            record(&self.shared);
            return Err(
                ApplyError::new(anyhow::anyhow!("{} could not be recreated", address.name))
                    .with_partial(InstanceState::default()),
            );
        }

        let prior = state.cloned().unwrap_or_default();
        let mut attributes = diff.apply_to(&prior);
        let id = if prior.exists() && !diff.destroy {
            prior.id.clone()
        } else {
            let n = self.shared.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            attributes.insert("address".into(), format!("10.0.0.{n}"));
            format!("{}-{n}", address.name)
        };
        attributes.insert("id".into(), id.clone());
        let new = InstanceState {
            id,
            attributes,
            ..InstanceState::default()
        };

        record(&self.shared);
        if self.shared.partial.contains(&address.name) {
            return Err(ApplyError::new(anyhow::anyhow!("timed out waiting for {}", address.name))
                .with_partial(new));
        }
        Ok(Some(new))
    }

    fn refresh(&self, _address: &ResourceAddress, state: &InstanceState) -> Result<Option<InstanceState>> {
        if self.shared.gone.contains(&state.id) {
            return Ok(None);
        }
        Ok(Some(state.clone()))
    }

    fn import(&self, address: &ResourceAddress, id: &str) -> Result<Option<InstanceState>> {
        if self.shared.gone.contains(id) {
            return Ok(None);
        }
        Ok(Some(
            InstanceState::new(id)
                .with_attribute("name", address.name.as_str())
                .with_attribute("address", "10.9.9.9"),
        ))
    }
}
