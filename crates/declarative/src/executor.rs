//! Execution engine - builds the graph for an operation and walks it

use crate::config::Configuration;
use crate::context::{EvalContext, ProgressCallback};
use crate::diff::{Plan, PlannedChange};
use crate::error::{EngineError, EvalError, ProviderError, ProviderOperation, Result};
use crate::eval::{SequenceOptions, eval_node};
use crate::planner::{ExecutionGraph, GraphBuilder, GraphNode, dependencies_of};
use crate::provider::ResourceProvider;
use crate::state::{ResourceState, State, StateStore};
use crate::types::{ExecuteOptions, Operation, ResourceAddress, ResourceOutcome, RunSummary};
use dag::{CancelToken, NodeStatus, Walker};
use schema::{InstanceState, ResourceConfig};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Result of a walk that changed or checked resources
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub operation: Operation,
    pub outcomes: BTreeMap<ResourceAddress, ResourceOutcome>,
    pub summary: RunSummary,
    /// State after the walk
    pub state: State,
    /// Failures of providers and outputs, which are not resources
    pub errors: BTreeMap<String, String>,
    pub canceled: bool,
}

impl RunReport {
    /// Check if every resource converged and nothing else failed
    pub fn is_success(&self) -> bool {
        !self.canceled && self.errors.is_empty() && self.summary.is_success()
    }

    /// Resources that failed themselves, with their cause
    pub fn failures(&self) -> impl Iterator<Item = (&ResourceAddress, &str)> {
        self.outcomes.iter().filter_map(|(address, outcome)| match outcome {
            ResourceOutcome::Failed { cause } => Some((address, cause.as_str())),
            _ => None,
        })
    }
}

/// Plans and applies configurations against a state store
pub struct Engine {
    providers: BTreeMap<String, Arc<dyn ResourceProvider>>,
    store: Arc<dyn StateStore>,
    options: ExecuteOptions,
    cancel: CancelToken,
}

impl Engine {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            providers: BTreeMap::new(),
            store,
            options: ExecuteOptions::default(),
            cancel: CancelToken::new(),
        }
    }

    /// Register a provider under `name`
    pub fn provider(mut self, name: impl Into<String>, provider: Arc<dyn ResourceProvider>) -> Self {
        self.providers.insert(name.into(), provider);
        self
    }

    pub fn options(mut self, options: ExecuteOptions) -> Self {
        self.options = options;
        self
    }

    /// Token that cancels walks started by this engine.
    ///
    /// Running resources finish; nothing new starts. A request made between
    /// walks applies to the next one, and is cleared when that walk ends.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn load_state(&self) -> Result<State> {
        self.store.load().map_err(EngineError::LoadState)
    }

    /// Build the graph of an operation without walking it
    pub fn graph(&self, config: &Configuration, operation: Operation) -> Result<ExecutionGraph> {
        let state = self.load_state()?;
        Ok(GraphBuilder::new(operation, config, &state, &self.providers)
            .targets(&self.options.targets)
            .build()?)
    }

    /// Check the configuration without touching state or infrastructure
    pub fn validate(&self, config: &Configuration) -> Result<RunReport> {
        let mut progress = crate::context::NoProgress;
        let (report, _) = self.run(config, Operation::Validate, State::default(), None, &mut progress)?;
        Ok(report)
    }

    /// Compute the changes an apply would make
    pub fn plan<P: ProgressCallback>(&self, config: &Configuration, progress: &mut P) -> Result<Plan> {
        let state = self.load_state()?;
        let (report, planned) = self.run(config, Operation::Plan, state, None, progress)?;
        Ok(Self::collect_plan(Operation::Plan, report, planned))
    }

    /// Compute what a destroy would remove
    pub fn plan_destroy(&self, config: &Configuration) -> Result<Plan> {
        let state = self.load_state()?;
        let graph = GraphBuilder::new(Operation::Destroy, config, &state, &self.providers)
            .targets(&self.options.targets)
            .build()?;
        let mut plan = Plan::new(Operation::Destroy);
        for address in graph.resources.keys() {
            if let Some(instance) = state.instance(address) {
                if let Some(block) = config.find_resource(address)
                    && block.prevent_destroy
                {
                    plan.errors.insert(
                        address.to_string(),
                        EvalError::PreventDestroy {
                            change: schema::ChangeType::Destroy,
                        }
                        .to_string(),
                    );
                    continue;
                }
                let change = PlannedChange::new(
                    address.clone(),
                    schema::InstanceDiff::destroy(),
                    Some(instance.clone()),
                );
                plan.changes.insert(address.clone(), change);
            }
        }
        Ok(plan)
    }

    /// Converge infrastructure onto the configuration.
    ///
    /// With a saved `plan`, every resource must still diff the way it was
    /// planned; a destroy plan runs a destroy walk.
    pub fn apply<P: ProgressCallback>(
        &self,
        config: &Configuration,
        plan: Option<&Plan>,
        progress: &mut P,
    ) -> Result<RunReport> {
        if plan.is_some_and(|p| p.operation == Operation::Destroy) {
            return self.destroy(config, progress);
        }
        let state = self.load_state()?;
        let (report, _) = self.run(config, Operation::Apply, state, plan, progress)?;
        Ok(report)
    }

    /// Update state from the real infrastructure
    pub fn refresh<P: ProgressCallback>(&self, config: &Configuration, progress: &mut P) -> Result<RunReport> {
        let state = self.load_state()?;
        let (report, _) = self.run(config, Operation::Refresh, state, None, progress)?;
        Ok(report)
    }

    /// Destroy every resource in state, dependents first
    pub fn destroy<P: ProgressCallback>(&self, config: &Configuration, progress: &mut P) -> Result<RunReport> {
        let state = self.load_state()?;
        let (report, _) = self.run(config, Operation::Destroy, state, None, progress)?;
        Ok(report)
    }

    /// Adopt an existing instance into state under a declared address
    pub fn import(&self, config: &Configuration, address: &ResourceAddress, id: &str) -> Result<InstanceState> {
        let fail = |source: EvalError| EngineError::Resource {
            address: address.to_string(),
            source,
        };
        let block = config
            .find_resource(address)
            .ok_or_else(|| crate::error::BuildError::UnknownTarget(address.to_string()))?;
        let provider_name = block.provider_name();
        let provider = self.providers.get(provider_name).ok_or_else(|| {
            crate::error::BuildError::UnknownProvider {
                resource: address.to_string(),
                provider: provider_name.to_string(),
            }
        })?;

        let mut state = self.load_state()?;
        if state.instance(address).is_some() {
            return Err(fail(EvalError::Validation {
                errors: vec![format!("{address} is already managed")],
            }));
        }

        let mut raw = BTreeMap::new();
        if let Some(provider_block) = config.find_provider(provider_name) {
            let scope = config
                .variables
                .iter()
                .fold(interpolate::MapScope::new(), |scope, (name, value)| {
                    scope.with(format!("var.{name}"), value.clone())
                });
            for (key, value) in &provider_block.config {
                let value = interpolate::interpolate_value(value, &scope)
                    .map_err(|e| fail(EvalError::Interpolation(e)))?;
                raw.insert(key.clone(), value);
            }
        }
        let configured = provider
            .configure(&ResourceConfig::new(raw))
            .map_err(|e| fail(ProviderError::new(ProviderOperation::Configure, e).into()))?;
        let instance = configured
            .import(address, id)
            .map_err(|e| fail(ProviderError::new(ProviderOperation::Import, e).into()))?
            .ok_or_else(|| {
                fail(
                    ProviderError::new(
                        ProviderOperation::Import,
                        anyhow::anyhow!("no {} with id {id}", address.resource_type),
                    )
                    .into(),
                )
            })?;

        let dependencies = dependencies_of(block, config)?.into_iter().collect();
        state.put(
            address,
            Some(ResourceState {
                provider: provider_name.to_string(),
                dependencies,
                primary: instance.clone(),
            }),
        );
        self.store.persist(&state).map_err(EngineError::PersistState)?;
        log::info!("imported {address} ({id})");
        Ok(instance)
    }

    /// Build the graph, walk it and collect what happened
    fn run(
        &self,
        config: &Configuration,
        operation: Operation,
        state: State,
        plan: Option<&Plan>,
        progress: &mut dyn ProgressCallback,
    ) -> Result<(RunReport, BTreeMap<ResourceAddress, PlannedChange>)> {
        let execution = GraphBuilder::new(operation, config, &state, &self.providers)
            .targets(&self.options.targets)
            .build()?;

        progress.on_walk_start(operation, execution.resource_count());
        log::info!(
            "{operation}: walking {} resource(s) with {} job(s)",
            execution.resource_count(),
            self.options.jobs
        );

        let mut ctx = EvalContext::new(operation, config, &self.providers, state, progress);
        if matches!(operation, Operation::Apply | Operation::Refresh | Operation::Destroy) {
            ctx = ctx.with_store(self.store.as_ref());
        }
        let options = SequenceOptions {
            refresh: self.options.refresh,
            planned: plan.is_some(),
        };

        let walk = Walker::new()
            .jobs(self.options.jobs)
            .cancel_token(self.cancel.clone())
            .walk(&execution.graph, |_, node| eval_node(&ctx, node, options, plan));
        self.cancel.reset();
        let walk = walk?;

        let mut outcomes = BTreeMap::new();
        let mut errors = BTreeMap::new();
        for (id, record) in walk.records() {
            let Some(node) = execution.graph.node(id) else {
                continue;
            };
            let outcome = match &record.status {
                NodeStatus::Done => node
                    .address()
                    .and_then(|address| ctx.outcome(address))
                    .unwrap_or(ResourceOutcome::Unchanged),
                NodeStatus::Failed(err) => ResourceOutcome::Failed {
                    cause: err.to_string(),
                },
                NodeStatus::Panicked { message } => ResourceOutcome::Failed {
                    cause: format!("panicked: {message}"),
                },
                NodeStatus::DependencyFailed { dependency } => ResourceOutcome::Skipped {
                    dependency: dependency_name(&execution, *dependency),
                },
                NodeStatus::Waiting | NodeStatus::Ready | NodeStatus::Running | NodeStatus::Canceled => {
                    ResourceOutcome::Canceled
                }
            };

            match node.address() {
                Some(address) => {
                    if !matches!(record.status, NodeStatus::Done) {
                        ctx.progress().on_resource_complete(address, &outcome);
                    }
                    outcomes.insert(address.clone(), outcome);
                }
                None => {
                    if let ResourceOutcome::Failed { cause } = &outcome {
                        errors.insert(node.to_string(), cause.clone());
                    }
                }
            }
        }

        let mut summary = RunSummary::default();
        for outcome in outcomes.values() {
            summary.add(outcome);
        }
        ctx.progress().on_walk_complete(&summary);

        if matches!(operation, Operation::Apply | Operation::Destroy) {
            if operation == Operation::Destroy {
                ctx.clear_outputs();
            }
            ctx.flush().map_err(EngineError::PersistState)?;
        }

        let (state, planned) = ctx.into_parts();
        let planned = planned
            .into_iter()
            .map(|(address, diff)| {
                let prior = state.instance(&address).cloned();
                let change = PlannedChange::new(address.clone(), diff, prior);
                (address, change)
            })
            .collect();

        log::info!(
            "{operation}: {} changed, {} failed, {} skipped",
            summary.total_changes(),
            summary.failed,
            summary.skipped
        );
        let report = RunReport {
            operation,
            outcomes,
            summary,
            state,
            errors,
            canceled: walk.canceled(),
        };
        Ok((report, planned))
    }

    fn collect_plan(
        operation: Operation,
        report: RunReport,
        changes: BTreeMap<ResourceAddress, PlannedChange>,
    ) -> Plan {
        let mut plan = Plan::new(operation);
        plan.changes = changes;
        plan.outputs = report.state.outputs;
        plan.errors = report.errors;
        for (address, outcome) in report.outcomes {
            match outcome {
                ResourceOutcome::Failed { cause } => {
                    plan.errors.insert(address.to_string(), cause);
                }
                ResourceOutcome::Skipped { dependency } => {
                    plan.errors
                        .insert(address.to_string(), format!("skipped: {dependency} failed"));
                }
                ResourceOutcome::Canceled => {
                    plan.errors.insert(address.to_string(), "canceled".to_string());
                }
                ResourceOutcome::Succeeded { .. } | ResourceOutcome::Unchanged => {}
            }
        }
        plan
    }
}

/// Display name of the node whose failure caused a skip
fn dependency_name(execution: &ExecutionGraph, id: dag::NodeId) -> String {
    execution
        .graph
        .node(id)
        .map_or_else(|| id.to_string(), ToString::to_string)
}
