//! Evaluation steps - the small operations a node performs during a walk
//!
//! Each node runs an ordered [`EvalStep`] sequence chosen by its kind and
//! the operation. Steps share a per-node scratch [`NodeEval`]; only `Apply`
//! and `Refresh` reach outside the process.

use crate::config::{ProviderBlock, ResourceBlock};
use crate::context::EvalContext;
use crate::diff::Plan;
use crate::error::{EvalError, ProviderError, ProviderOperation};
use crate::planner::{GraphNode, dependencies_of};
use crate::state::ResourceState;
use crate::types::{Action, Operation, ResourceAddress, ResourceOutcome};
use interpolate::interpolate_value;
use schema::{ChangeType, Diagnostics, InstanceDiff, InstanceState, ResourceConfig};
use std::collections::BTreeMap;

/// One step of a node's evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalStep {
    ValidateProvider,
    ConfigureProvider,
    ReadState,
    Refresh,
    Interpolate,
    ValidateResource,
    Diff,
    DiffDestroy,
    CheckPreventDestroy,
    ComparePlan,
    RecordDiff,
    Apply,
    WriteState,
    EvaluateOutput,
}

/// Knobs that change a node's sequence
#[derive(Debug, Clone, Copy, Default)]
pub struct SequenceOptions {
    pub refresh: bool,
    pub planned: bool,
}

/// The steps `node` runs for `operation`
pub fn eval_sequence(node: &GraphNode, operation: Operation, options: SequenceOptions) -> Vec<EvalStep> {
    use EvalStep::{
        Apply, CheckPreventDestroy, ComparePlan, ConfigureProvider, Diff, DiffDestroy,
        EvaluateOutput, Interpolate, ReadState, RecordDiff, Refresh, ValidateProvider,
        ValidateResource, WriteState,
    };

    let refresh = options.refresh && !options.planned;
    let mut steps = Vec::new();
    match (node, operation) {
        (GraphNode::Provider { .. }, Operation::Validate) => steps.push(ValidateProvider),
        (GraphNode::Provider { .. }, _) => steps.push(ConfigureProvider),

        (GraphNode::Output { .. }, Operation::Plan | Operation::Apply) => steps.push(EvaluateOutput),
        (GraphNode::Output { .. }, _) => {}

        (GraphNode::Resource { .. }, Operation::Validate) => {
            steps.extend([Interpolate, ValidateResource]);
        }
        (GraphNode::Resource { .. }, Operation::Refresh) => steps.extend([ReadState, Refresh]),
        (GraphNode::Resource { declared, .. }, Operation::Destroy) => {
            steps.extend([ReadState, DiffDestroy]);
            if *declared {
                steps.push(CheckPreventDestroy);
            }
            steps.extend([Apply, WriteState]);
        }
        (GraphNode::Resource { declared, .. }, Operation::Plan | Operation::Apply) => {
            steps.push(ReadState);
            if refresh {
                steps.push(Refresh);
            }
            if *declared {
                steps.extend([Interpolate, Diff, CheckPreventDestroy]);
            } else {
                steps.push(DiffDestroy);
            }
            if operation == Operation::Plan {
                steps.push(RecordDiff);
            } else {
                if options.planned {
                    steps.push(ComparePlan);
                }
                steps.extend([Apply, WriteState]);
            }
        }
    }
    steps
}

/// Scratch state of one resource node while its steps run
pub struct NodeEval<'n> {
    pub address: &'n ResourceAddress,
    pub provider: &'n str,
    pub block: Option<&'n ResourceBlock>,
    pub prior: Option<InstanceState>,
    pub dependencies: Vec<ResourceAddress>,
    pub config: Option<ResourceConfig>,
    pub diff: InstanceDiff,
    pub applied: Option<Option<InstanceState>>,
    pub outcome: ResourceOutcome,
}

impl<'n> NodeEval<'n> {
    pub fn new(address: &'n ResourceAddress, provider: &'n str, block: Option<&'n ResourceBlock>) -> Self {
        Self {
            address,
            provider,
            block,
            prior: None,
            dependencies: Vec::new(),
            config: None,
            diff: InstanceDiff::default(),
            applied: None,
            outcome: ResourceOutcome::Unchanged,
        }
    }

    fn resource_state(&self, primary: InstanceState) -> ResourceState {
        ResourceState {
            provider: self.provider.to_string(),
            dependencies: self.dependencies.clone(),
            primary,
        }
    }
}

/// Evaluate one graph node
pub fn eval_node(
    ctx: &EvalContext<'_>,
    node: &GraphNode,
    options: SequenceOptions,
    plan: Option<&Plan>,
) -> Result<(), EvalError> {
    let steps = eval_sequence(node, ctx.operation, options);
    match node {
        GraphNode::Provider { name } => {
            let block = ctx.config.find_provider(name);
            for step in steps {
                match step {
                    EvalStep::ValidateProvider => validate_provider(ctx, name, block)?,
                    EvalStep::ConfigureProvider => configure_provider(ctx, name, block)?,
                    _ => {}
                }
            }
            Ok(())
        }
        GraphNode::Output { name } => {
            if steps.contains(&EvalStep::EvaluateOutput)
                && let Some(output) = ctx.config.outputs.iter().find(|o| &o.name == name)
            {
                let value = interpolate_value(&output.value, &ctx.scope(None))?;
                log::debug!("output {name} = {value}");
                ctx.set_output(name, value);
            }
            Ok(())
        }
        GraphNode::Resource {
            address,
            provider,
            declared,
        } => {
            let block = if *declared {
                ctx.config.find_resource(address)
            } else {
                None
            };
            let mut eval = NodeEval::new(address, provider, block);
            log::debug!("{address}: {steps:?}");
            for step in steps {
                run_step(ctx, step, &mut eval, plan)?;
            }
            ctx.complete(address, eval.outcome);
            Ok(())
        }
    }
}

/// Run a single step of a resource node
pub fn run_step(
    ctx: &EvalContext<'_>,
    step: EvalStep,
    eval: &mut NodeEval<'_>,
    plan: Option<&Plan>,
) -> Result<(), EvalError> {
    match step {
        EvalStep::ReadState => read_state(ctx, eval),
        EvalStep::Refresh => refresh(ctx, eval)?,
        EvalStep::Interpolate => interpolate(ctx, eval)?,
        EvalStep::ValidateResource => validate_resource(ctx, eval)?,
        EvalStep::Diff => diff(ctx, eval)?,
        EvalStep::DiffDestroy => {
            eval.diff = if eval.prior.is_some() {
                InstanceDiff::destroy()
            } else {
                InstanceDiff::default()
            };
        }
        EvalStep::CheckPreventDestroy => check_prevent_destroy(eval)?,
        EvalStep::ComparePlan => compare_plan(eval, plan)?,
        EvalStep::RecordDiff => {
            if !eval.diff.is_empty() {
                ctx.record_diff(eval.address, eval.diff.clone());
            }
        }
        EvalStep::Apply => apply(ctx, eval)?,
        EvalStep::WriteState => {
            if let Some(applied) = eval.applied.take() {
                let resource = applied.map(|primary| eval.resource_state(primary));
                ctx.write_state(eval.address, resource)?;
            }
        }
        EvalStep::ValidateProvider | EvalStep::ConfigureProvider | EvalStep::EvaluateOutput => {}
    }
    Ok(())
}

fn provider_config(
    ctx: &EvalContext<'_>,
    block: Option<&ProviderBlock>,
) -> Result<ResourceConfig, EvalError> {
    let mut raw = BTreeMap::new();
    if let Some(block) = block {
        let scope = ctx.scope(None);
        for (key, value) in &block.config {
            raw.insert(key.clone(), interpolate_value(value, &scope)?);
        }
    }
    Ok(ResourceConfig::new(raw))
}

fn check_diagnostics(subject: &str, diagnostics: Diagnostics) -> Result<(), EvalError> {
    for warning in &diagnostics.warnings {
        log::warn!("{subject}: {warning}");
    }
    if diagnostics.errors.is_empty() {
        Ok(())
    } else {
        Err(EvalError::Validation {
            errors: diagnostics.errors,
        })
    }
}

fn validate_provider(
    ctx: &EvalContext<'_>,
    name: &str,
    block: Option<&ProviderBlock>,
) -> Result<(), EvalError> {
    let config = provider_config(ctx, block)?;
    let provider = ctx
        .provider(name)
        .ok_or_else(|| EvalError::ProviderNotConfigured(name.to_string()))?;
    check_diagnostics(&format!("provider.{name}"), provider.validate(&config))
}

fn configure_provider(
    ctx: &EvalContext<'_>,
    name: &str,
    block: Option<&ProviderBlock>,
) -> Result<(), EvalError> {
    let config = provider_config(ctx, block)?;
    let provider = ctx
        .provider(name)
        .ok_or_else(|| EvalError::ProviderNotConfigured(name.to_string()))?;
    log::debug!("configuring provider {name}");
    let configured = provider
        .configure(&config)
        .map_err(|e| ProviderError::new(ProviderOperation::Configure, e))?;
    ctx.set_configured(name, configured);
    Ok(())
}

fn read_state(ctx: &EvalContext<'_>, eval: &mut NodeEval<'_>) {
    let existing = ctx.resource_state(eval.address);
    eval.prior = existing
        .as_ref()
        .map(|r| r.primary.clone())
        .filter(InstanceState::exists);
    eval.dependencies = match eval.block {
        Some(block) => dependencies_of(block, ctx.config)
            .map(|deps| deps.into_iter().collect())
            .unwrap_or_default(),
        None => existing.map(|r| r.dependencies).unwrap_or_default(),
    };
}

fn refresh(ctx: &EvalContext<'_>, eval: &mut NodeEval<'_>) -> Result<(), EvalError> {
    let Some(prior) = eval.prior.take() else {
        return Ok(());
    };
    if ctx.operation == Operation::Refresh {
        ctx.start(eval.address, Action::Refresh);
    }
    let provider = ctx.configured(eval.provider)?;
    let refreshed = provider
        .refresh(eval.address, &prior)
        .map_err(|e| ProviderError::new(ProviderOperation::Refresh, e))?;

    match refreshed.filter(InstanceState::exists) {
        Some(mut current) => {
            current.tainted = prior.tainted;
            ctx.write_state(eval.address, Some(eval.resource_state(current.clone())))?;
            eval.prior = Some(current);
        }
        None => {
            log::info!("{} no longer exists", eval.address);
            ctx.write_state(eval.address, None)?;
        }
    }
    if ctx.operation == Operation::Refresh {
        eval.outcome = ResourceOutcome::Succeeded {
            action: Action::Refresh,
        };
    }
    Ok(())
}

fn interpolate(ctx: &EvalContext<'_>, eval: &mut NodeEval<'_>) -> Result<(), EvalError> {
    let Some(block) = eval.block else {
        return Ok(());
    };
    let scope = ctx.scope(Some(eval.address));
    let mut raw = BTreeMap::new();
    for (key, value) in &block.config {
        raw.insert(key.clone(), interpolate_value(value, &scope)?);
    }
    eval.config = Some(ResourceConfig::new(raw));
    Ok(())
}

fn validate_resource(ctx: &EvalContext<'_>, eval: &NodeEval<'_>) -> Result<(), EvalError> {
    let provider = ctx
        .provider(eval.provider)
        .ok_or_else(|| EvalError::ProviderNotConfigured(eval.provider.to_string()))?;
    let config = eval.config.clone().unwrap_or_default();
    let diagnostics = provider.validate_resource(&eval.address.resource_type, &config);
    check_diagnostics(&eval.address.to_string(), diagnostics)
}

fn diff(ctx: &EvalContext<'_>, eval: &mut NodeEval<'_>) -> Result<(), EvalError> {
    let schema = ctx
        .schema(eval.provider, &eval.address.resource_type)
        .ok_or_else(|| {
            schema::Error::Custom(format!("unsupported resource type {}", eval.address.resource_type))
        })?;
    let provider = ctx.configured(eval.provider)?;
    let config = eval.config.clone().unwrap_or_default();
    eval.diff = provider.diff(&schema, eval.prior.as_ref(), &config)?;
    log::debug!("{}: diff is {}", eval.address, eval.diff.change_type());
    Ok(())
}

fn check_prevent_destroy(eval: &NodeEval<'_>) -> Result<(), EvalError> {
    let change = eval.diff.change_type();
    let protected = eval.block.is_some_and(|b| b.prevent_destroy);
    if protected && matches!(change, ChangeType::Destroy | ChangeType::DestroyCreate) {
        return Err(EvalError::PreventDestroy { change });
    }
    Ok(())
}

fn compare_plan(eval: &NodeEval<'_>, plan: Option<&Plan>) -> Result<(), EvalError> {
    let Some(plan) = plan else {
        return Ok(());
    };
    let planned = plan
        .changes
        .get(eval.address)
        .map_or(ChangeType::None, |c| c.change);
    let actual = eval.diff.change_type();
    if planned != actual {
        return Err(EvalError::StalePlan { planned, actual });
    }
    Ok(())
}

fn apply(ctx: &EvalContext<'_>, eval: &mut NodeEval<'_>) -> Result<(), EvalError> {
    let change = eval.diff.change_type();
    let Some(action) = Action::from_change(change) else {
        return Ok(());
    };
    let provider = ctx.configured(eval.provider)?;
    ctx.start(eval.address, action);
    log::info!("{}: {change}", eval.address);

    match provider.apply(eval.address, eval.prior.as_ref(), &eval.diff) {
        Ok(new) => {
            eval.applied = Some(new.filter(InstanceState::exists));
            eval.outcome = ResourceOutcome::Succeeded { action };
            Ok(())
        }
        Err(err) => {
            match err.partial {
                Some(mut partial) if partial.exists() => {
                    // Whatever was created half-way is replaced on the next apply.
                    partial.tainted = matches!(action, Action::Create | Action::Replace);
                    log::warn!("{}: recording partial state after failed apply", eval.address);
                    ctx.write_state(eval.address, Some(eval.resource_state(partial)))?;
                }
                Some(_) => {
                    log::warn!("{}: instance is gone after failed apply", eval.address);
                    ctx.write_state(eval.address, None)?;
                }
                None => {}
            }
            Err(ProviderError::new(ProviderOperation::Apply, err.source).into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use EvalStep::*;

    fn resource(declared: bool) -> GraphNode {
        GraphNode::Resource {
            address: ResourceAddress::new("test_server", "a"),
            provider: "test".into(),
            declared,
        }
    }

    #[test]
    fn test_plan_sequence() {
        let steps = eval_sequence(
            &resource(true),
            Operation::Plan,
            SequenceOptions {
                refresh: true,
                planned: false,
            },
        );
        assert_eq!(
            steps,
            vec![ReadState, Refresh, Interpolate, Diff, CheckPreventDestroy, RecordDiff]
        );
    }

    #[test]
    fn test_apply_sequence_with_saved_plan_skips_refresh() {
        let steps = eval_sequence(
            &resource(true),
            Operation::Apply,
            SequenceOptions {
                refresh: true,
                planned: true,
            },
        );
        assert_eq!(
            steps,
            vec![ReadState, Interpolate, Diff, CheckPreventDestroy, ComparePlan, Apply, WriteState]
        );
    }

    #[test]
    fn test_orphan_sequences() {
        let options = SequenceOptions::default();
        assert_eq!(
            eval_sequence(&resource(false), Operation::Apply, options),
            vec![ReadState, DiffDestroy, Apply, WriteState]
        );
        assert_eq!(
            eval_sequence(&resource(false), Operation::Destroy, options),
            vec![ReadState, DiffDestroy, Apply, WriteState]
        );
        assert_eq!(
            eval_sequence(&resource(true), Operation::Destroy, options),
            vec![ReadState, DiffDestroy, CheckPreventDestroy, Apply, WriteState]
        );
    }

    #[test]
    fn test_provider_and_output_sequences() {
        let provider = GraphNode::Provider { name: "test".into() };
        let output = GraphNode::Output { name: "ip".into() };
        let options = SequenceOptions::default();

        assert_eq!(eval_sequence(&provider, Operation::Validate, options), vec![ValidateProvider]);
        assert_eq!(eval_sequence(&provider, Operation::Refresh, options), vec![ConfigureProvider]);
        assert_eq!(eval_sequence(&output, Operation::Apply, options), vec![EvaluateOutput]);
        assert!(eval_sequence(&output, Operation::Destroy, options).is_empty());
    }

    #[test]
    fn test_prevent_destroy_blocks_replacement() {
        let address = ResourceAddress::new("test_server", "a");
        let block = ResourceBlock::new(address.clone()).prevent_destroy();
        let mut eval = NodeEval::new(&address, "test", Some(&block));

        eval.diff = InstanceDiff::destroy();
        assert!(matches!(
            check_prevent_destroy(&eval),
            Err(EvalError::PreventDestroy { change: ChangeType::Destroy })
        ));

        eval.diff = InstanceDiff::default();
        assert!(check_prevent_destroy(&eval).is_ok());
    }
}
