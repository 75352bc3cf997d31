//! Graph builder - turns configuration and state into a graph of work
//!
//! Edges point from a node to what it depends on. Edges come from provider
//! usage, `depends_on`, and the references found in `${...}` expressions.
//! For destroy walks the resource edges are reversed so dependents go first.

use crate::config::{Configuration, ResourceBlock};
use crate::error::BuildError;
use crate::provider::ResourceProvider;
use crate::state::State;
use crate::types::{Operation, ResourceAddress};
use dag::{Graph, NodeId};
use interpolate::{Cause, InterpolationError, Reference, value_references};
use schema::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// One unit of work in an operation's graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphNode {
    /// Configure a provider before any of its resources run
    Provider { name: String },
    /// A resource; `declared` is false for orphans only found in state
    Resource {
        address: ResourceAddress,
        provider: String,
        declared: bool,
    },
    /// Evaluate an output once what it references is done
    Output { name: String },
}

impl GraphNode {
    pub fn address(&self) -> Option<&ResourceAddress> {
        match self {
            Self::Resource { address, .. } => Some(address),
            _ => None,
        }
    }
}

impl fmt::Display for GraphNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Provider { name } => write!(f, "provider.{name}"),
            Self::Resource {
                address,
                declared: true,
                ..
            } => write!(f, "{address}"),
            Self::Resource { address, .. } => write!(f, "{address} (orphan)"),
            Self::Output { name } => write!(f, "output.{name}"),
        }
    }
}

/// The graph of an operation plus an index of its resource nodes
#[derive(Debug)]
pub struct ExecutionGraph {
    pub graph: Graph<GraphNode>,
    pub resources: BTreeMap<ResourceAddress, NodeId>,
}

impl ExecutionGraph {
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }
}

/// Resources a declared resource depends on, from `depends_on` and references
pub fn dependencies_of(
    block: &ResourceBlock,
    config: &Configuration,
) -> Result<BTreeSet<ResourceAddress>, BuildError> {
    let mut deps = BTreeSet::new();
    for dependency in &block.depends_on {
        if config.find_resource(dependency).is_none() {
            return Err(BuildError::UndefinedDependency {
                resource: block.address.to_string(),
                dependency: dependency.to_string(),
            });
        }
        deps.insert(dependency.clone());
    }
    let owner = block.address.to_string();
    deps.extend(referenced_resources(
        &owner,
        Some(&block.address),
        block.config.values(),
        config,
    )?);
    Ok(deps)
}

/// Resolve the references in `values` against the declared configuration
fn referenced_resources<'v>(
    owner: &str,
    current: Option<&ResourceAddress>,
    values: impl Iterator<Item = &'v Value>,
    config: &Configuration,
) -> Result<BTreeSet<ResourceAddress>, BuildError> {
    let fail = |expression: String, cause: Cause| BuildError::Interpolation {
        resource: owner.to_string(),
        source: InterpolationError::new(expression, cause),
    };

    let mut found = BTreeSet::new();
    for value in values {
        let references = value_references(value).map_err(|source| BuildError::Interpolation {
            resource: owner.to_string(),
            source,
        })?;
        for reference in references {
            match &reference {
                Reference::Variable { name } => {
                    if !config.variables.contains_key(name) {
                        return Err(fail(
                            reference.to_string(),
                            Cause::UndefinedVariable(name.clone()),
                        ));
                    }
                }
                Reference::Resource {
                    resource_type,
                    name,
                    ..
                } => {
                    let address = ResourceAddress::new(resource_type.as_str(), name.as_str());
                    if current == Some(&address) {
                        return Err(fail(
                            reference.to_string(),
                            Cause::SelfReference(address.to_string()),
                        ));
                    }
                    if config.find_resource(&address).is_none() {
                        return Err(fail(
                            reference.to_string(),
                            Cause::UndefinedResource(address.to_string()),
                        ));
                    }
                    found.insert(address);
                }
            }
        }
    }
    Ok(found)
}

/// Builds the [`ExecutionGraph`] for one operation
pub struct GraphBuilder<'a> {
    operation: Operation,
    config: &'a Configuration,
    state: &'a State,
    providers: &'a BTreeMap<String, Arc<dyn ResourceProvider>>,
    targets: &'a [ResourceAddress],
}

impl<'a> GraphBuilder<'a> {
    pub fn new(
        operation: Operation,
        config: &'a Configuration,
        state: &'a State,
        providers: &'a BTreeMap<String, Arc<dyn ResourceProvider>>,
    ) -> Self {
        Self {
            operation,
            config,
            state,
            providers,
            targets: &[],
        }
    }

    /// Restrict the graph to these resources and what they need
    pub fn targets(mut self, targets: &'a [ResourceAddress]) -> Self {
        self.targets = targets;
        self
    }

    pub fn build(self) -> Result<ExecutionGraph, BuildError> {
        self.config.check_unique()?;

        let resources = self.resource_nodes();
        let mut graph = Graph::new();

        let mut provider_names: BTreeSet<&str> = resources
            .iter()
            .filter_map(|node| match node {
                GraphNode::Resource { provider, .. } => Some(provider.as_str()),
                _ => None,
            })
            .collect();
        if matches!(self.operation, Operation::Validate | Operation::Plan | Operation::Apply) {
            provider_names.extend(self.config.providers.iter().map(|p| p.name.as_str()));
        }

        let mut providers = BTreeMap::new();
        for name in provider_names {
            if !self.providers.contains_key(name) {
                let resource = resources
                    .iter()
                    .find(|node| matches!(node, GraphNode::Resource { provider, .. } if provider == name))
                    .map_or_else(|| format!("provider.{name}"), ToString::to_string);
                return Err(BuildError::UnknownProvider {
                    resource,
                    provider: name.to_string(),
                });
            }
            let id = graph.add_node(GraphNode::Provider {
                name: name.to_string(),
            });
            providers.insert(name.to_string(), id);
        }

        let mut index = BTreeMap::new();
        for node in resources {
            if let GraphNode::Resource {
                address, provider, ..
            } = &node
            {
                self.check_type(address, provider)?;
                let address = address.clone();
                let provider_id = providers[provider.as_str()];
                let id = graph.add_node(node);
                graph.connect(id, provider_id)?;
                index.insert(address, id);
            }
        }

        match self.operation {
            Operation::Destroy => self.connect_destroy(&mut graph, &index)?,
            Operation::Refresh => {}
            _ => self.connect_references(&mut graph, &index, &providers)?,
        }

        let mut execution = ExecutionGraph {
            graph,
            resources: index,
        };
        if !self.targets.is_empty() {
            execution = self.retain_targets(execution)?;
        }
        if matches!(self.operation, Operation::Validate | Operation::Plan | Operation::Apply) {
            self.check_references(&execution)?;
        }
        execution.graph.validate()?;

        log::debug!(
            "built {} graph: {} nodes, {} edges",
            self.operation,
            execution.graph.len(),
            execution.graph.edge_count()
        );
        Ok(execution)
    }

    /// Resource nodes in a stable order: declared first, then state-only
    fn resource_nodes(&self) -> Vec<GraphNode> {
        let declared = |address: &ResourceAddress| self.config.find_resource(address).is_some();
        let mut nodes = Vec::new();

        match self.operation {
            Operation::Validate | Operation::Plan | Operation::Apply => {
                for block in &self.config.resources {
                    nodes.push(GraphNode::Resource {
                        address: block.address.clone(),
                        provider: block.provider_name().to_string(),
                        declared: true,
                    });
                }
                if self.operation != Operation::Validate {
                    for (address, resource) in &self.state.resources {
                        if !declared(address) {
                            nodes.push(GraphNode::Resource {
                                address: address.clone(),
                                provider: resource.provider.clone(),
                                declared: false,
                            });
                        }
                    }
                }
            }
            Operation::Refresh | Operation::Destroy => {
                for (address, resource) in &self.state.resources {
                    nodes.push(GraphNode::Resource {
                        address: address.clone(),
                        provider: resource.provider.clone(),
                        declared: declared(address),
                    });
                }
            }
        }
        nodes
    }

    fn check_type(&self, address: &ResourceAddress, provider: &str) -> Result<(), BuildError> {
        let known = self
            .providers
            .get(provider)
            .is_some_and(|p| p.registry().contains(&address.resource_type));
        if known {
            Ok(())
        } else {
            Err(BuildError::UnknownResourceType {
                resource: address.to_string(),
                provider: provider.to_string(),
                resource_type: address.resource_type.clone(),
            })
        }
    }

    /// Edges for plan, apply and validate walks
    fn connect_references(
        &self,
        graph: &mut Graph<GraphNode>,
        index: &BTreeMap<ResourceAddress, NodeId>,
        providers: &BTreeMap<String, NodeId>,
    ) -> Result<(), BuildError> {
        for block in &self.config.providers {
            let owner = format!("provider.{}", block.name);
            let deps = referenced_resources(&owner, None, block.config.values(), self.config)?;
            if let Some(&from) = providers.get(&block.name) {
                for dep in deps {
                    if let Some(&to) = index.get(&dep) {
                        graph.connect(from, to)?;
                    }
                }
            }
        }

        for block in &self.config.resources {
            let deps = dependencies_of(block, self.config)?;
            let Some(&from) = index.get(&block.address) else {
                continue;
            };
            for dep in deps {
                if let Some(&to) = index.get(&dep) {
                    graph.connect(from, to)?;
                }
            }
        }

        // Orphans are destroyed before the orphans they depended on.
        for (address, &id) in index {
            if self.config.find_resource(address).is_some() {
                continue;
            }
            let Some(resource) = self.state.get(address) else {
                continue;
            };
            for dep in &resource.dependencies {
                if self.config.find_resource(dep).is_none()
                    && let Some(&dep_id) = index.get(dep)
                {
                    graph.connect(dep_id, id)?;
                }
            }
        }

        if self.operation != Operation::Validate {
            for output in &self.config.outputs {
                let owner = format!("output.{}", output.name);
                let deps =
                    referenced_resources(&owner, None, std::iter::once(&output.value), self.config)?;
                let id = graph.add_node(GraphNode::Output {
                    name: output.name.clone(),
                });
                for dep in deps {
                    if let Some(&to) = index.get(&dep) {
                        graph.connect(id, to)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Every resource left in the graph must have a direct edge to each
    /// resource its configuration reads from
    fn check_references(&self, execution: &ExecutionGraph) -> Result<(), BuildError> {
        for (address, &from) in &execution.resources {
            let Some(block) = self.config.find_resource(address) else {
                continue;
            };
            for dep in dependencies_of(block, self.config)? {
                let connected = execution
                    .resources
                    .get(&dep)
                    .is_some_and(|&to| execution.graph.has_edge(from, to));
                if !connected {
                    return Err(BuildError::MissingEdge {
                        resource: address.to_string(),
                        reference: dep.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Reversed edges: a resource is destroyed after everything depending on it
    fn connect_destroy(
        &self,
        graph: &mut Graph<GraphNode>,
        index: &BTreeMap<ResourceAddress, NodeId>,
    ) -> Result<(), BuildError> {
        for (address, &id) in index {
            let mut deps: BTreeSet<ResourceAddress> = self
                .state
                .get(address)
                .map(|r| r.dependencies.iter().cloned().collect())
                .unwrap_or_default();
            if let Some(block) = self.config.find_resource(address) {
                deps.extend(dependencies_of(block, self.config)?);
            }
            for dep in deps {
                if let Some(&dep_id) = index.get(&dep) {
                    graph.connect(dep_id, id)?;
                }
            }
        }
        Ok(())
    }

    /// Keep targeted resources and everything they transitively depend on
    fn retain_targets(&self, execution: ExecutionGraph) -> Result<ExecutionGraph, BuildError> {
        let ExecutionGraph { graph, resources } = execution;

        let mut keep = BTreeSet::new();
        for target in self.targets {
            let id = resources
                .get(target)
                .copied()
                .ok_or_else(|| BuildError::UnknownTarget(target.to_string()))?;
            keep.insert(id);
            keep.extend(graph.ancestors(id));
        }

        let mut filtered = Graph::new();
        let mut remap = BTreeMap::new();
        for (id, node) in graph.nodes() {
            if keep.contains(&id) {
                remap.insert(id, filtered.add_node(node.clone()));
            }
        }
        for (&old, &new) in &remap {
            for dep in graph.dependencies(old) {
                if let Some(&to) = remap.get(&dep) {
                    filtered.connect(new, to)?;
                }
            }
        }
        let resources = resources
            .into_iter()
            .filter_map(|(address, id)| remap.get(&id).map(|&new| (address, new)))
            .collect();

        Ok(ExecutionGraph {
            graph: filtered,
            resources,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OutputBlock, ProviderBlock};
    use crate::state::ResourceState;
    use crate::testing::MockProvider;
    use dag::GraphError;
    use schema::InstanceState;

    fn address(s: &str) -> ResourceAddress {
        s.parse().unwrap()
    }

    fn providers() -> BTreeMap<String, Arc<dyn ResourceProvider>> {
        let mut providers: BTreeMap<String, Arc<dyn ResourceProvider>> = BTreeMap::new();
        providers.insert("test".into(), Arc::new(MockProvider::new()));
        providers
    }

    fn server(name: &str) -> ResourceBlock {
        ResourceBlock::new(address(&format!("test_server.{name}"))).attr("name", name)
    }

    fn build(
        operation: Operation,
        config: &Configuration,
        state: &State,
    ) -> Result<ExecutionGraph, BuildError> {
        let providers = providers();
        GraphBuilder::new(operation, config, state, &providers).build()
    }

    fn edge(built: &ExecutionGraph, from: &str, to: &str) -> bool {
        built
            .graph
            .has_edge(built.resources[&address(from)], built.resources[&address(to)])
    }

    fn orphan(id: &str, deps: &[&str]) -> ResourceState {
        ResourceState {
            provider: "test".into(),
            dependencies: deps.iter().map(|d| address(d)).collect(),
            primary: InstanceState::new(id),
        }
    }

    #[test]
    fn test_references_become_edges() {
        let config = Configuration::new()
            .resource(server("a"))
            .resource(server("b").attr("size", "${length(test_server.a.id)}"))
            .resource(server("c").depends_on(address("test_server.b")));
        let built = build(Operation::Plan, &config, &State::default()).unwrap();

        assert_eq!(built.resource_count(), 3);
        assert!(edge(&built, "test_server.b", "test_server.a"));
        assert!(edge(&built, "test_server.c", "test_server.b"));
        assert!(!edge(&built, "test_server.a", "test_server.b"));

        let provider = built
            .graph
            .find(|n| matches!(n, GraphNode::Provider { .. }))
            .unwrap();
        assert!(built.graph.has_edge(built.resources[&address("test_server.a")], provider));
    }

    #[test]
    fn test_reference_cycle_is_a_build_error() {
        let config = Configuration::new()
            .resource(server("a").attr("tags", "${test_server.b.name}"))
            .resource(server("b").attr("tags", "${test_server.a.name}"));
        let err = build(Operation::Plan, &config, &State::default()).unwrap_err();
        assert!(matches!(err, BuildError::Graph(GraphError::Cycle { .. })));
    }

    #[test]
    fn test_undefined_and_self_references() {
        let config = Configuration::new().resource(server("a").attr("size", "${test_server.nope.id}"));
        let err = build(Operation::Plan, &config, &State::default()).unwrap_err();
        assert!(matches!(
            err,
            BuildError::Interpolation { ref source, .. }
                if source.cause == Cause::UndefinedResource("test_server.nope".into())
        ));

        let config = Configuration::new().resource(server("a").attr("size", "${test_server.a.id}"));
        let err = build(Operation::Plan, &config, &State::default()).unwrap_err();
        assert!(matches!(
            err,
            BuildError::Interpolation { ref source, .. }
                if matches!(source.cause, Cause::SelfReference(_))
        ));

        let config = Configuration::new().resource(server("a").attr("name", "${var.region}"));
        let err = build(Operation::Plan, &config, &State::default()).unwrap_err();
        assert!(matches!(err, BuildError::Interpolation { .. }));
    }

    #[test]
    fn test_unknown_provider_and_type() {
        let config = Configuration::new()
            .resource(ResourceBlock::new(address("cloud_vm.a")).attr("name", "a"));
        let err = build(Operation::Plan, &config, &State::default()).unwrap_err();
        assert!(matches!(err, BuildError::UnknownProvider { ref provider, .. } if provider == "cloud"));

        let config = Configuration::new()
            .resource(ResourceBlock::new(address("test_disk.a")).attr("name", "a"));
        let err = build(Operation::Plan, &config, &State::default()).unwrap_err();
        assert!(matches!(err, BuildError::UnknownResourceType { .. }));

        let config = Configuration::new().provider(ProviderBlock::new("aws"));
        let err = build(Operation::Plan, &config, &State::default()).unwrap_err();
        assert!(matches!(err, BuildError::UnknownProvider { ref resource, .. } if resource == "provider.aws"));
    }

    #[test]
    fn test_undeclared_depends_on() {
        let config =
            Configuration::new().resource(server("a").depends_on(address("test_server.ghost")));
        let err = build(Operation::Apply, &config, &State::default()).unwrap_err();
        assert!(matches!(err, BuildError::UndefinedDependency { .. }));
    }

    #[test]
    fn test_orphans_are_destroyed_dependents_first() {
        let mut state = State::default();
        state.put(&address("test_server.old_db"), Some(orphan("db", &[])));
        state.put(&address("test_server.old_app"), Some(orphan("app", &["test_server.old_db"])));
        let config = Configuration::new().resource(server("a"));

        let built = build(Operation::Apply, &config, &state).unwrap();
        let node = built.graph.node(built.resources[&address("test_server.old_db")]).unwrap();
        assert_eq!(node.to_string(), "test_server.old_db (orphan)");
        assert!(edge(&built, "test_server.old_db", "test_server.old_app"));
    }

    #[test]
    fn test_destroy_reverses_edges() {
        let mut state = State::default();
        state.put(&address("test_server.a"), Some(orphan("a", &[])));
        state.put(&address("test_server.b"), Some(orphan("b", &[])));
        let config = Configuration::new()
            .resource(server("a"))
            .resource(server("b").attr("size", "${length(test_server.a.id)}"));

        let built = build(Operation::Destroy, &config, &state).unwrap();
        assert!(edge(&built, "test_server.a", "test_server.b"));
        assert!(!edge(&built, "test_server.b", "test_server.a"));
    }

    #[test]
    fn test_outputs_depend_on_references() {
        let mut config = Configuration::new().resource(server("a"));
        config.outputs.push(OutputBlock {
            name: "id".into(),
            value: Value::string("${test_server.a.id}"),
        });
        let built = build(Operation::Apply, &config, &State::default()).unwrap();
        let output = built
            .graph
            .find(|n| matches!(n, GraphNode::Output { .. }))
            .unwrap();
        assert!(built.graph.has_edge(output, built.resources[&address("test_server.a")]));

        let validate = build(Operation::Validate, &config, &State::default()).unwrap();
        assert!(validate.graph.find(|n| matches!(n, GraphNode::Output { .. })).is_none());
    }

    #[test]
    fn test_targets_keep_dependencies() {
        let config = Configuration::new()
            .resource(server("a"))
            .resource(server("b").depends_on(address("test_server.a")))
            .resource(server("c"));
        let providers = providers();
        let targets = vec![address("test_server.b")];
        let state = State::default();
        let built = GraphBuilder::new(Operation::Plan, &config, &state, &providers)
            .targets(&targets)
            .build()
            .unwrap();

        assert_eq!(built.resource_count(), 2);
        assert!(built.resources.contains_key(&address("test_server.a")));
        assert!(!built.resources.contains_key(&address("test_server.c")));
        assert!(edge(&built, "test_server.b", "test_server.a"));

        let missing = vec![address("test_server.zzz")];
        let err = GraphBuilder::new(Operation::Plan, &config, &state, &providers)
            .targets(&missing)
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::UnknownTarget(_)));
    }

    #[test]
    fn test_reference_without_edge_is_rejected() {
        let config = Configuration::new()
            .resource(server("a"))
            .resource(server("b").attr("size", "${test_server.a.id}"));
        let providers = providers();
        let state = State::default();
        let builder = GraphBuilder::new(Operation::Plan, &config, &state, &providers);
        let built = build(Operation::Plan, &config, &state).unwrap();
        builder.check_references(&built).unwrap();

        // Same nodes, dependency edges dropped
        let mut graph = Graph::new();
        let mut resources = BTreeMap::new();
        for (id, node) in built.graph.nodes() {
            let copy = graph.add_node(node.clone());
            if let Some((address, _)) = built.resources.iter().find(|(_, old)| **old == id) {
                resources.insert(address.clone(), copy);
            }
        }
        let broken = ExecutionGraph { graph, resources };

        let err = builder.check_references(&broken).unwrap_err();
        assert!(matches!(
            err,
            BuildError::MissingEdge { ref resource, ref reference }
                if resource == "test_server.b" && reference == "test_server.a"
        ));

        // A dependency pruned from the graph is just as unreachable
        let mut pruned = build(Operation::Plan, &config, &state).unwrap();
        pruned.resources.remove(&address("test_server.a"));
        assert!(matches!(
            builder.check_references(&pruned),
            Err(BuildError::MissingEdge { .. })
        ));
    }
}
