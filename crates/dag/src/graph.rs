//! Graph model: nodes, dependency edges, cycle detection and ordering

use crate::error::{GraphError, Result};
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, VecDeque};
use std::fmt::{self, Write as _};

/// Stable identifier of a node within one [`Graph`].
///
/// Ids are handed out in insertion order, which is also the tie-break used
/// by [`Graph::topo_order`] and the walker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

impl NodeId {
    /// Position of the node in insertion order
    pub fn index(self) -> usize {
        self.0
    }

    pub(crate) fn from_index(index: usize) -> Self {
        Self(index)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A directed graph whose edges point from a node to the nodes it depends on.
///
/// The graph exclusively owns its node payloads. It may temporarily hold a
/// cycle while being built; [`Graph::validate`] is the gate that turns a
/// cycle into a build-time error.
#[derive(Debug, Clone)]
pub struct Graph<N> {
    nodes: Vec<N>,
    /// node -> nodes it depends on
    dependencies: Vec<BTreeSet<NodeId>>,
    /// node -> nodes that depend on it
    dependents: Vec<BTreeSet<NodeId>>,
    edge_count: usize,
}

impl<N> Default for Graph<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N> Graph<N> {
    /// Create an empty graph
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            dependencies: Vec::new(),
            dependents: Vec::new(),
            edge_count: 0,
        }
    }

    /// Add a node and return its id
    pub fn add_node(&mut self, node: N) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        self.dependencies.push(BTreeSet::new());
        self.dependents.push(BTreeSet::new());
        id
    }

    /// Record that `from` depends on `to`.
    ///
    /// Returns `Ok(true)` when a new edge was added and `Ok(false)` when it
    /// already existed. Self edges and unknown ids are rejected.
    pub fn connect(&mut self, from: NodeId, to: NodeId) -> Result<bool> {
        if from == to {
            return Err(GraphError::InvalidEdge {
                from,
                to,
                reason: "a node cannot depend on itself",
            });
        }
        if !self.contains(from) || !self.contains(to) {
            return Err(GraphError::InvalidEdge {
                from,
                to,
                reason: "unknown node",
            });
        }

        let added = self.dependencies[from.0].insert(to);
        if added {
            self.dependents[to.0].insert(from);
            self.edge_count += 1;
        }
        Ok(added)
    }

    /// Whether `id` belongs to this graph
    pub fn contains(&self, id: NodeId) -> bool {
        id.0 < self.nodes.len()
    }

    /// Payload of a node
    pub fn node(&self, id: NodeId) -> Option<&N> {
        self.nodes.get(id.0)
    }

    /// Mutable payload of a node
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut N> {
        self.nodes.get_mut(id.0)
    }

    /// All nodes in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &N)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    /// All node ids in insertion order
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + use<N> {
        (0..self.nodes.len()).map(NodeId)
    }

    /// First node matching a predicate
    pub fn find<P>(&self, mut predicate: P) -> Option<NodeId>
    where
        P: FnMut(&N) -> bool,
    {
        self.nodes.iter().position(|n| predicate(n)).map(NodeId)
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of distinct edges
    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    /// Whether `from` directly depends on `to`
    pub fn has_edge(&self, from: NodeId, to: NodeId) -> bool {
        self.dependencies
            .get(from.0)
            .is_some_and(|deps| deps.contains(&to))
    }

    /// Nodes that `id` directly depends on
    pub fn dependencies(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.dependencies
            .get(id.0)
            .into_iter()
            .flat_map(|deps| deps.iter().copied())
    }

    /// Nodes that directly depend on `id`
    pub fn dependents(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.dependents
            .get(id.0)
            .into_iter()
            .flat_map(|deps| deps.iter().copied())
    }

    /// Every node `id` transitively depends on
    pub fn ancestors(&self, id: NodeId) -> BTreeSet<NodeId> {
        self.reachable(id, &self.dependencies)
    }

    /// Every node that transitively depends on `id`
    pub fn descendants(&self, id: NodeId) -> BTreeSet<NodeId> {
        self.reachable(id, &self.dependents)
    }

    fn reachable(&self, start: NodeId, adjacency: &[BTreeSet<NodeId>]) -> BTreeSet<NodeId> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<NodeId> = VecDeque::new();
        if let Some(next) = adjacency.get(start.0) {
            queue.extend(next.iter().copied());
        }
        while let Some(id) = queue.pop_front() {
            if seen.insert(id) {
                queue.extend(adjacency[id.0].iter().copied());
            }
        }
        seen
    }

    /// Fail with [`GraphError::Cycle`] if the edges do not form a DAG
    pub fn validate(&self) -> Result<()> {
        match self.find_cycle() {
            Some(path) => Err(GraphError::Cycle { path }),
            None => Ok(()),
        }
    }

    /// Depth-first search over dependency edges, returning the first cycle found.
    fn find_cycle(&self) -> Option<Vec<NodeId>> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Mark {
            Unvisited,
            OnPath,
            Finished,
        }

        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        let mut path: Vec<NodeId> = Vec::new();

        for start in 0..self.nodes.len() {
            if marks[start] != Mark::Unvisited {
                continue;
            }

            let mut frames = vec![(NodeId(start), self.dependencies[start].iter())];
            marks[start] = Mark::OnPath;
            path.push(NodeId(start));

            loop {
                let next = match frames.last_mut() {
                    Some((_, iter)) => iter.next().copied(),
                    None => break,
                };

                match next {
                    Some(dep) => match marks[dep.0] {
                        Mark::Unvisited => {
                            marks[dep.0] = Mark::OnPath;
                            path.push(dep);
                            frames.push((dep, self.dependencies[dep.0].iter()));
                        }
                        Mark::OnPath => {
                            let pos = path.iter().position(|n| *n == dep).unwrap_or(0);
                            let mut cycle = path[pos..].to_vec();
                            cycle.push(dep);
                            return Some(cycle);
                        }
                        Mark::Finished => {}
                    },
                    None => {
                        if let Some((done, _)) = frames.pop() {
                            marks[done.0] = Mark::Finished;
                            path.pop();
                        }
                    }
                }
            }
        }

        None
    }

    /// Lazily yield nodes in a valid execution order, dependencies first.
    ///
    /// Ties are broken by insertion order, so the sequence is deterministic.
    /// On a cyclic graph the nodes on (or behind) a cycle are never yielded;
    /// call [`Graph::validate`] first.
    pub fn topo_order(&self) -> TopoOrder<'_, N> {
        let remaining: Vec<usize> = self.dependencies.iter().map(BTreeSet::len).collect();
        let ready = remaining
            .iter()
            .enumerate()
            .filter(|(_, count)| **count == 0)
            .map(|(i, _)| Reverse(NodeId(i)))
            .collect();

        TopoOrder {
            graph: self,
            remaining,
            ready,
        }
    }
}

impl<N: fmt::Display> Graph<N> {
    /// Render the graph in Graphviz dot format
    pub fn dot(&self) -> String {
        let mut out = String::from("digraph {\n\tcompound = \"true\"\n\tnewrank = \"true\"\n");
        for (id, node) in self.nodes() {
            let _ = writeln!(out, "\t\"{}\" [label = \"{}\"]", id.index(), node);
        }
        for (id, _) in self.nodes() {
            for dep in self.dependencies(id) {
                let _ = writeln!(out, "\t\"{}\" -> \"{}\"", id.index(), dep.index());
            }
        }
        out.push_str("}\n");
        out
    }
}

/// Iterator returned by [`Graph::topo_order`]
pub struct TopoOrder<'g, N> {
    graph: &'g Graph<N>,
    remaining: Vec<usize>,
    ready: BinaryHeap<Reverse<NodeId>>,
}

impl<N> Iterator for TopoOrder<'_, N> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let Reverse(id) = self.ready.pop()?;
        for dependent in self.graph.dependents(id) {
            let count = &mut self.remaining[dependent.0];
            *count -= 1;
            if *count == 0 {
                self.ready.push(Reverse(dependent));
            }
        }
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> (Graph<&'static str>, NodeId, NodeId, NodeId) {
        let mut graph = Graph::new();
        let a = graph.add_node("a");
        let b = graph.add_node("b");
        let c = graph.add_node("c");
        // a -> b -> c
        graph.connect(a, b).unwrap();
        graph.connect(b, c).unwrap();
        (graph, a, b, c)
    }

    #[test]
    fn connect_is_idempotent() {
        let (mut graph, a, b, _) = chain();
        assert_eq!(graph.edge_count(), 2);
        assert!(!graph.connect(a, b).unwrap());
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn self_edge_is_rejected() {
        let mut graph = Graph::new();
        let a = graph.add_node("a");
        let err = graph.connect(a, a).unwrap_err();
        assert!(matches!(err, GraphError::InvalidEdge { .. }));
    }

    #[test]
    fn edge_to_unknown_node_is_rejected() {
        let mut other = Graph::new();
        other.add_node(());
        let foreign = other.add_node(());

        let mut graph = Graph::new();
        let a = graph.add_node(());
        assert!(graph.connect(a, foreign).is_err());
    }

    #[test]
    fn topo_order_puts_dependencies_first() {
        let (graph, a, b, c) = chain();
        let order: Vec<_> = graph.topo_order().collect();
        assert_eq!(order, vec![c, b, a]);
    }

    #[test]
    fn topo_order_breaks_ties_by_insertion() {
        let mut graph = Graph::new();
        let x = graph.add_node("x");
        let y = graph.add_node("y");
        let z = graph.add_node("z");
        graph.connect(x, z).unwrap();

        let order: Vec<_> = graph.topo_order().collect();
        assert_eq!(order, vec![y, z, x]);
    }

    #[test]
    fn validate_reports_cycle_path() {
        let (mut graph, a, _, c) = chain();
        graph.connect(c, a).unwrap();

        match graph.validate() {
            Err(GraphError::Cycle { path }) => {
                assert_eq!(path.first(), path.last());
                assert_eq!(path.len(), 4);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn validate_accepts_diamond() {
        let mut graph = Graph::new();
        let top = graph.add_node(1);
        let left = graph.add_node(2);
        let right = graph.add_node(3);
        let bottom = graph.add_node(4);
        graph.connect(top, left).unwrap();
        graph.connect(top, right).unwrap();
        graph.connect(left, bottom).unwrap();
        graph.connect(right, bottom).unwrap();

        assert!(graph.validate().is_ok());
        assert_eq!(graph.topo_order().count(), 4);
        assert_eq!(graph.ancestors(top).len(), 3);
        assert_eq!(graph.descendants(bottom).len(), 3);
    }

    #[test]
    fn dot_lists_nodes_and_edges() {
        let (graph, _, _, _) = chain();
        let dot = graph.dot();
        assert!(dot.contains("[label = \"a\"]"));
        assert!(dot.contains("\"0\" -> \"1\""));
    }
}
