//! Concurrent, dependency-ordered graph walker

use crate::cancel::CancelToken;
use crate::error::{GraphError, Result};
use crate::graph::{Graph, NodeId};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc;
use std::time::Instant;

/// Lifecycle of one node during a walk.
///
/// `Done`, `Failed`, `Panicked`, `DependencyFailed` and `Canceled` are
/// terminal; every node ends a walk in exactly one of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeStatus<E> {
    /// Some dependency has not finished yet
    Waiting,
    /// All dependencies finished, queued for a worker
    Ready,
    /// The visit function is executing
    Running,
    /// Visited successfully
    Done,
    /// The visit function returned an error
    Failed(E),
    /// The visit function panicked
    Panicked { message: String },
    /// Not visited because a node it (transitively) depends on failed
    DependencyFailed { dependency: NodeId },
    /// Not visited because the walk was canceled first
    Canceled,
}

impl<E> NodeStatus<E> {
    /// Whether this status ends the node's lifecycle
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Waiting | Self::Ready | Self::Running)
    }

    /// Whether the node failed on its own, as opposed to being skipped
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::Panicked { .. })
    }
}

/// What the walker observed for a single node
#[derive(Debug, Clone)]
pub struct NodeRecord<E> {
    pub status: NodeStatus<E>,
    /// When the visit function was entered
    pub started: Option<Instant>,
    /// When the visit function returned
    pub finished: Option<Instant>,
}

impl<E> NodeRecord<E> {
    fn waiting() -> Self {
        Self {
            status: NodeStatus::Waiting,
            started: None,
            finished: None,
        }
    }
}

/// Outcome of a full walk
#[derive(Debug, Clone)]
pub struct WalkReport<E> {
    records: Vec<NodeRecord<E>>,
    canceled: bool,
}

impl<E> WalkReport<E> {
    /// Record for a node
    pub fn record(&self, id: NodeId) -> Option<&NodeRecord<E>> {
        self.records.get(id.index())
    }

    /// Terminal status of a node
    pub fn status(&self, id: NodeId) -> Option<&NodeStatus<E>> {
        self.record(id).map(|r| &r.status)
    }

    /// All records, indexed like the graph's nodes
    pub fn records(&self) -> impl Iterator<Item = (NodeId, &NodeRecord<E>)> {
        self.records
            .iter()
            .enumerate()
            .map(|(i, r)| (NodeId::from_index(i), r))
    }

    /// Whether cancellation was observed during the walk
    pub fn canceled(&self) -> bool {
        self.canceled
    }

    /// True when every node is `Done` and the walk was not canceled
    pub fn is_success(&self) -> bool {
        !self.canceled
            && self
                .records
                .iter()
                .all(|r| matches!(r.status, NodeStatus::Done))
    }

    /// Convert into an aggregated error, if anything went wrong
    pub fn into_result(self) -> std::result::Result<(), WalkError<E>> {
        let mut error = WalkError {
            failed: Vec::new(),
            panicked: Vec::new(),
            skipped: Vec::new(),
            canceled: self.canceled,
        };

        for (i, record) in self.records.into_iter().enumerate() {
            let id = NodeId::from_index(i);
            match record.status {
                NodeStatus::Failed(e) => error.failed.push((id, e)),
                NodeStatus::Panicked { message } => error.panicked.push((id, message)),
                NodeStatus::DependencyFailed { dependency } => {
                    error.skipped.push((id, dependency));
                }
                _ => {}
            }
        }

        if error.is_empty() { Ok(()) } else { Err(error) }
    }
}

/// Aggregated failures of a walk.
///
/// Nodes that failed themselves are kept apart from nodes skipped because
/// of a failed dependency, so the root cause is distinguishable from fan-out.
#[derive(Debug, Clone)]
pub struct WalkError<E> {
    /// Nodes whose visit returned an error
    pub failed: Vec<(NodeId, E)>,
    /// Nodes whose visit panicked
    pub panicked: Vec<(NodeId, String)>,
    /// Nodes skipped, with the failed node that caused the skip
    pub skipped: Vec<(NodeId, NodeId)>,
    /// Whether the walk was canceled
    pub canceled: bool,
}

impl<E> WalkError<E> {
    fn is_empty(&self) -> bool {
        self.failed.is_empty()
            && self.panicked.is_empty()
            && self.skipped.is_empty()
            && !self.canceled
    }
}

impl<E: fmt::Display> fmt::Display for WalkError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.canceled {
            parts.push("walk canceled".to_string());
        }
        for (id, err) in &self.failed {
            parts.push(format!("{id}: {err}"));
        }
        for (id, message) in &self.panicked {
            parts.push(format!("{id}: panicked: {message}"));
        }
        if !self.skipped.is_empty() {
            parts.push(format!(
                "{} node(s) skipped due to failed dependencies",
                self.skipped.len()
            ));
        }
        write!(f, "{}", parts.join("; "))
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for WalkError<E> {}

/// Completion message sent from a worker back to the scheduler.
struct Completion<E> {
    id: NodeId,
    started: Instant,
    finished: Instant,
    outcome: Outcome<E>,
}

enum Outcome<E> {
    Ok,
    Err(E),
    Panic(String),
}

/// Executes a graph's nodes in parallel, respecting dependency edges.
///
/// For every edge `a -> b`, `b`'s visit has returned before `a`'s visit
/// begins. Nothing is promised about the relative order of independent nodes.
#[derive(Debug, Clone, Default)]
pub struct Walker {
    jobs: usize,
    cancel: CancelToken,
}

impl Walker {
    /// Walker using as many workers as the machine has cores
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit the number of concurrently running visits (0 = one per core)
    pub fn jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }

    /// Observe this token for cancellation
    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Walk the graph, calling `visit` once per node.
    ///
    /// The graph is validated first; a cycle is returned as an error and no
    /// node is visited. Node failures never abort the walk: they are recorded
    /// in the returned [`WalkReport`].
    pub fn walk<N, E, F>(&self, graph: &Graph<N>, visit: F) -> Result<WalkReport<E>>
    where
        N: Sync,
        E: Send,
        F: Fn(NodeId, &N) -> std::result::Result<(), E> + Sync,
    {
        graph.validate()?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.jobs)
            .thread_name(|i| format!("dag-walk-{i}"))
            .build()
            .map_err(|e| GraphError::Pool(e.to_string()))?;

        let mut records: Vec<NodeRecord<E>> = graph.ids().map(|_| NodeRecord::waiting()).collect();
        let mut pending: Vec<usize> = graph.ids().map(|id| graph.dependencies(id).count()).collect();
        let mut ready: BinaryHeap<Reverse<NodeId>> = graph
            .ids()
            .filter(|id| pending[id.index()] == 0)
            .map(Reverse)
            .collect();
        for Reverse(id) in &ready {
            records[id.index()].status = NodeStatus::Ready;
        }

        log::debug!(
            "walking {} nodes ({} edges), {} initially ready",
            graph.len(),
            graph.edge_count(),
            ready.len()
        );

        let (tx, rx) = mpsc::channel::<Completion<E>>();
        let mut canceled = false;
        let visit = &visit;

        pool.in_place_scope(|scope| {
            let mut running = 0usize;

            loop {
                if !canceled && self.cancel.is_canceled() {
                    log::warn!("walk canceled; {running} running node(s) will finish");
                    canceled = true;
                }

                if !canceled {
                    while let Some(Reverse(id)) = ready.pop() {
                        let Some(node) = graph.node(id) else {
                            continue;
                        };
                        records[id.index()].status = NodeStatus::Running;
                        running += 1;

                        let tx = tx.clone();
                        scope.spawn(move |_| {
                            let started = Instant::now();
                            let outcome = match catch_unwind(AssertUnwindSafe(|| visit(id, node))) {
                                Ok(Ok(())) => Outcome::Ok,
                                Ok(Err(e)) => Outcome::Err(e),
                                Err(payload) => Outcome::Panic(panic_message(payload.as_ref())),
                            };
                            // The receiver outlives every spawned visit.
                            let _ = tx.send(Completion {
                                id,
                                started,
                                finished: Instant::now(),
                                outcome,
                            });
                        });
                    }
                }

                if running == 0 {
                    break;
                }

                let Ok(done) = rx.recv() else {
                    break;
                };
                running -= 1;

                let record = &mut records[done.id.index()];
                record.started = Some(done.started);
                record.finished = Some(done.finished);

                match done.outcome {
                    Outcome::Ok => {
                        record.status = NodeStatus::Done;
                        for dependent in graph.dependents(done.id) {
                            let count = &mut pending[dependent.index()];
                            *count -= 1;
                            if *count == 0
                                && matches!(records[dependent.index()].status, NodeStatus::Waiting)
                            {
                                records[dependent.index()].status = NodeStatus::Ready;
                                ready.push(Reverse(dependent));
                            }
                        }
                    }
                    Outcome::Err(e) => {
                        log::debug!("node {} failed", done.id);
                        record.status = NodeStatus::Failed(e);
                        skip_descendants(graph, &mut records, done.id);
                    }
                    Outcome::Panic(message) => {
                        log::error!("node {} panicked: {message}", done.id);
                        record.status = NodeStatus::Panicked { message };
                        skip_descendants(graph, &mut records, done.id);
                    }
                }
            }
        });

        if canceled {
            for record in &mut records {
                if !record.status.is_terminal() {
                    record.status = NodeStatus::Canceled;
                }
            }
        }

        log::debug!("walk finished (canceled: {canceled})");
        Ok(WalkReport { records, canceled })
    }
}

/// Mark every not-yet-started node downstream of `failed` as skipped.
fn skip_descendants<N, E>(graph: &Graph<N>, records: &mut [NodeRecord<E>], failed: NodeId) {
    for id in graph.descendants(failed) {
        let status = &mut records[id.index()].status;
        if matches!(status, NodeStatus::Waiting | NodeStatus::Ready) {
            *status = NodeStatus::DependencyFailed { dependency: failed };
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
