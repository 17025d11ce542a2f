//! Graph executor: builds, wires and runs a pipeline graph.
//!
//! A `Graph` is assembled from nodes and port-to-port edges, compiled into a
//! `CompiledPlan`, and started. Starting creates one `LinkQueue` per edge (plus
//! the internal queues of composites), attaches compute contexts, and spawns
//! one worker thread per leaf and per split router. `RunningGraph::wait`
//! supervises the workers until every one has returned.
//!
//! A fatal error in any worker aborts every queue, so blocked workers wake up
//! and unwind; the run then ends as `GraphState::Aborted`.

use crate::config::{ContextPolicy, EngineConfig};
use crate::pipeline::buffer::{BufferPool, PoolStats};
use crate::pipeline::compiled_plan::{CompiledPlan, PlanStats};
use crate::pipeline::compiler::GraphCompiler;
use crate::pipeline::compute::{ComputeContext, ComputeStats};
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::events::{EdgeSnapshot, ExecutorEvent, NodeSnapshot, TopologySnapshot};
use crate::pipeline::id::{ContextId, EdgeId, NodeId, PortId};
use crate::pipeline::node::{
    AnyFilter, Attachment, Element, Node, NodeState, NodeStats, Step, Worker,
};
use crate::pipeline::port::PortDescriptor;
use crate::pipeline::properties::Properties;
use crate::pipeline::queue::{LinkError, LinkQueue};
use crate::pipeline::registry::FilterRegistry;
use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How often `wait` checks for finished workers when no event arrives.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A directed connection from an output port to an input port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub id: EdgeId,
    pub from: PortId,
    pub to: PortId,
}

/// A pipeline graph under construction.
pub struct Graph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    registry: FilterRegistry,
    config: EngineConfig,
    observers: Vec<Sender<ExecutorEvent>>,
}

impl Graph {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_registry(config, FilterRegistry::with_builtins())
    }

    pub fn with_registry(config: EngineConfig, registry: FilterRegistry) -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            registry,
            config,
            observers: Vec::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &FilterRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut FilterRegistry {
        &mut self.registry
    }

    // ── Graph building ──

    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        tracing::debug!("Added node {} '{}'", id, node.name());
        self.nodes.push(node);
        id
    }

    /// Add a leaf wrapping `filter`.
    pub fn add_leaf(&mut self, filter: impl Into<AnyFilter>) -> NodeId {
        self.add_node(Node::leaf(filter))
    }

    /// Add a leaf built by the registry from a type name and parameters.
    pub fn add_filter(&mut self, type_name: &str, props: &Properties) -> PipelineResult<NodeId> {
        let filter = self.registry.create(type_name, props)?;
        Ok(self.add_leaf(filter))
    }

    /// Connect output `from_port` of `from` to input `to_port` of `to`.
    ///
    /// Port existence and binding rules are checked when the graph compiles.
    pub fn connect(
        &mut self,
        from: NodeId,
        from_port: usize,
        to: NodeId,
        to_port: usize,
    ) -> PipelineResult<EdgeId> {
        for id in [from, to] {
            if id.index() >= self.nodes.len() {
                return Err(PipelineError::InvalidEdge(format!("node {} does not exist", id)));
            }
        }
        let id = EdgeId(self.edges.len() as u32);
        self.edges.push(Edge {
            id,
            from: PortId::new(from, from_port),
            to: PortId::new(to, to_port),
        });
        Ok(id)
    }

    /// Connect the first output of `from` to the first input of `to`.
    pub fn link(&mut self, from: NodeId, to: NodeId) -> PipelineResult<EdgeId> {
        self.connect(from, 0, to, 0)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Validate the graph without starting it.
    pub fn compile(&self) -> PipelineResult<CompiledPlan> {
        GraphCompiler::compile(&self.nodes, &self.edges)
    }

    pub fn topology(&self) -> TopologySnapshot {
        let port_names = |ports: Vec<PortDescriptor>| -> Vec<String> {
            ports.iter().map(|p| p.name.to_string()).collect()
        };
        TopologySnapshot {
            nodes: self
                .nodes
                .iter()
                .enumerate()
                .map(|(i, node)| NodeSnapshot {
                    id: NodeId(i as u32),
                    name: node.name().to_string(),
                    kind: match node {
                        Node::Leaf(_) => "leaf",
                        Node::Sequence(_) => "sequence",
                        Node::Split(_) => "split",
                    }
                    .to_string(),
                    inputs: port_names(node.inputs()),
                    outputs: port_names(node.outputs()),
                })
                .collect(),
            edges: self
                .edges
                .iter()
                .map(|e| EdgeSnapshot {
                    id: e.id,
                    from_node: e.from.node,
                    from_port: e.from.port,
                    to_node: e.to.node,
                    to_port: e.to.port,
                })
                .collect(),
        }
    }

    /// Log the node tree and edges.
    pub fn print(&self) {
        tracing::info!("Graph: {} nodes, {} edges", self.nodes.len(), self.edges.len());
        for (i, node) in self.nodes.iter().enumerate() {
            tracing::info!("#{}", i);
            node.print();
        }
        for edge in &self.edges {
            tracing::info!("  {:?} -> {:?}", edge.from, edge.to);
        }
    }

    /// Receive every executor event of the coming run.
    pub fn subscribe(&mut self) -> Receiver<ExecutorEvent> {
        let (tx, rx) = unbounded();
        self.observers.push(tx);
        rx
    }

    // ── Execution ──

    /// Compile, wire and spawn the workers.
    pub fn start(self) -> PipelineResult<RunningGraph> {
        let plan = self.compile()?;
        let Graph {
            mut nodes,
            edges,
            config,
            observers,
            ..
        } = self;
        let started_at = Utc::now();

        let capacity = config.queue.capacity;
        let make_queue = move |name: String| -> Arc<LinkQueue> {
            if capacity == 0 {
                Arc::new(LinkQueue::unbounded(name))
            } else {
                Arc::new(LinkQueue::bounded(name, capacity))
            }
        };

        let mut queues = Vec::new();
        for edge in &edges {
            let (from, to) = (edge.from.node.index(), edge.to.node.index());
            let queue = make_queue(format!(
                "{}.{}->{}.{}",
                nodes[from].name(),
                edge.from.port,
                nodes[to].name(),
                edge.to.port
            ));
            nodes[from].set_output_queue(edge.from.port, queue.clone());
            nodes[to].set_input_queue(edge.to.port, queue.clone());
            queues.push(queue);
        }
        for node in &mut nodes {
            node.wire_internal(&make_queue, &mut queues);
        }

        let backend = config.compute.backend;
        let shared = match config.compute.policy {
            ContextPolicy::Shared => Some(ComputeContext::create("shared", backend)?),
            ContextPolicy::PerNode => None,
        };
        let mut contexts: Vec<Arc<ComputeContext>> = shared.iter().cloned().collect();

        let (event_tx, event_rx) = unbounded();
        let pool = Arc::new(BufferPool::new(config.pool.max_per_shape));
        for (index, node) in nodes.iter_mut().enumerate() {
            let attachment = Attachment {
                node: NodeId(index as u32),
                events: event_tx.clone(),
                pool: pool.clone(),
                host_handoff: shared.is_none(),
            };
            let mut context_for = |label: &str| -> PipelineResult<Arc<ComputeContext>> {
                match &shared {
                    Some(ctx) => Ok(ctx.clone()),
                    None => {
                        let ctx = ComputeContext::create(label, backend)?;
                        contexts.push(ctx.clone());
                        Ok(ctx)
                    }
                }
            };
            node.attach(&attachment, &mut context_for)?;
        }

        let mut slots: Vec<Option<Node>> = nodes.into_iter().map(Some).collect();
        let mut workers = Vec::new();
        for id in &plan.order {
            if let Some(node) = slots[id.index()].take() {
                node.into_workers(&mut workers);
            }
        }

        let abort = AbortHandle::new(queues);
        let mut handles = Vec::with_capacity(workers.len());
        for worker in workers {
            let label = worker.label().to_string();
            let node = worker.node_id();
            let is_sink = worker.is_sink();
            let spawned = thread::Builder::new()
                .name(format!("tomoflow-{}", label))
                .spawn(move || run_worker(worker));
            match spawned {
                Ok(handle) => handles.push(Some(WorkerHandle {
                    label,
                    node,
                    is_sink,
                    handle,
                })),
                Err(e) => {
                    tracing::error!("Failed to spawn worker '{}': {}", label, e);
                    abort.abort_with(format!("failed to spawn worker '{}'", label));
                    for handle in handles.into_iter().flatten() {
                        let _ = handle.handle.join();
                    }
                    return Err(PipelineError::Io(e));
                }
            }
        }
        drop(event_tx);

        tracing::info!(
            "Graph started: {} workers, {} queues, {} compute context(s)",
            handles.len(),
            abort.queues.len(),
            contexts.len()
        );

        Ok(RunningGraph {
            handles,
            events: event_rx,
            observers,
            abort,
            contexts,
            pool,
            plan,
            started_at,
        })
    }

    /// Start the graph and block until it finishes.
    pub fn run(self) -> PipelineResult<RunReport> {
        Ok(self.start()?.wait())
    }
}

// ── Workers ──

/// Drive one worker until it drains or fails.
fn run_worker(mut worker: Worker) -> WorkerReport {
    let label = worker.label().to_string();
    let node = worker.node_id();
    tracing::debug!("Worker '{}' started", label);

    let outcome = loop {
        match worker.process() {
            Ok(Step::Continue) => {}
            Ok(Step::Drained) => break Ok(()),
            Err(e) => break Err(e),
        }
    };

    let mut error = None;
    let state = match outcome {
        Ok(()) => match worker.teardown() {
            Ok(()) => NodeState::Terminated,
            Err(e) => {
                let e = e.in_node(node, label.as_str());
                worker.status_mut().report(&e);
                error = Some(e.to_string());
                NodeState::Failed
            }
        },
        Err(PipelineError::Queue(LinkError::Aborted)) => {
            worker.close_outputs();
            if let Err(e) = worker.teardown() {
                tracing::debug!("Teardown of aborted worker '{}' failed: {}", label, e);
            }
            NodeState::Aborted
        }
        Err(e) => {
            let e = e.in_node(node, label.as_str());
            worker.status_mut().report(&e);
            worker.close_outputs();
            if let Err(te) = worker.teardown() {
                tracing::warn!("Teardown of failed worker '{}' failed: {}", label, te);
            }
            error = Some(e.to_string());
            NodeState::Failed
        }
    };

    let status = worker.status_mut();
    status.transition(state);
    status.emit(ExecutorEvent::WorkerExited {
        node,
        label: label.clone(),
        state,
    });
    tracing::debug!("Worker '{}' exited in state {:?}", label, state);

    WorkerReport {
        node,
        label,
        state,
        stats: worker.stats().clone(),
        error,
    }
}

struct WorkerHandle {
    label: String,
    node: NodeId,
    is_sink: bool,
    handle: JoinHandle<WorkerReport>,
}

/// Cancels a running graph from any thread.
#[derive(Clone)]
pub struct AbortHandle {
    queues: Arc<Vec<Arc<LinkQueue>>>,
    requested: Arc<AtomicBool>,
    reason: Arc<Mutex<Option<String>>>,
}

impl AbortHandle {
    fn new(queues: Vec<Arc<LinkQueue>>) -> Self {
        Self {
            queues: Arc::new(queues),
            requested: Arc::new(AtomicBool::new(false)),
            reason: Arc::new(Mutex::new(None)),
        }
    }

    /// Abort every queue. Blocked workers wake with `LinkError::Aborted`.
    pub fn abort(&self) {
        self.abort_with("cancelled by operator");
    }

    pub fn abort_with(&self, reason: impl Into<String>) {
        if self.requested.swap(true, Ordering::AcqRel) {
            return;
        }
        let reason = reason.into();
        tracing::warn!("Aborting graph: {}", reason);
        if let Ok(mut slot) = self.reason.lock() {
            slot.get_or_insert(reason);
        }
        for queue in self.queues.iter() {
            queue.abort();
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    pub fn reason(&self) -> Option<String> {
        self.reason.lock().ok().and_then(|r| r.clone())
    }
}

/// Final outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GraphState {
    /// Every worker drained and joined.
    Terminated,
    /// The run was cancelled or hit a fatal error.
    Aborted,
}

/// What one worker did during the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub node: NodeId,
    pub label: String,
    pub state: NodeState,
    pub stats: NodeStats,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextReport {
    pub id: ContextId,
    pub label: String,
    pub backend: String,
    pub stats: ComputeStats,
}

/// Summary of a finished run, serializable to JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub state: GraphState,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub abort_reason: Option<String>,
    /// Fatal errors, in the order they were reported.
    pub errors: Vec<String>,
    /// Recoverable errors (configuration, shape).
    pub diagnostics: Vec<String>,
    pub workers: Vec<WorkerReport>,
    pub contexts: Vec<ContextReport>,
    pub pool: PoolStats,
    pub plan: PlanStats,
}

impl RunReport {
    pub fn is_terminated(&self) -> bool {
        self.state == GraphState::Terminated
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    /// Report of the first worker with this label.
    pub fn worker(&self, label: &str) -> Option<&WorkerReport> {
        self.workers.iter().find(|w| w.label == label)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// `Err(PipelineError::Aborted)` unless the graph terminated.
    pub fn into_result(self) -> PipelineResult<Self> {
        match self.state {
            GraphState::Terminated => Ok(self),
            GraphState::Aborted => {
                let mut reasons: Vec<String> = self.abort_reason.iter().cloned().collect();
                reasons.extend(self.errors.iter().cloned());
                Err(PipelineError::Aborted(reasons.join("; ")))
            }
        }
    }
}

/// A started graph.
pub struct RunningGraph {
    handles: Vec<Option<WorkerHandle>>,
    events: Receiver<ExecutorEvent>,
    observers: Vec<Sender<ExecutorEvent>>,
    abort: AbortHandle,
    contexts: Vec<Arc<ComputeContext>>,
    pool: Arc<BufferPool>,
    plan: CompiledPlan,
    started_at: DateTime<Utc>,
}

impl RunningGraph {
    pub fn abort(&self) {
        self.abort.abort();
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn plan(&self) -> &CompiledPlan {
        &self.plan
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// Receive the remaining events of this run. Events are forwarded while
    /// `wait` runs.
    pub fn subscribe(&mut self) -> Receiver<ExecutorEvent> {
        let (tx, rx) = unbounded();
        self.observers.push(tx);
        rx
    }

    fn dispatch(&mut self, event: ExecutorEvent, errors: &mut Vec<String>, diagnostics: &mut Vec<String>) {
        match &event {
            ExecutorEvent::NodeError {
                label,
                message,
                fatal,
                ..
            } => {
                let line = format!("{}: {}", label, message);
                if *fatal {
                    errors.push(line);
                    self.abort_and_notify(format!("fatal error in '{}'", label));
                } else {
                    diagnostics.push(line);
                }
            }
            ExecutorEvent::WorkerExited {
                label,
                state: NodeState::Failed,
                ..
            } => {
                self.abort_and_notify(format!("worker '{}' failed", label));
            }
            _ => {}
        }
        self.forward(event);
    }

    fn abort_and_notify(&mut self, reason: String) {
        if self.abort.is_aborted() {
            return;
        }
        self.abort.abort_with(reason.clone());
        self.forward(ExecutorEvent::Aborted { reason });
    }

    fn forward(&mut self, event: ExecutorEvent) {
        self.observers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Join finished workers (all of them when `block`). Returns `false` once
    /// none remain.
    fn reap(&mut self, reports: &mut Vec<WorkerReport>, errors: &mut Vec<String>, block: bool) -> bool {
        let mut finished = Vec::new();
        for slot in self.handles.iter_mut() {
            if slot.as_ref().is_some_and(|h| block || h.handle.is_finished()) {
                finished.extend(slot.take());
            }
        }

        for worker in finished {
            match worker.handle.join() {
                Ok(report) => reports.push(report),
                Err(_) => {
                    let err = PipelineError::WorkerPanicked(worker.label.clone());
                    tracing::error!("{}", err);
                    errors.push(err.to_string());
                    reports.push(WorkerReport {
                        node: worker.node,
                        label: worker.label.clone(),
                        state: NodeState::Failed,
                        stats: NodeStats::default(),
                        error: Some(err.to_string()),
                    });
                    self.abort_and_notify(format!("worker '{}' panicked", worker.label));
                }
            }
            if worker.is_sink {
                tracing::debug!("Sink '{}' joined", worker.label);
            }
        }
        self.handles.iter().any(Option::is_some)
    }

    /// Supervise the workers until all of them have returned.
    pub fn wait(mut self) -> RunReport {
        let mut errors = Vec::new();
        let mut diagnostics = Vec::new();
        let mut reports = Vec::with_capacity(self.handles.len());
        let sinks: Vec<String> = self
            .handles
            .iter()
            .flatten()
            .filter(|h| h.is_sink)
            .map(|h| h.label.clone())
            .collect();

        loop {
            match self.events.recv_timeout(POLL_INTERVAL) {
                Ok(event) => self.dispatch(event, &mut errors, &mut diagnostics),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    // Every worker has dropped its sender; join what is left.
                    self.reap(&mut reports, &mut errors, true);
                    break;
                }
            }
            if !self.reap(&mut reports, &mut errors, false) {
                break;
            }
        }
        while let Ok(event) = self.events.try_recv() {
            self.dispatch(event, &mut errors, &mut diagnostics);
        }

        let sinks_terminated = reports
            .iter()
            .filter(|r| sinks.contains(&r.label))
            .all(|r| r.state == NodeState::Terminated);
        let state = if self.abort.is_aborted() || !errors.is_empty() || !sinks_terminated {
            GraphState::Aborted
        } else {
            GraphState::Terminated
        };

        reports.sort_by_key(|r| r.node);
        let report = RunReport {
            state,
            started_at: self.started_at,
            finished_at: Utc::now(),
            abort_reason: self.abort.reason(),
            errors,
            diagnostics,
            workers: reports,
            contexts: self
                .contexts
                .iter()
                .map(|ctx| ContextReport {
                    id: ctx.id(),
                    label: ctx.label().to_string(),
                    backend: ctx.backend_name().to_string(),
                    stats: ctx.stats(),
                })
                .collect(),
            pool: self.pool.stats(),
            plan: self.plan.stats.clone(),
        };
        tracing::info!(
            "Graph finished: {:?} after {} ms ({} errors)",
            report.state,
            report.duration().num_milliseconds(),
            report.errors.len()
        );
        report
    }
}
