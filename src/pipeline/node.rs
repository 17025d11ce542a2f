//! Node abstraction for the pipeline.
//!
//! Two layers, as in every stage of the engine:
//! - **`Filter` trait**: the numeric operation a leaf wraps. Builtin filters
//!   are dispatched through the `BuiltinFilter` enum, third-party ones through
//!   `Box<dyn Filter>`; `AnyFilter` holds either.
//! - **`Element` trait**: the queue/context/process contract every node
//!   satisfies. `Node` is a tagged enum over `LeafNode`, `Sequence` and
//!   `Split`, so graph traversal is one recursive match instead of dispatch
//!   spread over many types.
//!
//! A leaf moves through `Unstarted → Initialized → Running → Drained →
//! Terminated`; `Failed` and `Aborted` end a run early.

use crate::pipeline::buffer::{Buffer, BufferPool, Dims};
use crate::pipeline::compute::ComputeContext;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::events::ExecutorEvent;
use crate::pipeline::id::NodeId;
use crate::pipeline::nodes::{CollectSink, FrameSource, Monitor, PipeOutput, RegionOfInterest};
use crate::pipeline::port::{Arity, InputCardinality, PortDescriptor};
use crate::pipeline::queue::LinkQueue;
use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;

// ── Filter contract ──

/// Buffers and device handle passed to `Filter::process`.
pub struct ProcessContext<'a> {
    /// One buffer per input port, in port order.
    pub inputs: &'a mut [Buffer],
    /// One buffer per output port, shaped by `initialize`. Contents are
    /// unspecified; a filter returning `Flow::Emit` must fill them.
    pub outputs: &'a mut [Buffer],
    /// Context for host/device migration and dispatch.
    pub compute: &'a ComputeContext,
    /// Number of previous `process` calls on this node.
    pub iteration: u64,
}

/// What a filter did with one set of inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Outputs are valid and go downstream.
    Emit,
    /// Nothing to emit for this step.
    Skip,
    /// The filter has no more output (sources: stream exhausted).
    Finished,
}

/// A numeric operation plugged into a leaf node.
pub trait Filter: Send {
    /// Human-readable name of this filter.
    fn name(&self) -> &str;

    /// Port descriptors; order defines port indices.
    fn ports(&self) -> &[PortDescriptor];

    /// Negotiate output shapes from the first set of inputs (empty for sources).
    fn initialize(&mut self, inputs: &[Buffer], ctx: &ComputeContext) -> PipelineResult<Vec<Dims>>;

    /// Consume one buffer per input and fill one buffer per output.
    fn process(&mut self, io: &mut ProcessContext<'_>) -> PipelineResult<Flow>;

    /// Teardown after the stream ended (close handles, flush).
    fn finish(&mut self, _ctx: &ComputeContext) -> PipelineResult<()> {
        Ok(())
    }
}

/// Enum dispatch for builtin filters.
pub enum BuiltinFilter {
    FrameSource(FrameSource),
    RegionOfInterest(RegionOfInterest),
    Monitor(Monitor),
    PipeOutput(PipeOutput),
    CollectSink(CollectSink),
}

impl BuiltinFilter {
    fn as_filter(&self) -> &dyn Filter {
        match self {
            BuiltinFilter::FrameSource(f) => f,
            BuiltinFilter::RegionOfInterest(f) => f,
            BuiltinFilter::Monitor(f) => f,
            BuiltinFilter::PipeOutput(f) => f,
            BuiltinFilter::CollectSink(f) => f,
        }
    }

    fn as_filter_mut(&mut self) -> &mut dyn Filter {
        match self {
            BuiltinFilter::FrameSource(f) => f,
            BuiltinFilter::RegionOfInterest(f) => f,
            BuiltinFilter::Monitor(f) => f,
            BuiltinFilter::PipeOutput(f) => f,
            BuiltinFilter::CollectSink(f) => f,
        }
    }
}

/// Either a builtin filter (enum dispatch) or a plugin (trait object).
pub enum AnyFilter {
    Builtin(BuiltinFilter),
    Plugin(Box<dyn Filter>),
}

impl AnyFilter {
    pub fn plugin(filter: impl Filter + 'static) -> Self {
        AnyFilter::Plugin(Box::new(filter))
    }

    fn get(&self) -> &dyn Filter {
        match self {
            AnyFilter::Builtin(f) => f.as_filter(),
            AnyFilter::Plugin(f) => f.as_ref(),
        }
    }

    fn get_mut(&mut self) -> &mut dyn Filter {
        match self {
            AnyFilter::Builtin(f) => f.as_filter_mut(),
            AnyFilter::Plugin(f) => f.as_mut(),
        }
    }

    pub fn name(&self) -> &str {
        self.get().name()
    }

    pub fn ports(&self) -> &[PortDescriptor] {
        self.get().ports()
    }
}

impl From<FrameSource> for AnyFilter {
    fn from(f: FrameSource) -> Self {
        AnyFilter::Builtin(BuiltinFilter::FrameSource(f))
    }
}

impl From<RegionOfInterest> for AnyFilter {
    fn from(f: RegionOfInterest) -> Self {
        AnyFilter::Builtin(BuiltinFilter::RegionOfInterest(f))
    }
}

impl From<Monitor> for AnyFilter {
    fn from(f: Monitor) -> Self {
        AnyFilter::Builtin(BuiltinFilter::Monitor(f))
    }
}

impl From<PipeOutput> for AnyFilter {
    fn from(f: PipeOutput) -> Self {
        AnyFilter::Builtin(BuiltinFilter::PipeOutput(f))
    }
}

impl From<CollectSink> for AnyFilter {
    fn from(f: CollectSink) -> Self {
        AnyFilter::Builtin(BuiltinFilter::CollectSink(f))
    }
}

// ── Element contract ──

/// Lifecycle of a node within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    Unstarted,
    /// Output shapes negotiated.
    Initialized,
    /// In the steady-state process loop.
    Running,
    /// End-of-stream observed on every input, outputs closed.
    Drained,
    /// Teardown finished.
    Terminated,
    /// Stopped by a fatal error.
    Failed,
    /// Stopped because the graph was cancelled.
    Aborted,
}

impl NodeState {
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            NodeState::Drained | NodeState::Terminated | NodeState::Failed | NodeState::Aborted
        )
    }
}

/// Result of one scheduling step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// More work may follow.
    Continue,
    /// The node has drained and closed its outputs.
    Drained,
}

/// The contract every pipeline node satisfies.
///
/// Queue and context accessors default to no-ops so nodes without a given
/// port (a source has no input) need not implement them.
pub trait Element {
    fn name(&self) -> &str;

    fn inputs(&self) -> Vec<PortDescriptor>;

    fn outputs(&self) -> Vec<PortDescriptor>;

    fn set_input_queue(&mut self, port: usize, _queue: Arc<LinkQueue>) {
        tracing::debug!("{}: ignoring queue for missing input port {}", self.name(), port);
    }

    fn set_output_queue(&mut self, port: usize, _queue: Arc<LinkQueue>) {
        tracing::debug!("{}: ignoring queue for missing output port {}", self.name(), port);
    }

    fn input_queue(&self, _port: usize) -> Option<Arc<LinkQueue>> {
        None
    }

    fn output_queue(&self, _port: usize) -> Option<Arc<LinkQueue>> {
        None
    }

    fn set_compute_context(&mut self, _ctx: Arc<ComputeContext>) {}

    fn compute_context(&self) -> Option<Arc<ComputeContext>> {
        None
    }

    /// Run one scheduling step.
    fn process(&mut self) -> PipelineResult<Step> {
        tracing::warn!("{}: process not implemented", self.name());
        Ok(Step::Drained)
    }

    /// One-line diagnostic description.
    fn describe(&self) -> String {
        format!(
            "{} ({} in, {} out)",
            self.name(),
            self.inputs().len(),
            self.outputs().len()
        )
    }

    /// Diagnostic dump through the log.
    fn print(&self) {
        tracing::info!("{}", self.describe());
    }
}

/// Identity and state shared by everything that runs as a worker.
pub(crate) struct NodeStatus {
    pub(crate) id: NodeId,
    pub(crate) label: String,
    pub(crate) state: NodeState,
    events: Option<Sender<ExecutorEvent>>,
}

impl NodeStatus {
    fn new(label: String) -> Self {
        Self {
            id: NodeId::INVALID,
            label,
            state: NodeState::Unstarted,
            events: None,
        }
    }

    pub(crate) fn transition(&mut self, state: NodeState) {
        if self.state == state {
            return;
        }
        tracing::debug!("{}: {:?} -> {:?}", self.label, self.state, state);
        self.state = state;
        self.emit(ExecutorEvent::StateChanged {
            node: self.id,
            label: self.label.clone(),
            state,
        });
    }

    pub(crate) fn report(&self, error: &PipelineError) {
        let fatal = error.is_fatal();
        if fatal {
            tracing::error!("{}: {}", self.label, error);
        } else {
            tracing::warn!("{}: {}", self.label, error);
        }
        self.emit(ExecutorEvent::NodeError {
            node: self.id,
            label: self.label.clone(),
            message: error.to_string(),
            fatal,
        });
    }

    pub(crate) fn emit(&self, event: ExecutorEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

/// Per-run services the executor attaches to every worker.
#[derive(Clone)]
pub struct Attachment {
    pub node: NodeId,
    pub events: Sender<ExecutorEvent>,
    pub pool: Arc<BufferPool>,
    /// Download device-resident outputs before they cross a queue, for
    /// runs where producer and consumer may hold different contexts.
    pub host_handoff: bool,
}

/// Counters a worker reports when it exits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStats {
    /// `Filter::process` invocations.
    pub iterations: u64,
    pub frames_in: u64,
    pub frames_out: u64,
    pub skipped: u64,
    pub errors: u64,
}

// ── Leaf ──

/// A node wrapping a single filter.
pub struct LeafNode {
    filter: AnyFilter,
    arity: Arity,
    inputs: Vec<Option<Arc<LinkQueue>>>,
    outputs: Vec<Option<Arc<LinkQueue>>>,
    compute: Option<Arc<ComputeContext>>,
    pool: Option<Arc<BufferPool>>,
    host_handoff: bool,
    pub(crate) status: NodeStatus,
    out_dims: Vec<Dims>,
    consumed: Vec<u64>,
    ended: Vec<bool>,
    held: Vec<Option<Buffer>>,
    pub(crate) stats: NodeStats,
}

impl LeafNode {
    pub fn new(filter: impl Into<AnyFilter>) -> Self {
        let filter = filter.into();
        let arity = Arity::from_ports(filter.ports());
        let n_in = arity.inputs.len();
        let n_out = arity.outputs.len();
        let label = filter.name().to_string();
        Self {
            filter,
            arity,
            inputs: vec![None; n_in],
            outputs: vec![None; n_out],
            compute: None,
            pool: None,
            host_handoff: false,
            status: NodeStatus::new(label),
            out_dims: Vec::new(),
            consumed: vec![0; n_in],
            ended: vec![false; n_in],
            held: (0..n_in).map(|_| None).collect(),
            stats: NodeStats::default(),
        }
    }

    /// Leaf running a third-party filter.
    pub fn plugin(filter: impl Filter + 'static) -> Self {
        Self::new(AnyFilter::plugin(filter))
    }

    /// Override the label used in logs and events.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.status.label = label.into();
        self
    }

    pub fn label(&self) -> &str {
        &self.status.label
    }

    pub fn state(&self) -> NodeState {
        self.status.state
    }

    pub fn stats(&self) -> &NodeStats {
        &self.stats
    }

    pub fn arity(&self) -> &Arity {
        &self.arity
    }

    /// Output shapes negotiated by `initialize`.
    pub fn output_dims(&self) -> &[Dims] {
        &self.out_dims
    }

    pub fn is_source(&self) -> bool {
        self.arity.is_source()
    }

    pub fn is_sink(&self) -> bool {
        self.arity.is_sink()
    }

    pub(crate) fn attach(&mut self, attachment: &Attachment) {
        self.status.id = attachment.node;
        self.status.events = Some(attachment.events.clone());
        self.pool = Some(attachment.pool.clone());
        self.host_handoff = attachment.host_handoff;
    }

    fn acquire(&self, dims: &Dims) -> Buffer {
        match &self.pool {
            Some(pool) => pool.acquire(dims),
            None => Buffer::new(dims.clone()),
        }
    }

    fn recycle(&self, buffer: Buffer) {
        if let Some(pool) = &self.pool {
            if !buffer.is_empty() {
                pool.recycle(buffer);
            }
        }
    }

    /// Negotiate output shapes. `Ok(false)` means a recoverable
    /// configuration problem was reported and the node must not produce output.
    fn initialize(&mut self, inputs: &[Buffer], ctx: &ComputeContext) -> PipelineResult<bool> {
        match self.filter.get_mut().initialize(inputs, ctx) {
            Ok(dims) => {
                if dims.len() != self.arity.outputs.len() {
                    return Err(PipelineError::PortMismatch(format!(
                        "{} negotiated {} output shapes for {} outputs",
                        self.status.label,
                        dims.len(),
                        self.arity.outputs.len()
                    )));
                }
                tracing::debug!("{}: output shapes {:?}", self.status.label, dims);
                self.out_dims = dims;
                self.status.transition(NodeState::Initialized);
                Ok(true)
            }
            Err(e) if !e.is_fatal() => {
                self.stats.errors += 1;
                self.status.report(&e);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Pop one buffer per input. `None` once any required input has ended.
    fn gather_inputs(&mut self) -> PipelineResult<Option<Vec<Buffer>>> {
        let mut gathered = Vec::with_capacity(self.inputs.len());
        for port in 0..self.inputs.len() {
            let cardinality = self.arity.inputs[port].cardinality;
            if let InputCardinality::Fixed(n) = cardinality {
                if self.consumed[port] >= n {
                    if let Some(buffer) = self.held[port].take() {
                        gathered.push(buffer);
                        continue;
                    }
                }
            }

            let queue = self.inputs[port].clone().ok_or_else(|| {
                PipelineError::PortMismatch(format!(
                    "{}: input port {} is not connected",
                    self.status.label, port
                ))
            })?;
            match queue.pop()? {
                Some(buffer) => {
                    self.consumed[port] += 1;
                    self.stats.frames_in += 1;
                    gathered.push(buffer);
                }
                None => {
                    self.ended[port] = true;
                    for buffer in gathered {
                        self.recycle(buffer);
                    }
                    return Ok(None);
                }
            }
        }
        Ok(Some(gathered))
    }

    fn release_inputs(&mut self, inputs: Vec<Buffer>) {
        for (port, buffer) in inputs.into_iter().enumerate() {
            match self.arity.inputs[port].cardinality {
                InputCardinality::Fixed(n) if self.consumed[port] >= n => {
                    self.held[port] = Some(buffer);
                }
                _ => self.recycle(buffer),
            }
        }
    }

    fn fixed_inputs_satisfied(&self) -> bool {
        !self.arity.inputs.is_empty()
            && self
                .arity
                .inputs
                .iter()
                .zip(&self.consumed)
                .all(|(port, &count)| match port.cardinality {
                    InputCardinality::Fixed(n) => count >= n,
                    InputCardinality::Unbounded => false,
                })
    }

    /// Discard whatever is left upstream, close outputs, become `Drained`.
    fn drain(&mut self) -> PipelineResult<Step> {
        for port in 0..self.inputs.len() {
            if self.ended[port] {
                continue;
            }
            if let Some(queue) = self.inputs[port].clone() {
                while let Some(buffer) = queue.pop()? {
                    self.recycle(buffer);
                }
            }
            self.ended[port] = true;
        }
        for held in self.held.iter_mut() {
            held.take();
        }
        self.close_outputs();
        self.status.transition(NodeState::Drained);
        Ok(Step::Drained)
    }

    pub(crate) fn close_outputs(&self) {
        for queue in self.outputs.iter().flatten() {
            queue.close();
        }
    }

    fn push_outputs(&mut self, outputs: Vec<Buffer>, ctx: &ComputeContext) -> PipelineResult<()> {
        for (port, mut buffer) in outputs.into_iter().enumerate() {
            match &self.outputs[port] {
                Some(queue) => {
                    if self.host_handoff {
                        buffer.host_sync(ctx)?;
                    }
                    queue.push(buffer)?;
                    self.stats.frames_out += 1;
                }
                None => self.recycle(buffer),
            }
        }
        Ok(())
    }

    fn run_filter(&mut self, mut inputs: Vec<Buffer>, ctx: &ComputeContext) -> PipelineResult<Step> {
        let mut outputs: Vec<Buffer> = self.out_dims.iter().map(|d| self.acquire(d)).collect();
        let result = {
            let mut io = ProcessContext {
                inputs: &mut inputs,
                outputs: &mut outputs,
                compute: ctx,
                iteration: self.stats.iterations,
            };
            self.filter.get_mut().process(&mut io)
        };
        self.stats.iterations += 1;

        match result {
            Ok(Flow::Emit) => {
                let sequence = inputs
                    .first()
                    .map(|b| b.sequence)
                    .unwrap_or(self.stats.iterations - 1);
                for buffer in outputs.iter_mut() {
                    buffer.sequence = sequence;
                }
                if let Err(e) = self.push_outputs(outputs, ctx) {
                    self.release_inputs(inputs);
                    return Err(e);
                }
            }
            Ok(Flow::Skip) => {
                self.stats.skipped += 1;
                outputs.into_iter().for_each(|b| self.recycle(b));
            }
            Ok(Flow::Finished) => {
                outputs.into_iter().for_each(|b| self.recycle(b));
                self.release_inputs(inputs);
                return self.drain();
            }
            Err(e) if !e.is_fatal() => {
                self.stats.skipped += 1;
                self.stats.errors += 1;
                self.status.report(&e);
                outputs.into_iter().for_each(|b| self.recycle(b));
            }
            Err(e) => {
                outputs.into_iter().for_each(|b| self.recycle(b));
                self.release_inputs(inputs);
                return Err(e);
            }
        }

        self.release_inputs(inputs);
        if self.status.state == NodeState::Initialized {
            self.status.transition(NodeState::Running);
        }
        if self.fixed_inputs_satisfied() {
            return self.drain();
        }
        Ok(Step::Continue)
    }

    /// True when `process` can make progress without blocking on an input.
    pub fn is_ready(&self) -> bool {
        if self.status.state.is_finished() {
            return false;
        }
        self.arity.inputs.iter().enumerate().all(|(port, desc)| {
            let held = matches!(desc.cardinality, InputCardinality::Fixed(n) if self.consumed[port] >= n)
                && self.held[port].is_some();
            held || self.inputs[port].as_ref().map_or(true, |q| q.is_ready())
        })
    }

    /// Run the filter's teardown hook.
    pub(crate) fn teardown(&mut self) -> PipelineResult<()> {
        let ctx = self.compute.clone();
        match ctx {
            Some(ctx) => self.filter.get_mut().finish(&ctx),
            None => Ok(()),
        }
    }
}

impl Element for LeafNode {
    fn name(&self) -> &str {
        &self.status.label
    }

    fn inputs(&self) -> Vec<PortDescriptor> {
        self.arity.inputs.clone()
    }

    fn outputs(&self) -> Vec<PortDescriptor> {
        self.arity.outputs.clone()
    }

    fn set_input_queue(&mut self, port: usize, queue: Arc<LinkQueue>) {
        match self.inputs.get_mut(port) {
            Some(slot) => *slot = Some(queue),
            None => tracing::debug!(
                "{}: ignoring queue for missing input port {}",
                self.status.label,
                port
            ),
        }
    }

    fn set_output_queue(&mut self, port: usize, queue: Arc<LinkQueue>) {
        match self.outputs.get_mut(port) {
            Some(slot) => *slot = Some(queue),
            None => tracing::debug!(
                "{}: ignoring queue for missing output port {}",
                self.status.label,
                port
            ),
        }
    }

    fn input_queue(&self, port: usize) -> Option<Arc<LinkQueue>> {
        self.inputs.get(port).cloned().flatten()
    }

    fn output_queue(&self, port: usize) -> Option<Arc<LinkQueue>> {
        self.outputs.get(port).cloned().flatten()
    }

    fn set_compute_context(&mut self, ctx: Arc<ComputeContext>) {
        self.compute = Some(ctx);
    }

    fn compute_context(&self) -> Option<Arc<ComputeContext>> {
        self.compute.clone()
    }

    fn process(&mut self) -> PipelineResult<Step> {
        if self.status.state.is_finished() {
            return Ok(Step::Drained);
        }
        let ctx = self.compute.clone().ok_or_else(|| {
            PipelineError::Device(format!("{}: no compute context bound", self.status.label))
        })?;

        if self.arity.is_source() {
            if self.status.state == NodeState::Unstarted && !self.initialize(&[], &ctx)? {
                return self.drain();
            }
            return self.run_filter(Vec::new(), &ctx);
        }

        let Some(inputs) = self.gather_inputs()? else {
            return self.drain();
        };
        if self.status.state == NodeState::Unstarted && !self.initialize(&inputs, &ctx)? {
            for buffer in inputs {
                self.recycle(buffer);
            }
            return self.drain();
        }
        self.run_filter(inputs, &ctx)
    }

    fn describe(&self) -> String {
        let ctx = self
            .compute
            .as_ref()
            .map(|c| c.id().to_string())
            .unwrap_or_else(|| "-".into());
        format!(
            "{} [{}] {:?} in={} out={} ctx={}",
            self.status.label,
            self.filter.name(),
            self.status.state,
            self.arity.inputs.len(),
            self.arity.outputs.len(),
            ctx
        )
    }
}

// ── Sequence ──

/// Children run in declared order on one stream: child `i`'s outputs feed
/// child `i + 1`'s inputs through internal queues.
pub struct Sequence {
    name: String,
    children: Vec<Node>,
}

impl Sequence {
    pub fn new(name: impl Into<String>, children: Vec<Node>) -> Self {
        Self {
            name: name.into(),
            children,
        }
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    fn validate(&self) -> PipelineResult<()> {
        if self.children.is_empty() {
            return Err(PipelineError::PortMismatch(format!(
                "sequence '{}' has no children",
                self.name
            )));
        }
        for pair in self.children.windows(2) {
            let produced = pair[0].outputs().len();
            let consumed = pair[1].inputs().len();
            if produced != consumed {
                return Err(PipelineError::PortMismatch(format!(
                    "sequence '{}': '{}' has {} outputs but '{}' has {} inputs",
                    self.name,
                    pair[0].name(),
                    produced,
                    pair[1].name(),
                    consumed
                )));
            }
        }
        self.children.iter().try_for_each(Node::validate)
    }
}

impl Element for Sequence {
    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&self) -> Vec<PortDescriptor> {
        self.children.first().map(Node::inputs).unwrap_or_default()
    }

    fn outputs(&self) -> Vec<PortDescriptor> {
        self.children.last().map(Node::outputs).unwrap_or_default()
    }

    fn set_input_queue(&mut self, port: usize, queue: Arc<LinkQueue>) {
        if let Some(first) = self.children.first_mut() {
            first.set_input_queue(port, queue);
        }
    }

    fn set_output_queue(&mut self, port: usize, queue: Arc<LinkQueue>) {
        if let Some(last) = self.children.last_mut() {
            last.set_output_queue(port, queue);
        }
    }

    fn input_queue(&self, port: usize) -> Option<Arc<LinkQueue>> {
        self.children.first().and_then(|c| c.input_queue(port))
    }

    fn output_queue(&self, port: usize) -> Option<Arc<LinkQueue>> {
        self.children.last().and_then(|c| c.output_queue(port))
    }

    fn set_compute_context(&mut self, ctx: Arc<ComputeContext>) {
        for child in &mut self.children {
            child.set_compute_context(ctx.clone());
        }
    }

    fn compute_context(&self) -> Option<Arc<ComputeContext>> {
        self.children.first().and_then(Node::compute_context)
    }

    /// Step every child that has input waiting, in declared order. When none
    /// has, block on the first unfinished child, which waits on upstream.
    fn process(&mut self) -> PipelineResult<Step> {
        step_children(&mut self.children, true)
    }
}

/// Step the ready children in order. With `block_if_idle`, a round where no
/// child is ready steps the first unfinished one instead.
fn step_children(children: &mut [Node], block_if_idle: bool) -> PipelineResult<Step> {
    let mut stepped = false;
    for child in children.iter_mut() {
        if child.is_ready() {
            child.process()?;
            stepped = true;
        }
    }
    if !stepped && block_if_idle {
        if let Some(child) = children.iter_mut().find(|c| !c.is_finished()) {
            child.process()?;
        }
    }
    if children.iter().all(Node::is_finished) {
        Ok(Step::Drained)
    } else {
        Ok(Step::Continue)
    }
}

// ── Split ──

/// How a Split hands input buffers to its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitMode {
    /// Every child receives its own copy of every buffer.
    #[default]
    Broadcast,
    /// Buffers are dealt to children in turn.
    RoundRobin,
}

/// The worker half of a Split: reads the Split's input, feeds the children.
pub struct SplitRouter {
    mode: SplitMode,
    input: Option<Arc<LinkQueue>>,
    child_inputs: Vec<Arc<LinkQueue>>,
    compute: Option<Arc<ComputeContext>>,
    host_handoff: bool,
    next: usize,
    pub(crate) status: NodeStatus,
    pub(crate) stats: NodeStats,
}

impl SplitRouter {
    pub fn mode(&self) -> SplitMode {
        self.mode
    }

    pub fn state(&self) -> NodeState {
        self.status.state
    }

    pub(crate) fn attach(&mut self, attachment: &Attachment) {
        self.status.id = attachment.node;
        self.status.events = Some(attachment.events.clone());
        self.host_handoff = attachment.host_handoff;
    }

    pub(crate) fn close_outputs(&self) {
        for queue in &self.child_inputs {
            queue.close();
        }
    }

    pub fn is_ready(&self) -> bool {
        !self.status.state.is_finished() && self.input.as_ref().map_or(true, |q| q.is_ready())
    }
}

impl Element for SplitRouter {
    fn name(&self) -> &str {
        &self.status.label
    }

    fn inputs(&self) -> Vec<PortDescriptor> {
        vec![PortDescriptor::input("in", None)]
    }

    fn outputs(&self) -> Vec<PortDescriptor> {
        Vec::new()
    }

    fn set_input_queue(&mut self, port: usize, queue: Arc<LinkQueue>) {
        if port == 0 {
            self.input = Some(queue);
        } else {
            tracing::debug!("{}: ignoring queue for missing input port {}", self.status.label, port);
        }
    }

    fn input_queue(&self, port: usize) -> Option<Arc<LinkQueue>> {
        if port == 0 {
            self.input.clone()
        } else {
            None
        }
    }

    fn set_compute_context(&mut self, ctx: Arc<ComputeContext>) {
        self.compute = Some(ctx);
    }

    fn compute_context(&self) -> Option<Arc<ComputeContext>> {
        self.compute.clone()
    }

    fn process(&mut self) -> PipelineResult<Step> {
        if self.status.state.is_finished() {
            return Ok(Step::Drained);
        }
        let input = self.input.clone().ok_or_else(|| {
            PipelineError::PortMismatch(format!("{}: input is not connected", self.status.label))
        })?;
        if self.status.state == NodeState::Unstarted {
            self.status.transition(NodeState::Running);
        }

        let Some(mut buffer) = input.pop()? else {
            self.close_outputs();
            self.status.transition(NodeState::Drained);
            return Ok(Step::Drained);
        };
        self.stats.frames_in += 1;
        self.stats.iterations += 1;

        let ctx = self.compute.clone().ok_or_else(|| {
            PipelineError::Device(format!("{}: no compute context bound", self.status.label))
        })?;
        if self.host_handoff {
            buffer.host_sync(&ctx)?;
        }

        match self.mode {
            SplitMode::Broadcast => {
                let (last, rest) = match self.child_inputs.split_last() {
                    Some(parts) => parts,
                    None => return Ok(Step::Continue),
                };
                for queue in rest {
                    queue.push(buffer.duplicate(&ctx)?)?;
                    self.stats.frames_out += 1;
                }
                last.push(buffer)?;
                self.stats.frames_out += 1;
            }
            SplitMode::RoundRobin => {
                if self.child_inputs.is_empty() {
                    return Ok(Step::Continue);
                }
                let target = self.next % self.child_inputs.len();
                self.next = target + 1;
                self.child_inputs[target].push(buffer)?;
                self.stats.frames_out += 1;
            }
        }
        Ok(Step::Continue)
    }

    fn describe(&self) -> String {
        format!(
            "{} [split {:?}] {:?} -> {} children",
            self.status.label,
            self.mode,
            self.status.state,
            self.child_inputs.len()
        )
    }
}

/// Fan-out composite: one input replicated (or dealt) to every child; the
/// children's outputs become the Split's outputs, in child order.
pub struct Split {
    router: SplitRouter,
    children: Vec<Node>,
}

impl Split {
    pub fn new(name: impl Into<String>, mode: SplitMode, children: Vec<Node>) -> Self {
        Self {
            router: SplitRouter {
                mode,
                input: None,
                child_inputs: Vec::new(),
                compute: None,
                host_handoff: false,
                next: 0,
                status: NodeStatus::new(name.into()),
                stats: NodeStats::default(),
            },
            children,
        }
    }

    pub fn broadcast(name: impl Into<String>, children: Vec<Node>) -> Self {
        Self::new(name, SplitMode::Broadcast, children)
    }

    pub fn mode(&self) -> SplitMode {
        self.router.mode
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    /// Map a Split output port to (child index, child port).
    fn locate_output(&self, port: usize) -> Option<(usize, usize)> {
        let mut offset = 0;
        for (index, child) in self.children.iter().enumerate() {
            let count = child.outputs().len();
            if port < offset + count {
                return Some((index, port - offset));
            }
            offset += count;
        }
        None
    }

    fn validate(&self) -> PipelineResult<()> {
        if self.children.is_empty() {
            return Err(PipelineError::PortMismatch(format!(
                "split '{}' has no children",
                self.router.status.label
            )));
        }
        for child in &self.children {
            if child.inputs().len() != 1 {
                return Err(PipelineError::PortMismatch(format!(
                    "split '{}': child '{}' must have exactly one input, has {}",
                    self.router.status.label,
                    child.name(),
                    child.inputs().len()
                )));
            }
        }
        self.children.iter().try_for_each(Node::validate)
    }
}

impl Element for Split {
    fn name(&self) -> &str {
        &self.router.status.label
    }

    fn inputs(&self) -> Vec<PortDescriptor> {
        self.router.inputs()
    }

    fn outputs(&self) -> Vec<PortDescriptor> {
        self.children.iter().flat_map(Node::outputs).collect()
    }

    fn set_input_queue(&mut self, port: usize, queue: Arc<LinkQueue>) {
        self.router.set_input_queue(port, queue);
    }

    fn set_output_queue(&mut self, port: usize, queue: Arc<LinkQueue>) {
        match self.locate_output(port) {
            Some((child, local)) => self.children[child].set_output_queue(local, queue),
            None => tracing::debug!(
                "{}: ignoring queue for missing output port {}",
                self.router.status.label,
                port
            ),
        }
    }

    fn input_queue(&self, port: usize) -> Option<Arc<LinkQueue>> {
        self.router.input_queue(port)
    }

    fn output_queue(&self, port: usize) -> Option<Arc<LinkQueue>> {
        let (child, local) = self.locate_output(port)?;
        self.children[child].output_queue(local)
    }

    fn set_compute_context(&mut self, ctx: Arc<ComputeContext>) {
        self.router.set_compute_context(ctx.clone());
        for child in &mut self.children {
            child.set_compute_context(ctx.clone());
        }
    }

    fn compute_context(&self) -> Option<Arc<ComputeContext>> {
        self.router.compute_context()
    }

    /// Route one input buffer if one is waiting, then step the children
    /// that received work.
    fn process(&mut self) -> PipelineResult<Step> {
        let route = !self.router.state().is_finished()
            && (self.router.is_ready() || !self.children.iter().any(Node::is_ready));
        if route {
            self.router.process()?;
        }
        let children = step_children(&mut self.children, !route)?;
        if self.router.status.state.is_finished() && children == Step::Drained {
            Ok(Step::Drained)
        } else {
            Ok(Step::Continue)
        }
    }
}

// ── Node ──

/// A pipeline stage: a single filter or a composite of child nodes.
pub enum Node {
    Leaf(LeafNode),
    Sequence(Sequence),
    Split(Split),
}

/// Something the executor runs on its own thread.
pub enum Worker {
    Leaf(LeafNode),
    Router(SplitRouter),
}

impl Node {
    pub fn leaf(filter: impl Into<AnyFilter>) -> Self {
        Node::Leaf(LeafNode::new(filter))
    }

    pub fn sequence(name: impl Into<String>, children: Vec<Node>) -> Self {
        Node::Sequence(Sequence::new(name, children))
    }

    pub fn split(name: impl Into<String>, mode: SplitMode, children: Vec<Node>) -> Self {
        Node::Split(Split::new(name, mode, children))
    }

    fn element(&self) -> &dyn Element {
        match self {
            Node::Leaf(n) => n,
            Node::Sequence(n) => n,
            Node::Split(n) => n,
        }
    }

    fn element_mut(&mut self) -> &mut dyn Element {
        match self {
            Node::Leaf(n) => n,
            Node::Sequence(n) => n,
            Node::Split(n) => n,
        }
    }

    /// True if the node consumes without producing (all outputs absent).
    pub fn is_sink(&self) -> bool {
        self.outputs().is_empty()
    }

    pub fn is_source(&self) -> bool {
        self.inputs().is_empty()
    }

    /// True once every worker inside the node has drained or failed.
    pub fn is_finished(&self) -> bool {
        match self {
            Node::Leaf(leaf) => leaf.state().is_finished(),
            Node::Sequence(seq) => seq.children.iter().all(Node::is_finished),
            Node::Split(split) => {
                split.router.state().is_finished() && split.children.iter().all(Node::is_finished)
            }
        }
    }

    /// True when stepping the node would not block on its inputs.
    pub fn is_ready(&self) -> bool {
        match self {
            Node::Leaf(leaf) => leaf.is_ready(),
            Node::Sequence(seq) => seq.children.iter().any(Node::is_ready),
            Node::Split(split) => split.router.is_ready() || split.children.iter().any(Node::is_ready),
        }
    }

    /// Check composite arity rules recursively.
    pub fn validate(&self) -> PipelineResult<()> {
        match self {
            Node::Leaf(_) => Ok(()),
            Node::Sequence(seq) => seq.validate(),
            Node::Split(split) => split.validate(),
        }
    }

    /// Create the queues internal to composites. Every created queue is
    /// appended to `created` so the executor can abort it.
    pub fn wire_internal(
        &mut self,
        make_queue: &dyn Fn(String) -> Arc<LinkQueue>,
        created: &mut Vec<Arc<LinkQueue>>,
    ) {
        match self {
            Node::Leaf(_) => {}
            Node::Sequence(seq) => {
                for i in 0..seq.children.len().saturating_sub(1) {
                    let ports = seq.children[i].outputs().len();
                    for port in 0..ports {
                        let name = format!(
                            "{}:{}.{}->{}",
                            seq.name,
                            seq.children[i].name(),
                            port,
                            seq.children[i + 1].name()
                        );
                        let queue = make_queue(name);
                        seq.children[i].set_output_queue(port, queue.clone());
                        seq.children[i + 1].set_input_queue(port, queue.clone());
                        created.push(queue);
                    }
                }
                for child in &mut seq.children {
                    child.wire_internal(make_queue, created);
                }
            }
            Node::Split(split) => {
                let label = split.router.status.label.clone();
                for child in &mut split.children {
                    let queue = make_queue(format!("{}->{}", label, child.name()));
                    child.set_input_queue(0, queue.clone());
                    split.router.child_inputs.push(queue.clone());
                    created.push(queue);
                }
                for child in &mut split.children {
                    child.wire_internal(make_queue, created);
                }
            }
        }
    }

    /// Attach executor services and compute contexts to every worker.
    /// `context_for` is asked once per worker, with the worker's label.
    pub fn attach(
        &mut self,
        attachment: &Attachment,
        context_for: &mut dyn FnMut(&str) -> PipelineResult<Arc<ComputeContext>>,
    ) -> PipelineResult<()> {
        match self {
            Node::Leaf(leaf) => {
                leaf.attach(attachment);
                let ctx = context_for(leaf.label())?;
                leaf.set_compute_context(ctx);
            }
            Node::Sequence(seq) => {
                for child in &mut seq.children {
                    child.attach(attachment, context_for)?;
                }
            }
            Node::Split(split) => {
                split.router.attach(attachment);
                let ctx = context_for(&split.router.status.label)?;
                split.router.set_compute_context(ctx);
                for child in &mut split.children {
                    child.attach(attachment, context_for)?;
                }
            }
        }
        Ok(())
    }

    /// Flatten into the workers that need their own thread.
    pub fn into_workers(self, workers: &mut Vec<Worker>) {
        match self {
            Node::Leaf(leaf) => workers.push(Worker::Leaf(leaf)),
            Node::Sequence(seq) => {
                for child in seq.children {
                    child.into_workers(workers);
                }
            }
            Node::Split(split) => {
                workers.push(Worker::Router(split.router));
                for child in split.children {
                    child.into_workers(workers);
                }
            }
        }
    }

    /// Indented, recursive description.
    pub fn describe_tree(&self, depth: usize) -> String {
        let mut out = String::new();
        let indent = "  ".repeat(depth);
        match self {
            Node::Leaf(leaf) => {
                let _ = writeln!(out, "{}{}", indent, leaf.describe());
            }
            Node::Sequence(seq) => {
                let _ = writeln!(out, "{}{} [sequence]", indent, seq.describe());
                for child in &seq.children {
                    out.push_str(&child.describe_tree(depth + 1));
                }
            }
            Node::Split(split) => {
                let _ = writeln!(out, "{}{}", indent, split.router.describe());
                for child in &split.children {
                    out.push_str(&child.describe_tree(depth + 1));
                }
            }
        }
        out
    }
}

impl Element for Node {
    fn name(&self) -> &str {
        self.element().name()
    }

    fn inputs(&self) -> Vec<PortDescriptor> {
        self.element().inputs()
    }

    fn outputs(&self) -> Vec<PortDescriptor> {
        self.element().outputs()
    }

    fn set_input_queue(&mut self, port: usize, queue: Arc<LinkQueue>) {
        self.element_mut().set_input_queue(port, queue);
    }

    fn set_output_queue(&mut self, port: usize, queue: Arc<LinkQueue>) {
        self.element_mut().set_output_queue(port, queue);
    }

    fn input_queue(&self, port: usize) -> Option<Arc<LinkQueue>> {
        self.element().input_queue(port)
    }

    fn output_queue(&self, port: usize) -> Option<Arc<LinkQueue>> {
        self.element().output_queue(port)
    }

    fn set_compute_context(&mut self, ctx: Arc<ComputeContext>) {
        self.element_mut().set_compute_context(ctx);
    }

    fn compute_context(&self) -> Option<Arc<ComputeContext>> {
        self.element().compute_context()
    }

    fn process(&mut self) -> PipelineResult<Step> {
        self.element_mut().process()
    }

    fn describe(&self) -> String {
        self.element().describe()
    }

    fn print(&self) {
        for line in self.describe_tree(0).lines() {
            tracing::info!("{}", line);
        }
    }
}

impl Worker {
    pub fn label(&self) -> &str {
        match self {
            Worker::Leaf(leaf) => leaf.label(),
            Worker::Router(router) => &router.status.label,
        }
    }

    pub fn node_id(&self) -> NodeId {
        match self {
            Worker::Leaf(leaf) => leaf.status.id,
            Worker::Router(router) => router.status.id,
        }
    }

    pub fn is_sink(&self) -> bool {
        match self {
            Worker::Leaf(leaf) => leaf.is_sink(),
            Worker::Router(_) => false,
        }
    }

    pub(crate) fn status_mut(&mut self) -> &mut NodeStatus {
        match self {
            Worker::Leaf(leaf) => &mut leaf.status,
            Worker::Router(router) => &mut router.status,
        }
    }

    pub(crate) fn stats(&self) -> &NodeStats {
        match self {
            Worker::Leaf(leaf) => &leaf.stats,
            Worker::Router(router) => &router.stats,
        }
    }

    pub(crate) fn close_outputs(&self) {
        match self {
            Worker::Leaf(leaf) => leaf.close_outputs(),
            Worker::Router(router) => router.close_outputs(),
        }
    }

    pub(crate) fn teardown(&mut self) -> PipelineResult<()> {
        match self {
            Worker::Leaf(leaf) => leaf.teardown(),
            Worker::Router(_) => Ok(()),
        }
    }

    pub fn process(&mut self) -> PipelineResult<Step> {
        match self {
            Worker::Leaf(leaf) => leaf.process(),
            Worker::Router(router) => router.process(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::nodes::{FrameSource, Pattern};

    struct Doubler;

    static DOUBLER_PORTS: &[PortDescriptor] = &[
        PortDescriptor::input("in", None),
        PortDescriptor::output("out", None),
    ];

    impl Filter for Doubler {
        fn name(&self) -> &str {
            "doubler"
        }

        fn ports(&self) -> &[PortDescriptor] {
            DOUBLER_PORTS
        }

        fn initialize(&mut self, inputs: &[Buffer], _ctx: &ComputeContext) -> PipelineResult<Vec<Dims>> {
            Ok(vec![inputs[0].dims().clone()])
        }

        fn process(&mut self, io: &mut ProcessContext<'_>) -> PipelineResult<Flow> {
            let src = io.inputs[0].host_array(io.compute)?.to_vec();
            let dst = io.outputs[0].host_array_mut(io.compute)?;
            for (d, s) in dst.iter_mut().zip(src) {
                *d = s * 2.0;
            }
            Ok(Flow::Emit)
        }
    }

    fn bound_leaf(filter: impl Into<AnyFilter>) -> LeafNode {
        let mut leaf = LeafNode::new(filter);
        leaf.set_compute_context(Arc::new(ComputeContext::new("test")));
        leaf
    }

    #[test]
    fn test_leaf_arity_from_filter() {
        let leaf = LeafNode::plugin(Doubler);
        assert_eq!(leaf.inputs().len(), 1);
        assert_eq!(leaf.outputs().len(), 1);
        assert_eq!(leaf.state(), NodeState::Unstarted);
        assert!(leaf.input_queue(0).is_none());
        assert!(leaf.input_queue(5).is_none());
    }

    #[test]
    fn test_set_queue_on_missing_port_is_noop() {
        let mut leaf = LeafNode::new(FrameSource::new(1, 2, 2, Pattern::Constant(1.0)));
        leaf.set_input_queue(0, Arc::new(LinkQueue::unbounded("q")));
        assert!(leaf.input_queue(0).is_none());
    }

    #[test]
    fn test_transform_step_by_step() {
        let mut leaf = bound_leaf(AnyFilter::plugin(Doubler));
        let input = Arc::new(LinkQueue::unbounded("in"));
        let output = Arc::new(LinkQueue::unbounded("out"));
        leaf.set_input_queue(0, input.clone());
        leaf.set_output_queue(0, output.clone());

        let mut frame = Buffer::from_vec(Dims::d2(2, 1), vec![1.0, 2.0]).unwrap();
        frame.sequence = 9;
        input.push(frame).unwrap();
        input.close();

        assert_eq!(leaf.process().unwrap(), Step::Continue);
        assert_eq!(leaf.state(), NodeState::Running);
        assert_eq!(leaf.output_dims(), &[Dims::d2(2, 1)]);

        assert_eq!(leaf.process().unwrap(), Step::Drained);
        assert_eq!(leaf.state(), NodeState::Drained);
        assert!(output.is_closed());

        let ctx = ComputeContext::new("check");
        let mut out = output.pop().unwrap().unwrap();
        assert_eq!(out.sequence, 9);
        assert_eq!(out.host_array(&ctx).unwrap(), &[2.0, 4.0]);
        assert!(output.pop().unwrap().is_none());
        assert_eq!(leaf.stats().iterations, 1);
    }

    #[test]
    fn test_source_emits_then_drains() {
        let mut leaf = bound_leaf(FrameSource::new(2, 4, 4, Pattern::Ramp));
        let output = Arc::new(LinkQueue::unbounded("out"));
        leaf.set_output_queue(0, output.clone());

        assert_eq!(leaf.process().unwrap(), Step::Continue);
        assert_eq!(leaf.process().unwrap(), Step::Continue);
        assert_eq!(leaf.process().unwrap(), Step::Drained);
        assert_eq!(output.pop().unwrap().unwrap().sequence, 0);
        assert_eq!(output.pop().unwrap().unwrap().sequence, 1);
        assert!(output.pop().unwrap().is_none());
    }

    #[test]
    fn test_missing_context_is_device_error() {
        let mut leaf = LeafNode::new(FrameSource::new(1, 1, 1, Pattern::Ramp));
        assert!(matches!(leaf.process(), Err(PipelineError::Device(_))));
    }

    fn frames(values: &[f32]) -> Arc<LinkQueue> {
        let queue = Arc::new(LinkQueue::unbounded("in"));
        for (i, &v) in values.iter().enumerate() {
            let mut frame = Buffer::from_vec(Dims::d2(1, 1), vec![v]).unwrap();
            frame.sequence = i as u64;
            queue.push(frame).unwrap();
        }
        queue.close();
        queue
    }

    fn values(queue: &LinkQueue) -> Vec<f32> {
        let ctx = ComputeContext::new("check");
        let mut out = Vec::new();
        while let Some(mut buffer) = queue.pop().unwrap() {
            out.push(buffer.host_array(&ctx).unwrap()[0]);
        }
        out
    }

    #[test]
    fn test_sequence_driven_by_hand_runs_to_completion() {
        let mut node = Node::sequence(
            "chain",
            vec![Node::Leaf(LeafNode::plugin(Doubler)), Node::Leaf(LeafNode::plugin(Doubler))],
        );
        assert_eq!(node.inputs().len(), 1);
        assert_eq!(node.outputs().len(), 1);

        let mut created = Vec::new();
        node.wire_internal(&|name| Arc::new(LinkQueue::bounded(name, 1)), &mut created);
        assert_eq!(created.len(), 1);

        let input = frames(&[1.0, 2.0, 3.0]);
        let output = Arc::new(LinkQueue::unbounded("out"));
        node.set_input_queue(0, input.clone());
        node.set_output_queue(0, output.clone());
        node.set_compute_context(Arc::new(ComputeContext::new("test")));
        assert!(node.input_queue(0).is_some());
        assert!(node.output_queue(0).is_some());

        let mut steps = 0;
        while node.process().unwrap() == Step::Continue {
            steps += 1;
            assert!(steps < 20, "sequence never drained");
        }
        assert!(node.is_finished());
        assert!(output.is_closed());
        assert_eq!(values(&output), vec![4.0, 8.0, 12.0]);
        assert_eq!(node.process().unwrap(), Step::Drained);
    }

    #[test]
    fn test_split_driven_by_hand_feeds_children() {
        let mut node = Node::split(
            "fan",
            SplitMode::Broadcast,
            vec![Node::Leaf(LeafNode::plugin(Doubler)), Node::Leaf(LeafNode::plugin(Doubler))],
        );
        let mut created = Vec::new();
        node.wire_internal(&|name| Arc::new(LinkQueue::bounded(name, 1)), &mut created);

        let left = Arc::new(LinkQueue::unbounded("left"));
        let right = Arc::new(LinkQueue::unbounded("right"));
        node.set_input_queue(0, frames(&[1.0, 5.0]));
        node.set_output_queue(0, left.clone());
        node.set_output_queue(1, right.clone());
        node.set_compute_context(Arc::new(ComputeContext::new("test")));

        let mut steps = 0;
        while node.process().unwrap() == Step::Continue {
            steps += 1;
            assert!(steps < 20, "split never drained");
        }
        assert!(node.is_finished());
        assert_eq!(values(&left), vec![2.0, 10.0]);
        assert_eq!(values(&right), vec![2.0, 10.0]);
    }

    #[test]
    fn test_sequence_arity_mismatch() {
        let node = Node::sequence(
            "bad",
            vec![
                Node::leaf(FrameSource::new(1, 1, 1, Pattern::Ramp)),
                Node::leaf(FrameSource::new(1, 1, 1, Pattern::Ramp)),
            ],
        );
        assert!(matches!(node.validate(), Err(PipelineError::PortMismatch(_))));
    }

    #[test]
    fn test_split_output_mapping() {
        let split = Split::broadcast(
            "fan",
            vec![Node::Leaf(LeafNode::plugin(Doubler)), Node::Leaf(LeafNode::plugin(Doubler))],
        );
        assert_eq!(split.outputs().len(), 2);
        assert_eq!(split.locate_output(0), Some((0, 0)));
        assert_eq!(split.locate_output(1), Some((1, 0)));
        assert_eq!(split.locate_output(2), None);
    }

    #[test]
    fn test_split_router_broadcast_and_round_robin() {
        for (mode, expected) in [(SplitMode::Broadcast, [2u64, 2]), (SplitMode::RoundRobin, [1, 1])] {
            let mut node = Node::split(
                "fan",
                mode,
                vec![Node::Leaf(LeafNode::plugin(Doubler)), Node::Leaf(LeafNode::plugin(Doubler))],
            );
            let mut created = Vec::new();
            node.wire_internal(&|name| Arc::new(LinkQueue::unbounded(name)), &mut created);
            assert_eq!(created.len(), 2);

            let input = Arc::new(LinkQueue::unbounded("in"));
            node.set_input_queue(0, input.clone());
            node.set_compute_context(Arc::new(ComputeContext::new("test")));
            input.push(Buffer::new(Dims::d2(1, 1))).unwrap();
            input.push(Buffer::new(Dims::d2(1, 1))).unwrap();
            input.close();

            while node.process().unwrap() == Step::Continue {}
            assert_eq!([created[0].pushed(), created[1].pushed()], expected);
            assert!(created.iter().all(|q| q.is_closed()));
        }
    }

    #[test]
    fn test_into_workers_flattens_composites() {
        let node = Node::sequence(
            "outer",
            vec![
                Node::leaf(FrameSource::new(1, 1, 1, Pattern::Ramp)),
                Node::split(
                    "fan",
                    SplitMode::Broadcast,
                    vec![Node::Leaf(LeafNode::plugin(Doubler)), Node::Leaf(LeafNode::plugin(Doubler))],
                ),
            ],
        );
        node.validate().unwrap();
        let mut workers = Vec::new();
        node.into_workers(&mut workers);
        let labels: Vec<_> = workers.iter().map(|w| w.label().to_string()).collect();
        assert_eq!(labels, vec!["frame-source", "fan", "doubler", "doubler"]);
    }
}
