//! Streaming node pipeline for frame processing.
//!
//! Frames flow through a graph of nodes connected by bounded queues. Each leaf
//! node wraps a `Filter` and runs on its own worker thread; composites
//! (`Sequence`, `Split`) are expanded into their children when the graph starts.
//!
//! # Architecture
//!
//! ```text
//! [FrameSource] ──► [RegionOfInterest] ──► [Monitor] ──► [PipeOutput]
//!        │                                          └──► (or CollectSink)
//!   LinkQueue per edge, ComputeContext per graph or per node
//! ```
//!
//! # Design
//!
//! - **Enum dispatch on hot path**: `BuiltinFilter` enum for built-in filters,
//!   `Box<dyn Filter>` for plugins.
//! - **Single ownership of buffers**: a `Buffer` moves producer → queue →
//!   consumer; fan-out duplicates explicitly.
//! - **Explicit residency**: host/device copies migrate only through a
//!   `ComputeContext`, which serializes device commands.
//! - **Thread per node**: workers block only in queue `push`/`pop` and in
//!   synchronous migrations; `abort` wakes every one of them.

pub mod buffer;
pub mod compiled_plan;
pub mod compiler;
pub mod compute;
pub mod error;
pub mod events;
pub mod executor;
pub mod id;
pub mod node;
pub mod node_type;
pub mod nodes;
pub mod port;
pub mod properties;
pub mod queue;
pub mod registry;

pub use buffer::{Buffer, BufferPool, Dims, PoolStats, Residency};
pub use compiled_plan::{CompiledPlan, PlanStats};
pub use compiler::GraphCompiler;
pub use compute::{BackendKind, ComputeContext, ComputeStats, DeviceBackend, DeviceMemory};
pub use error::{PipelineError, PipelineResult};
pub use events::{EdgeSnapshot, ExecutorEvent, NodeSnapshot, TopologySnapshot};
pub use executor::{
    AbortHandle, Edge, Graph, GraphState, RunReport, RunningGraph, WorkerReport,
};
pub use id::{ContextId, EdgeId, NodeId, PortId};
pub use node::{
    AnyFilter, BuiltinFilter, Element, Filter, Flow, LeafNode, Node, NodeState, NodeStats,
    ProcessContext, Sequence, Split, SplitMode, Step,
};
pub use node_type::NodeType;
pub use port::{Arity, InputCardinality, PortDescriptor, PortDirection};
pub use properties::{ConfigValue, Properties};
pub use queue::{LinkError, LinkQueue};
pub use registry::FilterRegistry;
