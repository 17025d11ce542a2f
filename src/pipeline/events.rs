//! Messages from running workers to the executor and its observers.
//!
//! Workers report state changes and errors through a crossbeam channel; the
//! executor reacts to fatal errors and forwards every event to subscribers.

use crate::pipeline::id::{EdgeId, NodeId};
use crate::pipeline::node::NodeState;
use serde::{Deserialize, Serialize};

/// Event emitted while a graph runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecutorEvent {
    /// A worker moved to a new lifecycle state.
    StateChanged {
        node: NodeId,
        label: String,
        state: NodeState,
    },

    /// A worker hit an error. Non-fatal errors leave the graph running.
    NodeError {
        node: NodeId,
        label: String,
        message: String,
        fatal: bool,
    },

    /// A worker thread returned.
    WorkerExited {
        node: NodeId,
        label: String,
        state: NodeState,
    },

    /// Every queue was aborted; workers are unwinding.
    Aborted { reason: String },
}

impl ExecutorEvent {
    pub fn is_fatal_error(&self) -> bool {
        matches!(self, ExecutorEvent::NodeError { fatal: true, .. })
    }
}

/// Snapshot of a single top-level node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub name: String,
    /// `"leaf"`, `"sequence"` or `"split"`.
    pub kind: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

/// Snapshot of a single edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeSnapshot {
    pub id: EdgeId,
    pub from_node: NodeId,
    pub from_port: usize,
    pub to_node: NodeId,
    pub to_port: usize,
}

/// Complete topology of a graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopologySnapshot {
    pub nodes: Vec<NodeSnapshot>,
    pub edges: Vec<EdgeSnapshot>,
}
