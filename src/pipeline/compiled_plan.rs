//! Output of `GraphCompiler`.

use crate::pipeline::id::{NodeId, PortId};
use serde::{Deserialize, Serialize};

/// Validated execution plan for a graph.
#[derive(Debug, Clone, Default)]
pub struct CompiledPlan {
    /// Every node in topological order (producers before consumers).
    pub order: Vec<NodeId>,

    /// Nodes without input ports.
    pub sources: Vec<NodeId>,

    /// Nodes without output ports.
    pub sinks: Vec<NodeId>,

    /// Nodes from which no sink is reachable. They still run, but everything
    /// they produce is discarded.
    pub dead_nodes: Vec<NodeId>,

    /// Output ports with no downstream edge; their buffers are discarded.
    pub dangling_outputs: Vec<PortId>,

    /// Compilation statistics
    pub stats: PlanStats,
}

/// Statistics about the compiled plan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStats {
    pub total_nodes: usize,
    pub total_edges: usize,
    pub source_nodes: usize,
    pub sink_nodes: usize,
    /// Compilation time in microseconds
    pub compile_time_us: u64,
}

impl CompiledPlan {
    /// Position of `node` in the execution order.
    pub fn rank_of(&self, node: NodeId) -> Option<usize> {
        self.order.iter().position(|&n| n == node)
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
