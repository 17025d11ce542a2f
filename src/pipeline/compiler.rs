use super::compiled_plan::{CompiledPlan, PlanStats};
use super::error::{PipelineError, PipelineResult};
use super::executor::Edge;
use super::id::{NodeId, PortId};
use super::node::{Element, Node};
use std::collections::VecDeque;

/// Validates a graph and orders it for execution.
pub struct GraphCompiler;

impl GraphCompiler {
    /// Compile a graph into an execution plan.
    ///
    /// Checks, in order: every edge names existing ports, every output feeds at
    /// most one edge, every input is bound exactly once, connected ports agree
    /// on rank, composites are well formed, and the graph is acyclic.
    pub fn compile(nodes: &[Node], edges: &[Edge]) -> PipelineResult<CompiledPlan> {
        let start_time = std::time::Instant::now();
        let n = nodes.len();

        for node in nodes {
            node.validate()?;
        }
        Self::validate_edges(nodes, edges)?;

        let (fwd_adj, bwd_adj) = Self::build_adjacency(n, edges);
        let order = Self::topological_sort(&fwd_adj)?;

        let sources: Vec<usize> = (0..n).filter(|&i| nodes[i].is_source()).collect();
        let sinks: Vec<usize> = (0..n).filter(|&i| nodes[i].is_sink()).collect();

        let feeds_sink = Self::backward_reachability(&sinks, &bwd_adj, n);
        let dead_nodes: Vec<NodeId> = (0..n)
            .filter(|&i| !feeds_sink[i])
            .map(|i| NodeId(i as u32))
            .collect();
        for &id in &dead_nodes {
            tracing::warn!("Node {} ({}) does not reach any sink", id, nodes[id.index()].name());
        }

        let dangling_outputs = Self::dangling_outputs(nodes, edges);
        for port in &dangling_outputs {
            tracing::debug!("Output {:?} is not connected; its buffers are discarded", port);
        }

        let stats = PlanStats {
            total_nodes: n,
            total_edges: edges.len(),
            source_nodes: sources.len(),
            sink_nodes: sinks.len(),
            compile_time_us: start_time.elapsed().as_micros() as u64,
        };

        let to_ids = |v: Vec<usize>| v.into_iter().map(|i| NodeId(i as u32)).collect();
        Ok(CompiledPlan {
            order: to_ids(order),
            sources: to_ids(sources),
            sinks: to_ids(sinks),
            dead_nodes,
            dangling_outputs,
            stats,
        })
    }

    fn validate_edges(nodes: &[Node], edges: &[Edge]) -> PipelineResult<()> {
        let n = nodes.len();
        let outputs: Vec<_> = nodes.iter().map(Node::outputs).collect();
        let inputs: Vec<_> = nodes.iter().map(Node::inputs).collect();
        let mut output_bound: Vec<Vec<bool>> = outputs.iter().map(|p| vec![false; p.len()]).collect();
        let mut input_bound: Vec<Vec<bool>> = inputs.iter().map(|p| vec![false; p.len()]).collect();

        for edge in edges {
            let (from, to) = (edge.from.node.index(), edge.to.node.index());
            if from >= n || to >= n {
                return Err(PipelineError::InvalidEdge(format!(
                    "edge {:?} references a missing node",
                    edge.id
                )));
            }
            let out_port = outputs[from].get(edge.from.port).ok_or_else(|| {
                PipelineError::InvalidEdge(format!(
                    "{} has no output port {}",
                    nodes[from].name(),
                    edge.from.port
                ))
            })?;
            let in_port = inputs[to].get(edge.to.port).ok_or_else(|| {
                PipelineError::InvalidEdge(format!(
                    "{} has no input port {}",
                    nodes[to].name(),
                    edge.to.port
                ))
            })?;

            if std::mem::replace(&mut output_bound[from][edge.from.port], true) {
                return Err(PipelineError::InvalidEdge(format!(
                    "output {:?} already feeds another edge; use a split to fan out",
                    edge.from
                )));
            }
            if std::mem::replace(&mut input_bound[to][edge.to.port], true) {
                return Err(PipelineError::InvalidEdge(format!(
                    "input {:?} is bound twice",
                    edge.to
                )));
            }

            if let (Some(produced), Some(expected)) = (out_port.rank, in_port.rank) {
                if produced != expected {
                    return Err(PipelineError::PortMismatch(format!(
                        "{}.{} produces rank {} but {}.{} expects rank {}",
                        nodes[from].name(),
                        out_port.name,
                        produced,
                        nodes[to].name(),
                        in_port.name,
                        expected
                    )));
                }
            }
        }

        for (node, bound) in input_bound.iter().enumerate() {
            if let Some(port) = bound.iter().position(|b| !b) {
                return Err(PipelineError::PortMismatch(format!(
                    "input '{}' of {} is not connected",
                    inputs[node][port].name,
                    nodes[node].name()
                )));
            }
        }
        Ok(())
    }

    /// Build forward and backward adjacency lists
    fn build_adjacency(n: usize, edges: &[Edge]) -> (Vec<Vec<usize>>, Vec<Vec<usize>>) {
        let mut fwd_adj = vec![Vec::new(); n];
        let mut bwd_adj = vec![Vec::new(); n];
        for edge in edges {
            let from = edge.from.node.index();
            let to = edge.to.node.index();
            fwd_adj[from].push(to);
            bwd_adj[to].push(from);
        }
        (fwd_adj, bwd_adj)
    }

    /// Kahn's algorithm; fails if any node is left over.
    fn topological_sort(adj: &[Vec<usize>]) -> PipelineResult<Vec<usize>> {
        let n = adj.len();
        let mut in_degree = vec![0usize; n];
        for targets in adj {
            for &t in targets {
                in_degree[t] += 1;
            }
        }

        let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut result = Vec::with_capacity(n);
        while let Some(node) = queue.pop_front() {
            result.push(node);
            for &neighbor in &adj[node] {
                in_degree[neighbor] -= 1;
                if in_degree[neighbor] == 0 {
                    queue.push_back(neighbor);
                }
            }
        }

        if result.len() != n {
            return Err(PipelineError::CycleDetected);
        }
        Ok(result)
    }

    /// Backward reachability from sinks using DFS
    fn backward_reachability(sinks: &[usize], bwd_adj: &[Vec<usize>], n: usize) -> Vec<bool> {
        let mut reachable = vec![false; n];
        let mut stack = Vec::new();
        for &sink in sinks {
            reachable[sink] = true;
            stack.push(sink);
        }
        while let Some(node) = stack.pop() {
            for &neighbor in &bwd_adj[node] {
                if !reachable[neighbor] {
                    reachable[neighbor] = true;
                    stack.push(neighbor);
                }
            }
        }
        reachable
    }

    fn dangling_outputs(nodes: &[Node], edges: &[Edge]) -> Vec<PortId> {
        let mut dangling = Vec::new();
        for (i, node) in nodes.iter().enumerate() {
            let id = NodeId(i as u32);
            for port in 0..node.outputs().len() {
                let target = PortId::new(id, port);
                if !edges.iter().any(|e| e.from == target) {
                    dangling.push(target);
                }
            }
        }
        dangling
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::id::EdgeId;
    use crate::pipeline::node::SplitMode;
    use crate::pipeline::nodes::{CollectSink, FrameSource, Monitor, Pattern, RegionOfInterest};

    fn source() -> Node {
        Node::leaf(FrameSource::new(1, 4, 4, Pattern::Ramp))
    }

    fn monitor() -> Node {
        Node::leaf(Monitor::new(1))
    }

    fn sink() -> Node {
        Node::leaf(CollectSink::new().0)
    }

    fn edge(id: u32, from: u32, from_port: usize, to: u32, to_port: usize) -> Edge {
        Edge {
            id: EdgeId(id),
            from: PortId::new(NodeId(from), from_port),
            to: PortId::new(NodeId(to), to_port),
        }
    }

    #[test]
    fn test_linear_order() {
        // Declared out of order: sink, monitor, source.
        let nodes = vec![sink(), monitor(), source()];
        let edges = vec![edge(0, 2, 0, 1, 0), edge(1, 1, 0, 0, 0)];
        let plan = GraphCompiler::compile(&nodes, &edges).unwrap();
        assert_eq!(plan.order, vec![NodeId(2), NodeId(1), NodeId(0)]);
        assert_eq!(plan.sources, vec![NodeId(2)]);
        assert_eq!(plan.sinks, vec![NodeId(0)]);
        assert!(plan.dead_nodes.is_empty());
        assert!(plan.dangling_outputs.is_empty());
        assert_eq!(plan.stats.total_edges, 2);
    }

    #[test]
    fn test_cycle_detected() {
        let nodes = vec![monitor(), monitor()];
        let edges = vec![edge(0, 0, 0, 1, 0), edge(1, 1, 0, 0, 0)];
        assert!(matches!(
            GraphCompiler::compile(&nodes, &edges),
            Err(PipelineError::CycleDetected)
        ));
    }

    #[test]
    fn test_unbound_input_rejected() {
        let nodes = vec![source(), monitor(), sink()];
        let edges = vec![edge(0, 0, 0, 2, 0)];
        assert!(matches!(
            GraphCompiler::compile(&nodes, &edges),
            Err(PipelineError::PortMismatch(_))
        ));
    }

    #[test]
    fn test_missing_port_rejected() {
        let nodes = vec![source(), sink()];
        let edges = vec![edge(0, 0, 3, 1, 0)];
        assert!(matches!(
            GraphCompiler::compile(&nodes, &edges),
            Err(PipelineError::InvalidEdge(_))
        ));
        let edges = vec![edge(0, 0, 0, 7, 0)];
        assert!(matches!(
            GraphCompiler::compile(&nodes, &edges),
            Err(PipelineError::InvalidEdge(_))
        ));
    }

    #[test]
    fn test_fan_out_without_split_rejected() {
        let nodes = vec![source(), sink(), sink()];
        let edges = vec![edge(0, 0, 0, 1, 0), edge(1, 0, 0, 2, 0)];
        assert!(matches!(
            GraphCompiler::compile(&nodes, &edges),
            Err(PipelineError::InvalidEdge(_))
        ));
    }

    #[test]
    fn test_rank_mismatch_rejected() {
        struct Volume;
        static PORTS: &[crate::pipeline::port::PortDescriptor] =
            &[crate::pipeline::port::PortDescriptor::output("out", Some(3))];
        impl crate::pipeline::node::Filter for Volume {
            fn name(&self) -> &str {
                "volume"
            }
            fn ports(&self) -> &[crate::pipeline::port::PortDescriptor] {
                PORTS
            }
            fn initialize(
                &mut self,
                _inputs: &[crate::pipeline::buffer::Buffer],
                _ctx: &crate::pipeline::compute::ComputeContext,
            ) -> PipelineResult<Vec<crate::pipeline::buffer::Dims>> {
                Ok(vec![crate::pipeline::buffer::Dims::new(&[2, 2, 2])])
            }
            fn process(
                &mut self,
                _io: &mut crate::pipeline::node::ProcessContext<'_>,
            ) -> PipelineResult<crate::pipeline::node::Flow> {
                Ok(crate::pipeline::node::Flow::Finished)
            }
        }

        let nodes = vec![
            Node::Leaf(crate::pipeline::node::LeafNode::plugin(Volume)),
            Node::leaf(RegionOfInterest::new(0, 0, 1, 1).unwrap()),
            sink(),
        ];
        let edges = vec![edge(0, 0, 0, 1, 0), edge(1, 1, 0, 2, 0)];
        assert!(matches!(
            GraphCompiler::compile(&nodes, &edges),
            Err(PipelineError::PortMismatch(_))
        ));
    }

    #[test]
    fn test_dead_nodes_and_dangling_outputs() {
        // [source] -> [monitor] -> (nothing), [source] -> [sink]
        let nodes = vec![source(), monitor(), source(), sink()];
        let edges = vec![edge(0, 0, 0, 1, 0), edge(1, 2, 0, 3, 0)];
        let plan = GraphCompiler::compile(&nodes, &edges).unwrap();
        assert_eq!(plan.dead_nodes, vec![NodeId(0), NodeId(1)]);
        assert_eq!(plan.dangling_outputs, vec![PortId::new(NodeId(1), 0)]);
    }

    #[test]
    fn test_split_ports_counted() {
        let split = Node::split("fan", SplitMode::Broadcast, vec![monitor(), monitor()]);
        let nodes = vec![source(), split, sink(), sink()];
        let edges = vec![edge(0, 0, 0, 1, 0), edge(1, 1, 0, 2, 0), edge(2, 1, 1, 3, 0)];
        let plan = GraphCompiler::compile(&nodes, &edges).unwrap();
        assert_eq!(plan.order.len(), 4);
        assert_eq!(plan.rank_of(NodeId(0)), Some(0));
    }

    #[test]
    fn test_empty_split_rejected() {
        let nodes = vec![Node::split("fan", SplitMode::Broadcast, Vec::new())];
        assert!(matches!(
            GraphCompiler::compile(&nodes, &[]),
            Err(PipelineError::PortMismatch(_))
        ));
    }
}
