//! Nodes with a fixed-count input port: the port is read once and its buffer
//! is reused for every frame on the streaming port.

mod common;

use common::mock_helpers::{DarkSubtract, ReplaySource};
use tomoflow::config::EngineConfig;
use tomoflow::pipeline::nodes::CollectSink;
use tomoflow::pipeline::{AnyFilter, Dims, Graph, NodeState};

fn graph() -> Graph {
    let mut config = EngineConfig::default();
    config.queue.capacity = 1;
    Graph::new(config)
}

#[test]
fn test_dark_frame_is_read_once_and_reused() {
    let mut graph = graph();
    let (sink, frames) = CollectSink::new();
    let stream: Vec<Vec<f32>> = (0..5).map(|i| vec![i as f32; 4]).collect();
    let a = graph.add_leaf(AnyFilter::plugin(ReplaySource::new(Dims::d2(2, 2), stream)));
    let b = graph.add_leaf(AnyFilter::plugin(ReplaySource::new(
        Dims::d2(2, 2),
        vec![vec![1.0, 1.0, 2.0, 2.0]],
    )));
    let sub = graph.add_leaf(AnyFilter::plugin(DarkSubtract));
    let out = graph.add_leaf(sink);
    graph.connect(a, 0, sub, 0).unwrap();
    graph.connect(b, 0, sub, 1).unwrap();
    graph.link(sub, out).unwrap();

    let report = graph.run().unwrap();
    assert!(report.is_terminated(), "{:?}", report);

    let frames = common::collected(&frames);
    assert_eq!(frames.len(), 5);
    let sequences: Vec<u64> = frames.iter().map(|f| f.sequence).collect();
    assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
    for (i, frame) in frames.iter().enumerate() {
        let v = i as f32;
        assert_eq!(frame.try_host().unwrap(), &[v - 1.0, v - 1.0, v - 2.0, v - 2.0]);
    }

    let worker = report.worker("dark-subtract").unwrap();
    assert_eq!(worker.state, NodeState::Terminated);
    // Five stream frames plus the single dark frame.
    assert_eq!(worker.stats.frames_in, 6);
    assert_eq!(worker.stats.iterations, 5);
}

#[test]
fn test_mismatched_dark_frame_produces_no_output() {
    let mut graph = graph();
    let (sink, frames) = CollectSink::new();
    let stream: Vec<Vec<f32>> = (0..3).map(|i| vec![i as f32; 4]).collect();
    let a = graph.add_leaf(AnyFilter::plugin(ReplaySource::new(Dims::d2(2, 2), stream)));
    let b = graph.add_leaf(AnyFilter::plugin(ReplaySource::new(
        Dims::d2(3, 1),
        vec![vec![0.0; 3]],
    )));
    let sub = graph.add_leaf(AnyFilter::plugin(DarkSubtract));
    let out = graph.add_leaf(sink);
    graph.connect(a, 0, sub, 0).unwrap();
    graph.connect(b, 0, sub, 1).unwrap();
    graph.link(sub, out).unwrap();

    let report = graph.run().unwrap();
    assert!(report.is_terminated(), "{:?}", report);
    assert!(common::collected(&frames).is_empty());
    assert_eq!(report.diagnostics.len(), 1);
}
