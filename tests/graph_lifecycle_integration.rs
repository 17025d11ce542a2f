//! End-to-end lifecycle of a running graph: termination, cancellation and
//! error propagation.

mod common;

use common::mock_helpers::{CountingFilter, FailingFilter};
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;
use tomoflow::config::EngineConfig;
use tomoflow::pipeline::nodes::{CollectSink, FrameSource, Pattern};
use tomoflow::pipeline::{
    AnyFilter, ExecutorEvent, Graph, GraphState, NodeState, PipelineError,
};

fn graph_with_capacity(capacity: usize) -> Graph {
    let mut config = EngineConfig::default();
    config.queue.capacity = capacity;
    Graph::new(config)
}

#[test]
fn test_three_frames_three_process_calls() {
    let mut graph = graph_with_capacity(1);
    let (counter, calls) = CountingFilter::new();
    let (sink, frames) = CollectSink::new();
    let src = graph.add_leaf(FrameSource::new(3, 16, 16, Pattern::Ramp));
    let mid = graph.add_leaf(AnyFilter::plugin(counter));
    let out = graph.add_leaf(sink);
    graph.link(src, mid).unwrap();
    graph.link(mid, out).unwrap();

    let running = graph.start().unwrap();
    assert_eq!(running.worker_count(), 3);
    let report = running.wait();

    assert_eq!(report.state, GraphState::Terminated);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(common::collected(&frames).len(), 3);
    assert_eq!(report.workers.len(), 3);
    assert!(report
        .workers
        .iter()
        .all(|w| w.state == NodeState::Terminated && w.error.is_none()));
    assert!(report.errors.is_empty());
}

#[test]
fn test_events_report_every_worker_exit() {
    let mut graph = graph_with_capacity(2);
    let events = graph.subscribe();
    let (sink, _frames) = CollectSink::new();
    let src = graph.add_leaf(FrameSource::new(2, 4, 4, Pattern::Constant(1.0)));
    let out = graph.add_leaf(sink);
    graph.link(src, out).unwrap();

    let report = graph.run().unwrap();
    assert!(report.is_terminated());

    let exits: Vec<_> = common::drain_events(&events)
        .into_iter()
        .filter_map(|e| match e {
            ExecutorEvent::WorkerExited { label, state, .. } => Some((label, state)),
            _ => None,
        })
        .collect();
    assert_eq!(exits.len(), 2);
    assert!(exits.iter().all(|(_, state)| *state == NodeState::Terminated));
}

#[test]
fn test_abort_stops_endless_source() {
    let mut graph = graph_with_capacity(2);
    let (sink, _frames) = CollectSink::new();
    let src = graph.add_leaf(FrameSource::new(u64::MAX, 8, 8, Pattern::Ramp));
    let out = graph.add_leaf(sink);
    graph.link(src, out).unwrap();

    let running = graph.start().unwrap();
    let handle = running.abort_handle();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        handle.abort();
    });
    let report = running.wait();
    canceller.join().unwrap();

    assert_eq!(report.state, GraphState::Aborted);
    assert_eq!(report.abort_reason.as_deref(), Some("cancelled by operator"));
    assert!(report.worker("frame-source").is_some());
    assert!(matches!(report.into_result(), Err(PipelineError::Aborted(_))));
}

#[test]
fn test_fatal_error_aborts_graph() {
    let mut graph = graph_with_capacity(1);
    let events = graph.subscribe();
    let (sink, _frames) = CollectSink::new();
    let src = graph.add_leaf(FrameSource::new(u64::MAX, 8, 8, Pattern::Ramp));
    let bad = graph.add_leaf(AnyFilter::plugin(FailingFilter::new(2, || {
        PipelineError::Device("kernel launch failed".into())
    })));
    let out = graph.add_leaf(sink);
    graph.link(src, bad).unwrap();
    graph.link(bad, out).unwrap();

    let report = graph.run().unwrap();
    assert_eq!(report.state, GraphState::Aborted);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].contains("kernel launch failed"));
    assert_eq!(report.worker("failing").unwrap().state, NodeState::Failed);

    let events = common::drain_events(&events);
    assert!(events.iter().any(ExecutorEvent::is_fatal_error));
    assert!(events
        .iter()
        .any(|e| matches!(e, ExecutorEvent::Aborted { .. })));
}

#[test]
fn test_recoverable_error_skips_one_frame() {
    let mut graph = graph_with_capacity(2);
    let (sink, frames) = CollectSink::new();
    let src = graph.add_leaf(FrameSource::new(4, 8, 8, Pattern::Ramp));
    let flaky = graph.add_leaf(AnyFilter::plugin(FailingFilter::new(1, || {
        PipelineError::Shape("odd frame".into())
    })));
    let out = graph.add_leaf(sink);
    graph.link(src, flaky).unwrap();
    graph.link(flaky, out).unwrap();

    let report = graph.run().unwrap();
    assert!(report.is_terminated(), "{:?}", report);
    assert_eq!(report.diagnostics.len(), 1);
    assert_eq!(report.worker("failing").unwrap().stats.errors, 1);

    let seqs: Vec<u64> = common::collected(&frames).iter().map(|b| b.sequence).collect();
    assert_eq!(seqs, vec![0, 2, 3]);
}

#[test]
fn test_cycle_is_rejected_before_start() {
    let mut graph = graph_with_capacity(1);
    let (a, _) = CountingFilter::new();
    let (b, _) = CountingFilter::new();
    let a = graph.add_leaf(AnyFilter::plugin(a));
    let b = graph.add_leaf(AnyFilter::plugin(b));
    graph.link(a, b).unwrap();
    graph.link(b, a).unwrap();
    assert!(matches!(graph.start(), Err(PipelineError::CycleDetected)));
}

#[test]
fn test_unbounded_queues_run_to_completion() {
    let mut graph = graph_with_capacity(0);
    let (sink, frames) = CollectSink::new();
    let src = graph.add_leaf(FrameSource::new(32, 4, 4, Pattern::Ramp));
    let out = graph.add_leaf(sink);
    graph.link(src, out).unwrap();

    let report = graph.run().unwrap();
    assert!(report.is_terminated());
    assert_eq!(common::collected(&frames).len(), 32);
    assert!(report.pool.allocated > 0);
}
