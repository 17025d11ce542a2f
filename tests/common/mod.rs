//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use crossbeam_channel::Receiver;
use std::time::Duration;
use tomoflow::pipeline::{Buffer, ExecutorEvent};

/// Create a test timeout duration
pub fn test_timeout() -> Duration {
    Duration::from_millis(100)
}

/// Assert two floats are approximately equal
pub fn assert_float_eq(a: f64, b: f64, epsilon: f64) {
    assert!(
        (a - b).abs() < epsilon,
        "Expected {} to be approximately equal to {} (epsilon: {})",
        a,
        b,
        epsilon
    );
}

/// Drain every buffer a `CollectSink` received.
pub fn collected(frames: &Receiver<Buffer>) -> Vec<Buffer> {
    frames.try_iter().collect()
}

/// Drain every event delivered to a subscriber.
pub fn drain_events(events: &Receiver<ExecutorEvent>) -> Vec<ExecutorEvent> {
    events.try_iter().collect()
}
