//! Mock filters and writers shared by the integration tests

use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tomoflow::pipeline::{
    Buffer, ComputeContext, Dims, Filter, Flow, PipelineError, PipelineResult, PortDescriptor,
    ProcessContext,
};

static TRANSFORM_PORTS: &[PortDescriptor] = &[
    PortDescriptor::input("in", Some(2)),
    PortDescriptor::output("out", Some(2)),
];

static SOURCE_PORTS: &[PortDescriptor] = &[PortDescriptor::output("out", Some(2))];

/// Pass-through filter that counts its `process` calls.
pub struct CountingFilter {
    calls: Arc<AtomicU64>,
}

impl CountingFilter {
    pub fn new() -> (Self, Arc<AtomicU64>) {
        let calls = Arc::new(AtomicU64::new(0));
        (
            Self {
                calls: calls.clone(),
            },
            calls,
        )
    }
}

impl Filter for CountingFilter {
    fn name(&self) -> &str {
        "counting"
    }

    fn ports(&self) -> &[PortDescriptor] {
        TRANSFORM_PORTS
    }

    fn initialize(&mut self, inputs: &[Buffer], _ctx: &ComputeContext) -> PipelineResult<Vec<Dims>> {
        Ok(vec![inputs[0].dims().clone()])
    }

    fn process(&mut self, io: &mut ProcessContext<'_>) -> PipelineResult<Flow> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let src = io.inputs[0].host_array(io.compute)?.to_vec();
        io.outputs[0].host_array_mut(io.compute)?.copy_from_slice(&src);
        Ok(Flow::Emit)
    }
}

/// Source replaying a fixed list of frames, all of the first frame's shape.
pub struct ReplaySource {
    frames: Vec<Vec<f32>>,
    dims: Dims,
    next: usize,
}

impl ReplaySource {
    pub fn new(dims: Dims, frames: Vec<Vec<f32>>) -> Self {
        Self {
            frames,
            dims,
            next: 0,
        }
    }
}

impl Filter for ReplaySource {
    fn name(&self) -> &str {
        "replay"
    }

    fn ports(&self) -> &[PortDescriptor] {
        SOURCE_PORTS
    }

    fn initialize(&mut self, _inputs: &[Buffer], _ctx: &ComputeContext) -> PipelineResult<Vec<Dims>> {
        Ok(vec![self.dims.clone()])
    }

    fn process(&mut self, io: &mut ProcessContext<'_>) -> PipelineResult<Flow> {
        let Some(frame) = self.frames.get(self.next) else {
            return Ok(Flow::Finished);
        };
        io.outputs[0].host_array_mut(io.compute)?.copy_from_slice(frame);
        self.next += 1;
        Ok(Flow::Emit)
    }
}

/// Transform that fails with `error` on its `fail_at`-th call (zero-based).
pub struct FailingFilter {
    fail_at: u64,
    error: fn() -> PipelineError,
}

impl FailingFilter {
    pub fn new(fail_at: u64, error: fn() -> PipelineError) -> Self {
        Self { fail_at, error }
    }
}

impl Filter for FailingFilter {
    fn name(&self) -> &str {
        "failing"
    }

    fn ports(&self) -> &[PortDescriptor] {
        TRANSFORM_PORTS
    }

    fn initialize(&mut self, inputs: &[Buffer], _ctx: &ComputeContext) -> PipelineResult<Vec<Dims>> {
        Ok(vec![inputs[0].dims().clone()])
    }

    fn process(&mut self, io: &mut ProcessContext<'_>) -> PipelineResult<Flow> {
        if io.iteration == self.fail_at {
            return Err((self.error)());
        }
        let src = io.inputs[0].host_array(io.compute)?.to_vec();
        io.outputs[0].host_array_mut(io.compute)?.copy_from_slice(&src);
        Ok(Flow::Emit)
    }
}

/// Transform that scales its input on the device and leaves the device copy
/// authoritative.
pub struct DeviceScale {
    factor: f32,
}

impl DeviceScale {
    pub fn new(factor: f32) -> Self {
        Self { factor }
    }
}

impl Filter for DeviceScale {
    fn name(&self) -> &str {
        "device-scale"
    }

    fn ports(&self) -> &[PortDescriptor] {
        TRANSFORM_PORTS
    }

    fn initialize(&mut self, inputs: &[Buffer], _ctx: &ComputeContext) -> PipelineResult<Vec<Dims>> {
        Ok(vec![inputs[0].dims().clone()])
    }

    fn process(&mut self, io: &mut ProcessContext<'_>) -> PipelineResult<Flow> {
        let src = io.inputs[0].host_array(io.compute)?.to_vec();
        io.outputs[0].host_array_mut(io.compute)?.copy_from_slice(&src);
        let factor = self.factor;
        io.outputs[0].dispatch(io.compute, |data| data.iter_mut().for_each(|v| *v *= factor))?;
        Ok(Flow::Emit)
    }
}

static SUBTRACT_PORTS: &[PortDescriptor] = &[
    PortDescriptor::input("in", Some(2)),
    PortDescriptor::input_fixed("dark", Some(2), 1),
    PortDescriptor::output("out", Some(2)),
];

/// Subtracts a single dark frame, read once on its own port, from every frame.
pub struct DarkSubtract;

impl Filter for DarkSubtract {
    fn name(&self) -> &str {
        "dark-subtract"
    }

    fn ports(&self) -> &[PortDescriptor] {
        SUBTRACT_PORTS
    }

    fn initialize(&mut self, inputs: &[Buffer], _ctx: &ComputeContext) -> PipelineResult<Vec<Dims>> {
        if inputs[0].dims() != inputs[1].dims() {
            return Err(PipelineError::Shape(format!(
                "dark frame {} does not match {}",
                inputs[1].dims(),
                inputs[0].dims()
            )));
        }
        Ok(vec![inputs[0].dims().clone()])
    }

    fn process(&mut self, io: &mut ProcessContext<'_>) -> PipelineResult<Flow> {
        let frame = io.inputs[0].host_array(io.compute)?.to_vec();
        let dark = io.inputs[1].host_array(io.compute)?.to_vec();
        let dst = io.outputs[0].host_array_mut(io.compute)?;
        for ((d, f), k) in dst.iter_mut().zip(frame).zip(dark) {
            *d = f - k;
        }
        Ok(Flow::Emit)
    }
}

/// Writer that records everything into a shared buffer.
#[derive(Clone, Default)]
pub struct SharedWriter {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl SharedWriter {
    pub fn contents(&self) -> Vec<u8> {
        self.bytes.lock().unwrap().clone()
    }
}

impl Write for SharedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Writer whose reader went away: every write fails with `BrokenPipe`.
pub struct BrokenPipe;

impl Write for BrokenPipe {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::from(io::ErrorKind::BrokenPipe))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
