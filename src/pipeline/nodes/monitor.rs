//! Monitor: pass-through that logs per-frame statistics.

use crate::pipeline::buffer::{Buffer, Dims};
use crate::pipeline::compute::ComputeContext;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::node::{Filter, Flow, ProcessContext};
use crate::pipeline::port::PortDescriptor;
use crate::pipeline::properties::Properties;

static PORTS: &[PortDescriptor] = &[
    PortDescriptor::input("in", None),
    PortDescriptor::output("out", None),
];

/// Min/max/mean of one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSummary {
    pub min: f32,
    pub max: f32,
    pub mean: f64,
}

impl FrameSummary {
    pub fn of(data: &[f32]) -> Option<Self> {
        if data.is_empty() {
            return None;
        }
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        let mut sum = 0.0f64;
        for &v in data {
            min = min.min(v);
            max = max.max(v);
            sum += v as f64;
        }
        Some(Self {
            min,
            max,
            mean: sum / data.len() as f64,
        })
    }
}

pub struct Monitor {
    /// Log at info level every `every` frames; the rest go to trace.
    every: u64,
    last: Option<FrameSummary>,
}

impl Monitor {
    pub fn new(every: u64) -> Self {
        Self {
            every: every.max(1),
            last: None,
        }
    }

    pub fn from_properties(props: &Properties) -> PipelineResult<Self> {
        Ok(Self::new(props.get_uint("every", 1)?))
    }

    pub fn last_summary(&self) -> Option<FrameSummary> {
        self.last
    }
}

impl Filter for Monitor {
    fn name(&self) -> &str {
        "monitor"
    }

    fn ports(&self) -> &[PortDescriptor] {
        PORTS
    }

    fn initialize(&mut self, inputs: &[Buffer], _ctx: &ComputeContext) -> PipelineResult<Vec<Dims>> {
        let dims = inputs.first().map(|b| b.dims().clone()).unwrap_or_default();
        tracing::info!("Monitor: stream of {} frames", dims);
        Ok(vec![dims])
    }

    fn process(&mut self, io: &mut ProcessContext<'_>) -> PipelineResult<Flow> {
        let sequence = io.inputs[0].sequence;
        let src = io.inputs[0].host_array(io.compute)?;
        self.last = FrameSummary::of(src);
        if let Some(s) = self.last {
            if io.iteration % self.every == 0 {
                tracing::info!(
                    "frame {} min={:.3} max={:.3} mean={:.3}",
                    sequence,
                    s.min,
                    s.max,
                    s.mean
                );
            } else {
                tracing::trace!("frame {} mean={:.3}", sequence, s.mean);
            }
        }
        let dst = io.outputs[0].host_array_mut(io.compute)?;
        if dst.len() != src.len() {
            return Err(PipelineError::Shape(format!(
                "frame {} has {} elements, stream negotiated {}",
                sequence,
                src.len(),
                dst.len()
            )));
        }
        dst.copy_from_slice(src);
        Ok(Flow::Emit)
    }
}
