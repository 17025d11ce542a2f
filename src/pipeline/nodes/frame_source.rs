//! FrameSource: synthetic 2-D frame generator.
//!
//! Emits `count` frames of `width x height` and then finishes. Used for demos,
//! benchmarks and tests; real acquisitions plug in as their own filters.

use crate::pipeline::buffer::{Buffer, Dims};
use crate::pipeline::compute::ComputeContext;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::node::{Filter, Flow, ProcessContext};
use crate::pipeline::port::PortDescriptor;
use crate::pipeline::properties::Properties;

static PORTS: &[PortDescriptor] = &[PortDescriptor::output("out", Some(2))];

/// Pixel content of generated frames.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Pattern {
    /// Every pixel holds the same value.
    Constant(f32),
    /// Pixel `i` of frame `n` holds `i + n`.
    Ramp,
}

pub struct FrameSource {
    count: u64,
    width: usize,
    height: usize,
    pattern: Pattern,
    emitted: u64,
}

impl FrameSource {
    pub fn new(count: u64, width: usize, height: usize, pattern: Pattern) -> Self {
        Self {
            count,
            width,
            height,
            pattern,
            emitted: 0,
        }
    }

    /// Build from `count`, `width`, `height`, `pattern` (`"ramp"` or
    /// `"constant"`) and `value`.
    pub fn from_properties(props: &Properties) -> PipelineResult<Self> {
        let count = props.get_uint("count", 1)?;
        let width = props.get_uint("width", 256)? as usize;
        let height = props.get_uint("height", 256)? as usize;
        let pattern = match props.get_str("pattern")?.unwrap_or("ramp") {
            "ramp" => Pattern::Ramp,
            "constant" => Pattern::Constant(props.get_float("value", 0.0)? as f32),
            other => {
                return Err(PipelineError::Configuration(format!(
                    "unknown frame pattern '{}'",
                    other
                )))
            }
        };
        Ok(Self::new(count, width, height, pattern))
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    fn fill(&self, out: &mut [f32]) {
        match self.pattern {
            Pattern::Constant(value) => out.fill(value),
            Pattern::Ramp => {
                let offset = self.emitted as f32;
                for (i, px) in out.iter_mut().enumerate() {
                    *px = i as f32 + offset;
                }
            }
        }
    }
}

impl Filter for FrameSource {
    fn name(&self) -> &str {
        "frame-source"
    }

    fn ports(&self) -> &[PortDescriptor] {
        PORTS
    }

    fn initialize(&mut self, _inputs: &[Buffer], _ctx: &ComputeContext) -> PipelineResult<Vec<Dims>> {
        self.emitted = 0;
        Ok(vec![Dims::d2(self.width, self.height)])
    }

    fn process(&mut self, io: &mut ProcessContext<'_>) -> PipelineResult<Flow> {
        if self.emitted >= self.count {
            return Ok(Flow::Finished);
        }
        let out = io.outputs[0].host_array_mut(io.compute)?;
        self.fill(out);
        self.emitted += 1;
        Ok(Flow::Emit)
    }
}
