//! RegionOfInterest: crops a rectangular window out of every 2-D frame.
//!
//! Parameters: `x`, `y` (origin, default 0) and `width`, `height` (default 256).
//! The output is always `width x height`. The part of the window that overlaps
//! the input lands in the top-left corner; pixels past the right or bottom
//! edge of the input read as zero. An origin outside the frame is a shape error.

use crate::pipeline::buffer::{Buffer, Dims};
use crate::pipeline::compute::ComputeContext;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::node::{Filter, Flow, ProcessContext};
use crate::pipeline::port::PortDescriptor;
use crate::pipeline::properties::Properties;

static PORTS: &[PortDescriptor] = &[
    PortDescriptor::input("in", Some(2)),
    PortDescriptor::output("out", Some(2)),
];

/// Rectangle in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Window {
    /// The part of this window inside a `frame_w x frame_h` frame.
    pub fn clamp_to(&self, frame_w: usize, frame_h: usize) -> PipelineResult<Window> {
        if self.x >= frame_w || self.y >= frame_h {
            return Err(PipelineError::Shape(format!(
                "origin ({}, {}) lies outside the {}x{} input",
                self.x, self.y, frame_w, frame_h
            )));
        }
        Ok(Window {
            x: self.x,
            y: self.y,
            width: self.width.min(frame_w - self.x),
            height: self.height.min(frame_h - self.y),
        })
    }
}

pub struct RegionOfInterest {
    window: Window,
}

impl RegionOfInterest {
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> PipelineResult<Self> {
        if width == 0 || height == 0 {
            return Err(PipelineError::Configuration(format!(
                "region of interest must not be empty, got {}x{}",
                width, height
            )));
        }
        Ok(Self {
            window: Window {
                x,
                y,
                width,
                height,
            },
        })
    }

    pub fn from_properties(props: &Properties) -> PipelineResult<Self> {
        Self::new(
            props.get_uint("x", 0)? as usize,
            props.get_uint("y", 0)? as usize,
            props.get_uint("width", 256)? as usize,
            props.get_uint("height", 256)? as usize,
        )
    }

    pub fn window(&self) -> Window {
        self.window
    }
}

/// Copy `region` of a `src_w`-wide frame into the top-left of a `dst_w`-wide frame.
fn copy_region(src: &[f32], src_w: usize, region: Window, dst: &mut [f32], dst_w: usize) {
    if region.x == 0 && region.width == src_w && region.width == dst_w {
        let start = region.y * src_w;
        let len = region.width * region.height;
        dst[..len].copy_from_slice(&src[start..start + len]);
        return;
    }
    for row in 0..region.height {
        let from = (region.y + row) * src_w + region.x;
        let to = row * dst_w;
        dst[to..to + region.width].copy_from_slice(&src[from..from + region.width]);
    }
}

impl Filter for RegionOfInterest {
    fn name(&self) -> &str {
        "region-of-interest"
    }

    fn ports(&self) -> &[PortDescriptor] {
        PORTS
    }

    fn initialize(&mut self, inputs: &[Buffer], _ctx: &ComputeContext) -> PipelineResult<Vec<Dims>> {
        let input = inputs
            .first()
            .ok_or_else(|| PipelineError::PortMismatch("region-of-interest needs one input".into()))?;
        let (in_w, in_h) = input.dims_2d()?;
        let clamped = self.window.clamp_to(in_w, in_h)?;
        if clamped != self.window {
            tracing::debug!(
                "Region {:?} overlaps {}x{} of the {}x{} input; the rest is zero",
                self.window,
                clamped.width,
                clamped.height,
                in_w,
                in_h
            );
        }
        Ok(vec![Dims::d2(self.window.width, self.window.height)])
    }

    fn process(&mut self, io: &mut ProcessContext<'_>) -> PipelineResult<Flow> {
        let (in_w, in_h) = io.inputs[0].dims_2d()?;
        let region = self.window.clamp_to(in_w, in_h)?;

        let src = io.inputs[0].host_array(io.compute)?;
        let dst = io.outputs[0].host_array_mut(io.compute)?;
        if region != self.window {
            // Pooled outputs carry stale data; uncovered pixels must read as zero.
            dst.fill(0.0);
        }
        copy_region(src, in_w, region, dst, self.window.width);
        Ok(Flow::Emit)
    }
}
