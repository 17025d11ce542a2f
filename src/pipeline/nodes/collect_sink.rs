//! CollectSink: hands every received frame to a channel.
//!
//! Used by tests and embedding applications to get frames out of a running
//! graph without a file or pipe in between.

use crate::pipeline::buffer::{Buffer, Dims};
use crate::pipeline::compute::ComputeContext;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::node::{Filter, Flow, ProcessContext};
use crate::pipeline::port::PortDescriptor;
use crossbeam_channel::{unbounded, Receiver, Sender};

static PORTS: &[PortDescriptor] = &[PortDescriptor::input("in", None)];

pub struct CollectSink {
    tx: Sender<Buffer>,
}

impl CollectSink {
    /// Create the sink and the receiving end for its frames.
    pub fn new() -> (Self, Receiver<Buffer>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }
}

impl Filter for CollectSink {
    fn name(&self) -> &str {
        "collect-sink"
    }

    fn ports(&self) -> &[PortDescriptor] {
        PORTS
    }

    fn initialize(&mut self, _inputs: &[Buffer], _ctx: &ComputeContext) -> PipelineResult<Vec<Dims>> {
        Ok(Vec::new())
    }

    fn process(&mut self, io: &mut ProcessContext<'_>) -> PipelineResult<Flow> {
        // Receivers may live on another context; make the host copy authoritative.
        io.inputs[0].host_array(io.compute)?;
        let frame = std::mem::replace(&mut io.inputs[0], Buffer::new(Dims::default()));
        self.tx
            .send(frame)
            .map_err(|_| PipelineError::Device("collect-sink receiver dropped".into()))?;
        Ok(Flow::Emit)
    }
}
