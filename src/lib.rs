//! # tomoflow: streaming frame pipelines
//!
//! An execution engine for tomographic image processing. Numeric operations
//! are plugged into a graph as interchangeable nodes; the engine moves frame
//! buffers between them, migrates data between host and compute device, and
//! drives every node to completion on its own thread.
//!
//! ## Architecture
//!
//! - **Pipeline**: nodes, link queues and the graph executor (`pipeline`)
//! - **Buffers**: `f32` frames with host/device residency tracking
//! - **Compute**: command-queue contexts over an emulated device or wgpu
//!   (feature `gpu`)
//! - **Configuration**: TOML engine settings (`config`)
//! - **Reports**: JSON run reports (`report`)
//!
//! ## Example
//!
//! ```no_run
//! use tomoflow::config::EngineConfig;
//! use tomoflow::pipeline::nodes::{CollectSink, FrameSource, Pattern, RegionOfInterest};
//! use tomoflow::pipeline::{Graph, PipelineResult};
//!
//! fn main() -> PipelineResult<()> {
//!     let mut graph = Graph::new(EngineConfig::default());
//!     let (sink, frames) = CollectSink::new();
//!     let src = graph.add_leaf(FrameSource::new(3, 512, 512, Pattern::Ramp));
//!     let roi = graph.add_leaf(RegionOfInterest::new(500, 500, 256, 256)?);
//!     let out = graph.add_leaf(sink);
//!     graph.link(src, roi)?;
//!     graph.link(roi, out)?;
//!
//!     let report = graph.run()?.into_result()?;
//!     println!("{} frames in {} ms", frames.len(), report.duration().num_milliseconds());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
#[cfg(feature = "gpu")]
pub mod gpu;
pub mod pipeline;
pub mod report;

// Re-export commonly used types
pub use config::EngineConfig;
pub use error::{Result, ResultExt, TomoflowError};
pub use pipeline::{Graph, PipelineError, RunReport};
