//! Built-in filter implementations.

pub mod collect_sink;
pub mod frame_source;
pub mod monitor;
pub mod pipe_output;
pub mod region_of_interest;

pub use collect_sink::CollectSink;
pub use frame_source::{FrameSource, Pattern};
pub use monitor::Monitor;
pub use pipe_output::PipeOutput;
pub use region_of_interest::RegionOfInterest;
