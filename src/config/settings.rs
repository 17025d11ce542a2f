//! Sections of the engine configuration file.
//!
//! Every section implements `Default` and is marked `#[serde(default)]`, so a
//! config file only needs the keys it changes.

use crate::pipeline::compute::BackendKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default link queue capacity (buffers in flight per edge)
pub const DEFAULT_QUEUE_CAPACITY: usize = 4;

/// Default number of idle buffers the pool keeps per shape
pub const DEFAULT_POOL_PER_SHAPE: usize = 8;

/// Link queue sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Buffers in flight per edge before the producer blocks. `0` means unbounded.
    pub capacity: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// How compute contexts are handed out to nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextPolicy {
    /// One context (one command queue) for the whole graph.
    #[default]
    Shared,
    /// A separate context for every worker.
    PerNode,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputeSettings {
    pub policy: ContextPolicy,
    pub backend: BackendKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub max_per_shape: usize,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_per_shape: DEFAULT_POOL_PER_SHAPE,
        }
    }
}

/// Logging setup used by the binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is not set.
    pub filter: String,
    /// Directory for daily-rotated log files; console only when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info,tomoflow=debug".to_string(),
            log_dir: None,
        }
    }
}

/// Crop window of the demo graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoiSettings {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for RoiSettings {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            width: 256,
            height: 256,
        }
    }
}

/// Demo graph run by the `tomoflow` binary:
/// frame source → region of interest → monitor → pipe (or in-memory sink).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    pub frames: u32,
    pub width: u32,
    pub height: u32,
    pub roi: RoiSettings,
    /// Named pipe receiving the cropped frames.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipe: Option<PathBuf>,
    /// Where to write the JSON run report; stdout when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<PathBuf>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            frames: 16,
            width: 512,
            height: 512,
            roi: RoiSettings::default(),
            pipe: None,
            report: None,
        }
    }
}
