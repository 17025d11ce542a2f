//! Node type enumeration for building graphs by name.
//!
//! Graph descriptions (TOML files, the CLI) refer to builtin filters by their
//! type name. The registry maps each name to a constructor.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Builtin filter types that can be created from a type name and properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeType {
    // Sources
    /// Synthetic frame generator.
    FrameSource,

    // Transforms
    /// Crops a rectangular window out of each frame.
    RegionOfInterest,
    /// Logs frame statistics and passes frames through.
    Monitor,

    // Sinks
    /// Streams raw frames into a named pipe.
    PipeOutput,
}

impl NodeType {
    /// Name used in graph descriptions and the registry.
    pub fn type_name(&self) -> &'static str {
        match self {
            NodeType::FrameSource => "frame-source",
            NodeType::RegionOfInterest => "region-of-interest",
            NodeType::Monitor => "monitor",
            NodeType::PipeOutput => "pipe-output",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            NodeType::FrameSource => "Frame Source",
            NodeType::RegionOfInterest => "Region of Interest",
            NodeType::Monitor => "Monitor",
            NodeType::PipeOutput => "Pipe Output",
        }
    }

    pub fn all() -> &'static [NodeType] {
        &[
            NodeType::FrameSource,
            NodeType::RegionOfInterest,
            NodeType::Monitor,
            NodeType::PipeOutput,
        ]
    }

    pub fn is_source(&self) -> bool {
        matches!(self, NodeType::FrameSource)
    }

    pub fn is_sink(&self) -> bool {
        matches!(self, NodeType::PipeOutput)
    }

    /// Parameters the type understands, for diagnostics.
    pub fn parameters(&self) -> &'static [&'static str] {
        match self {
            NodeType::FrameSource => &["count", "width", "height", "pattern", "value"],
            NodeType::RegionOfInterest => &["x", "y", "width", "height"],
            NodeType::Monitor => &["every"],
            NodeType::PipeOutput => &["pipe-name"],
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

impl FromStr for NodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeType::all()
            .iter()
            .copied()
            .find(|t| t.type_name() == s)
            .ok_or_else(|| format!("unknown node type '{}'", s))
    }
}
