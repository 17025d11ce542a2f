//! Port descriptors for the node system.
//!
//! Each filter declares its ports via a static `PortDescriptor` array. The
//! compiler uses them to validate edges; leaf nodes use them to size their
//! queue bindings.

use serde::{Deserialize, Serialize};

/// Whether a port is an input or output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortDirection {
    Input,
    Output,
}

/// How many buffers an input accepts before it is considered complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputCardinality {
    /// Exactly `n` buffers, then the node stops reading this port.
    Fixed(u64),
    /// Every buffer until end-of-stream.
    Unbounded,
}

/// Static descriptor for a node's port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDescriptor {
    pub name: &'static str,
    pub direction: PortDirection,
    /// Expected buffer rank, if the port constrains it.
    pub rank: Option<usize>,
    /// Only meaningful for inputs.
    pub cardinality: InputCardinality,
}

impl PortDescriptor {
    pub const fn input(name: &'static str, rank: Option<usize>) -> Self {
        Self {
            name,
            direction: PortDirection::Input,
            rank,
            cardinality: InputCardinality::Unbounded,
        }
    }

    pub const fn input_fixed(name: &'static str, rank: Option<usize>, count: u64) -> Self {
        Self {
            name,
            direction: PortDirection::Input,
            rank,
            cardinality: InputCardinality::Fixed(count),
        }
    }

    pub const fn output(name: &'static str, rank: Option<usize>) -> Self {
        Self {
            name,
            direction: PortDirection::Output,
            rank,
            cardinality: InputCardinality::Unbounded,
        }
    }

    pub fn is_input(&self) -> bool {
        self.direction == PortDirection::Input
    }

    pub fn is_output(&self) -> bool {
        self.direction == PortDirection::Output
    }
}

/// Input/output counts derived from a port list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arity {
    pub inputs: Vec<PortDescriptor>,
    pub outputs: Vec<PortDescriptor>,
}

impl Arity {
    pub fn from_ports(ports: &[PortDescriptor]) -> Self {
        Self {
            inputs: ports.iter().filter(|p| p.is_input()).cloned().collect(),
            outputs: ports.iter().filter(|p| p.is_output()).cloned().collect(),
        }
    }

    pub fn is_source(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn is_sink(&self) -> bool {
        self.outputs.is_empty()
    }
}
