//! Pipeline-specific error types.

use crate::pipeline::id::{ContextId, NodeId};
use crate::pipeline::queue::LinkError;
use thiserror::Error;

/// Errors that can occur within the pipeline system.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Invalid or missing node parameter.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Buffer rank/extent does not fit what an operation requires.
    #[error("Shape error: {0}")]
    Shape(String),

    /// Failure talking to an external sink.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Compute context or migration failure.
    #[error("Device error: {0}")]
    Device(String),

    /// Device memory used through a context that does not own it.
    #[error("Device memory owned by {owner} used through {used}")]
    ContextMismatch { owner: ContextId, used: ContextId },

    #[error("Queue error: {0}")]
    Queue(#[from] LinkError),

    #[error("Invalid edge: {0}")]
    InvalidEdge(String),

    #[error("Cycle detected in pipeline graph")]
    CycleDetected,

    #[error("Port mismatch: {0}")]
    PortMismatch(String),

    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("Worker for node '{0}' panicked")]
    WorkerPanicked(String),

    /// The run was cancelled before every node drained.
    #[error("Graph aborted: {0}")]
    Aborted(String),

    #[error("Node {node_id:?} ({name}): {source}")]
    Node {
        node_id: NodeId,
        name: String,
        #[source]
        source: Box<PipelineError>,
    },
}

impl PipelineError {
    /// Wrap this error with the identity of the node that raised it.
    pub fn in_node(self, node_id: NodeId, name: impl Into<String>) -> Self {
        PipelineError::Node {
            node_id,
            name: name.into(),
            source: Box::new(self),
        }
    }

    /// Whether the error must halt the graph.
    ///
    /// Configuration and shape errors stay local to the node that raised them.
    pub fn is_fatal(&self) -> bool {
        match self {
            PipelineError::Configuration(_) | PipelineError::Shape(_) => false,
            PipelineError::Node { source, .. } => source.is_fatal(),
            _ => true,
        }
    }

    /// Innermost error, skipping `Node` context wrappers.
    pub fn root(&self) -> &PipelineError {
        match self {
            PipelineError::Node { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
