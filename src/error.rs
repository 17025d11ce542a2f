//! Error handling for tomoflow
//!
//! Library code inside `pipeline` returns `PipelineError`; this module wraps it
//! together with configuration and IO failures for the crate's outer layers.

use crate::pipeline::PipelineError;
use thiserror::Error;

/// Main error type for tomoflow operations
#[derive(Error, Debug)]
pub enum TomoflowError {
    /// Errors raised while building or running a graph
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<TomoflowError>,
    },
}

impl TomoflowError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        TomoflowError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

impl From<serde_json::Error> for TomoflowError {
    fn from(err: serde_json::Error) -> Self {
        TomoflowError::Serialization(err.to_string())
    }
}

/// Result type alias for tomoflow operations
pub type Result<T> = std::result::Result<T, TomoflowError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, PipelineError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| TomoflowError::from(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| TomoflowError::from(e).with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TomoflowError::Config("queue capacity must be a number".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: queue capacity must be a number"
        );
    }

    #[test]
    fn test_error_with_context() {
        let err = TomoflowError::Config("test".to_string());
        let with_ctx = err.with_context("Failed to load engine config");
        assert!(with_ctx.to_string().contains("Failed to load engine config"));
    }

    #[test]
    fn test_pipeline_error_context() {
        let res: std::result::Result<(), PipelineError> = Err(PipelineError::CycleDetected);
        let err = res.context("Failed to start graph").unwrap_err();
        assert!(err.to_string().starts_with("Failed to start graph"));
        assert!(err.to_string().contains("Cycle"));
    }
}
