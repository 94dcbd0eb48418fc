//! Error handling for the VisionFlow application
//!
//! This module defines the crate-level error type and a Result alias. The
//! graph engine has its own [`PipelineError`] which converts into
//! [`VisionFlowError`] at the compiler and runtime boundaries.

use crate::pipeline::PipelineError;
use thiserror::Error;

/// Main error type for VisionFlow operations
#[derive(Error, Debug)]
pub enum VisionFlowError {
    /// Invalid or inconsistent configuration, detected before any node exists
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors raised by the graph engine (linking, materialization, backend)
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Fatal errors in the steady-state runtime loop
    #[error("Runtime error: {0}")]
    Runtime(String),

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
        source: Box<VisionFlowError>,
    },
}

impl VisionFlowError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        VisionFlowError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Build a configuration error scoped to a config location, e.g. `flows[2].mosaic`
    pub fn config_at(location: impl AsRef<str>, message: impl AsRef<str>) -> Self {
        VisionFlowError::Config(format!("{}: {}", location.as_ref(), message.as_ref()))
    }

    /// Whether this error (or the error it wraps) is a configuration error
    pub fn is_config(&self) -> bool {
        match self {
            VisionFlowError::Config(_) => true,
            VisionFlowError::WithContext { source, .. } => source.is_config(),
            _ => false,
        }
    }
}

/// Result type alias for VisionFlow operations
pub type Result<T> = std::result::Result<T, VisionFlowError>;

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
        self.map_err(|e| VisionFlowError::from(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| VisionFlowError::from(e).with_context(f()))
    }
}
