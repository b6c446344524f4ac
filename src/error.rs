//! Error handling for drumdag
//!
//! This module defines the crate-level error type and a Result alias used by
//! configuration loading, graph assembly and the command line front end.
//! Pipeline internals have their own finer-grained errors in
//! `pipeline::error`; they convert into `DrumDagError` at the boundary.

use crate::music::stages::PartitionError;
use crate::pipeline::error::{DriverError, GraphConstructionError};
use thiserror::Error;

/// Main error type for drumdag operations
#[derive(Error, Debug)]
pub enum DrumDagError {
    /// Errors related to configuration loading/saving/validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// The graph description was rejected
    #[error("Graph error: {0}")]
    Graph(#[from] GraphConstructionError),

    /// A run failed
    #[error("Run error: {0}")]
    Driver(#[from] DriverError),

    /// Invalid partition setup
    #[error("Partition error: {0}")]
    Partition(#[from] PartitionError),

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
        source: Box<DrumDagError>,
    },
}

impl DrumDagError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        DrumDagError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

impl From<serde_json::Error> for DrumDagError {
    fn from(err: serde_json::Error) -> Self {
        DrumDagError::Serialization(err.to_string())
    }
}

/// Result type alias for drumdag operations
pub type Result<T> = std::result::Result<T, DrumDagError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<DrumDagError>,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().with_context(f()))
    }
}
