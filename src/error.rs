//! Error types for tabserve
//!
//! Process-level failures: loading the model artifact, configuration, metrics,
//! binding the server and running the load generator. Per-request
//! failures live in [`crate::pipeline::PredictError`].

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, ServeError>;

/// Errors that abort a command or leave the service without a model
#[derive(Debug, Error)]
pub enum ServeError {
    /// Model directory or serialized pipeline is missing
    #[error("Model not found: {}", path.display())]
    ModelNotFound {
        /// Path that was checked
        path: PathBuf,
    },

    /// Serialized pipeline exists but could not be decoded
    #[error("Invalid model artifact {}: {reason}", path.display())]
    ModelFormat {
        /// Artifact path
        path: PathBuf,
        /// Decoder message
        reason: String,
    },

    /// Filesystem error while reading an artifact
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// Path being read
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Rejected configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Listener or server failure
    #[error("Server error: {0}")]
    Server(String),

    /// Load generator worker could not be spawned or did not finish
    #[error("Load generator error: {0}")]
    Worker(String),

    /// Metric definition rejected by the registry
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}
