//! Controller-specific error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in the cluster overview controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A file named by the configuration could not be read
    #[error("Failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Clusters file is not valid YAML for the expected layout
    #[error("Invalid clusters file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Waiting for the shutdown signal failed
    #[error("Signal handling failed: {0}")]
    Signal(#[from] std::io::Error),

    /// A per-cluster task panicked
    #[error("Cluster task failed: {0}")]
    Task(String),
}
