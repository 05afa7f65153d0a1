//! Error types for RetinoNet

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for RetinoNet
#[derive(Error, Debug)]
pub enum RetinoError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Weights file absent at the configured path
    #[error("Model file not found at {}", .0.display())]
    SourceMissing(PathBuf),

    /// The loader failed to build a model from the weights
    #[error("Model load error: {0}")]
    Load(String),

    /// The loader did not finish within the configured bound
    #[error("Model load timed out after {}s", .0.as_secs_f64())]
    LoadTimedOut(Duration),

    /// A failed load is still inside its backoff window
    #[error("Model load retry deferred for {}s", .0.as_secs())]
    RetryDeferred(Duration),

    /// Corrupt or unreadable cache snapshot
    #[error("Cache error: {0}")]
    Cache(String),

    /// Snapshot written by an incompatible format or version
    #[error("Incompatible cache snapshot: {0}")]
    CacheIncompatible(String),

    /// Failed to persist a snapshot
    #[error("Cache write error: {0}")]
    CacheWrite(String),

    /// Failed to download weights
    #[error("Weights fetch error: {0}")]
    Fetch(String),

    /// Request input could not be turned into a tensor
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Inference failed on a loaded model
    #[error("Inference error: {0}")]
    Inference(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for RetinoNet operations
pub type RetinoResult<T> = Result<T, RetinoError>;

impl From<serde_json::Error> for RetinoError {
    fn from(err: serde_json::Error) -> Self {
        RetinoError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for RetinoError {
    fn from(err: toml::de::Error) -> Self {
        RetinoError::Config(err.to_string())
    }
}
