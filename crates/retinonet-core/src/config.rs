//! Configuration types for RetinoNet

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// API server configuration
    pub api: ApiConfig,
    /// Model lifecycle configuration
    pub model: ModelConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl ServiceConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, crate::RetinoError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::RetinoError::Config(format!("Failed to read config file: {}", e))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, crate::RetinoError> {
        toml::from_str(content)
            .map_err(|e| crate::RetinoError::Config(format!("Failed to parse config: {}", e)))
    }
}

/// API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Address to bind the REST API server
    pub address: String,
    /// Port for the REST API server
    pub port: u16,
    /// Enable CORS
    pub cors_enabled: bool,
    /// Allowed CORS origins
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 8000,
            cors_enabled: true,
            cors_origins: vec![
                "http://localhost:5173".to_string(),
                "http://127.0.0.1:5173".to_string(),
            ],
        }
    }
}

/// Model lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Path to the source weights file
    pub model_path: PathBuf,
    /// Directory holding the serialized model snapshot
    pub cache_dir: PathBuf,
    /// Snapshot file name inside `cache_dir`
    pub cache_file: String,
    /// URL to download weights from when `model_path` is absent
    pub weights_url: Option<String>,
    /// Upper bound on a single loader call, in seconds
    pub load_timeout_secs: Option<u64>,
    /// First retry delay after a failed load, in seconds
    pub retry_initial_backoff_secs: u64,
    /// Cap on the retry delay, in seconds
    pub retry_max_backoff_secs: u64,
    /// Start loading in the background at startup
    pub background_load: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("volume/appdata/model/retinonet_weights.json"),
            cache_dir: PathBuf::from("volume/appdata/cache"),
            cache_file: "model_cache.json".to_string(),
            weights_url: None,
            load_timeout_secs: Some(600),
            retry_initial_backoff_secs: 2,
            retry_max_backoff_secs: 60,
            background_load: true,
        }
    }
}

impl ModelConfig {
    /// Full path of the snapshot file
    pub fn cache_path(&self) -> PathBuf {
        self.cache_dir.join(&self.cache_file)
    }

    /// Loader time bound, if any
    pub fn load_timeout(&self) -> Option<Duration> {
        self.load_timeout_secs.map(Duration::from_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per event
    Json,
}
