//! Model snapshot cache
//!
//! A single fixed slot holding a serialized copy of the last model built from
//! weights, so a cold start can skip the loader. Snapshots carry a format tag
//! and version; anything else found in the slot is discarded rather than fed
//! to the deserializer.
//!
//! There is no TTL and no checksum against the weights file. A snapshot stays
//! in use until its format version changes or someone deletes it, even if the
//! weights it was built from have since been replaced.

use chrono::{DateTime, Utc};
use retinonet_core::{RetinoError, RetinoResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Format tag written into every snapshot
pub const SNAPSHOT_FORMAT: &str = "retinonet.model-snapshot";

/// Current snapshot layout version
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize)]
struct Envelope<'a, T> {
    format: &'a str,
    version: u32,
    created_at: DateTime<Utc>,
    payload: &'a T,
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(default)]
    format: String,
    #[serde(default)]
    version: u32,
    #[serde(default)]
    payload: serde_json::Value,
}

/// Serialize a value into a versioned snapshot
pub fn encode_snapshot<T: Serialize>(value: &T) -> RetinoResult<Vec<u8>> {
    let envelope = Envelope {
        format: SNAPSHOT_FORMAT,
        version: SNAPSHOT_VERSION,
        created_at: Utc::now(),
        payload: value,
    };
    Ok(serde_json::to_vec(&envelope)?)
}

/// Deserialize a snapshot, rejecting foreign formats and other versions
pub fn decode_snapshot<T: DeserializeOwned>(bytes: &[u8]) -> RetinoResult<T> {
    let raw: RawEnvelope = serde_json::from_slice(bytes)
        .map_err(|e| RetinoError::Cache(format!("unreadable snapshot: {}", e)))?;

    if raw.format != SNAPSHOT_FORMAT || raw.version != SNAPSHOT_VERSION {
        return Err(RetinoError::CacheIncompatible(format!(
            "found format '{}' version {}, expected '{}' version {}",
            raw.format, raw.version, SNAPSHOT_FORMAT, SNAPSHOT_VERSION
        )));
    }

    serde_json::from_value(raw.payload)
        .map_err(|e| RetinoError::Cache(format!("corrupt snapshot payload: {}", e)))
}

/// Single-slot snapshot cache on the local filesystem
#[derive(Debug, Clone)]
pub struct SnapshotCache {
    /// Directory holding the snapshot
    dir: PathBuf,
    /// Full path of the snapshot file
    path: PathBuf,
}

impl SnapshotCache {
    /// Create a cache for `dir/file_name`
    pub fn new(dir: impl Into<PathBuf>, file_name: &str) -> Self {
        let dir = dir.into();
        let path = dir.join(file_name);
        Self { dir, path }
    }

    /// Create the cache directory if it doesn't exist
    pub async fn init(&self) -> RetinoResult<()> {
        if !self.dir.exists() {
            tokio::fs::create_dir_all(&self.dir).await?;
            info!(path = %self.dir.display(), "Created model cache directory");
        }
        Ok(())
    }

    /// Path of the snapshot file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if a snapshot is present
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Read the snapshot.
    ///
    /// Returns `Ok(None)` when the slot is empty. Incompatible or corrupt
    /// snapshots are removed from the slot and reported as errors.
    pub async fn read<T: DeserializeOwned>(&self) -> RetinoResult<Option<T>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(RetinoError::Cache(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        debug!(path = %self.path.display(), bytes = bytes.len(), "Read model snapshot");

        match decode_snapshot(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Discarding unusable model snapshot"
                );
                if let Err(remove_err) = tokio::fs::remove_file(&self.path).await {
                    warn!(
                        path = %self.path.display(),
                        error = %remove_err,
                        "Failed to remove model snapshot"
                    );
                }
                Err(e)
            }
        }
    }

    /// Write a snapshot, replacing the slot atomically.
    ///
    /// Returns the number of bytes written.
    pub async fn write<T: Serialize>(&self, value: &T) -> RetinoResult<u64> {
        let bytes =
            encode_snapshot(value).map_err(|e| RetinoError::CacheWrite(e.to_string()))?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| RetinoError::CacheWrite(format!("{}: {}", self.dir.display(), e)))?;

        let tmp_path = self.path.with_extension("tmp");
        tokio::fs::write(&tmp_path, &bytes)
            .await
            .map_err(|e| RetinoError::CacheWrite(format!("{}: {}", tmp_path.display(), e)))?;

        if let Err(e) = tokio::fs::rename(&tmp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(RetinoError::CacheWrite(format!(
                "{}: {}",
                self.path.display(),
                e
            )));
        }

        info!(
            path = %self.path.display(),
            bytes = bytes.len(),
            "Saved model snapshot"
        );
        Ok(bytes.len() as u64)
    }

    /// Remove the snapshot, if present
    pub async fn remove(&self) -> RetinoResult<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                info!(path = %self.path.display(), "Removed model snapshot");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
