//! HTTP weights source
//!
//! Downloads the weights file when it is not present locally. The body is
//! streamed into a temporary file next to the destination and renamed into
//! place, so a partial download never looks like a valid weights file.

use async_trait::async_trait;
use retinonet_core::{RetinoError, RetinoResult};
use retinonet_runtime::WeightsSource;
use std::path::Path;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

/// Weights source backed by a plain HTTP(S) URL
pub struct HttpWeightsSource {
    url: String,
    client: reqwest::Client,
}

impl HttpWeightsSource {
    /// Create a new HTTP weights source
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Get the download URL
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn download(&self, tmp_path: &Path) -> RetinoResult<u64> {
        let mut response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| RetinoError::Fetch(format!("request to {} failed: {}", self.url, e)))?;

        if !response.status().is_success() {
            return Err(RetinoError::Fetch(format!(
                "{} returned {}",
                self.url,
                response.status()
            )));
        }

        let mut file = tokio::fs::File::create(tmp_path).await?;
        let mut written = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| RetinoError::Fetch(format!("download interrupted: {}", e)))?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }
}

#[async_trait]
impl WeightsSource for HttpWeightsSource {
    async fn fetch(&self, dest: &Path) -> RetinoResult<u64> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        info!(url = %self.url, dest = %dest.display(), "Downloading model weights");
        let start = Instant::now();
        let tmp_path = dest.with_extension("download");

        match self.download(&tmp_path).await {
            Ok(bytes) => {
                tokio::fs::rename(&tmp_path, dest).await?;
                info!(
                    dest = %dest.display(),
                    bytes = bytes,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Downloaded model weights"
                );
                Ok(bytes)
            }
            Err(e) => {
                warn!(url = %self.url, error = %e, "Weights download failed");
                let _ = tokio::fs::remove_file(&tmp_path).await;
                Err(e)
            }
        }
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}
