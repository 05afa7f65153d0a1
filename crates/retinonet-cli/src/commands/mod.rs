//! CLI commands implementation

use anyhow::Result;
use retinonet_core::ModelStatus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

/// API client for communicating with the daemon
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Prediction response from API
#[derive(Debug, Deserialize)]
pub struct PredictResponse {
    pub request_id: Uuid,
    pub predictions: BTreeMap<String, String>,
    pub top_class: String,
    pub recommendation: String,
}

/// Show model lifecycle status
pub async fn status(client: &ApiClient) -> Result<()> {
    let response = client.client.get(client.url("/status")).send().await?;

    if response.status().is_success() {
        let status: ModelStatus = response.json().await?;
        print_status(&status);
    } else {
        let error = response.text().await?;
        eprintln!("Failed to get status: {}", error);
    }

    Ok(())
}

/// Poll readiness until the model is loaded or the timeout passes
pub async fn wait(client: &ApiClient, timeout_secs: u64, interval_secs: u64) -> Result<()> {
    let deadline = Instant::now() + Duration::from_secs(timeout_secs);
    let interval = Duration::from_secs(interval_secs.max(1));

    loop {
        match client.client.get(client.url("/ready")).send().await {
            Ok(response) if response.status().is_success() => {
                println!("Model is ready");
                return Ok(());
            }
            Ok(response) => debug!(status = %response.status(), "Model not ready"),
            Err(e) => debug!(error = %e, "Daemon not reachable"),
        }

        if Instant::now() + interval > deadline {
            anyhow::bail!("Model not ready after {}s", timeout_secs);
        }
        tokio::time::sleep(interval).await;
    }
}

/// Screen an image stored as raw RGB8 pixels
pub async fn predict(client: &ApiClient, file: PathBuf, width: usize, height: usize) -> Result<()> {
    let expected = width
        .checked_mul(height)
        .and_then(|n| n.checked_mul(3))
        .ok_or_else(|| anyhow::anyhow!("image size {}x{} is too large", width, height))?;
    let pixels = tokio::fs::read(&file).await?;
    if pixels.len() != expected {
        anyhow::bail!(
            "{} has {} bytes, expected {} for {}x{} RGB",
            file.display(),
            pixels.len(),
            expected,
            width,
            height
        );
    }

    #[derive(Serialize)]
    struct PredictRequest {
        width: usize,
        height: usize,
        pixels: Vec<u8>,
    }

    let response = client
        .client
        .post(client.url("/predict/"))
        .json(&PredictRequest {
            width,
            height,
            pixels,
        })
        .send()
        .await?;

    if response.status().is_success() {
        let prediction: PredictResponse = response.json().await?;
        print_prediction(&prediction);
    } else if response.status() == reqwest::StatusCode::SERVICE_UNAVAILABLE {
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("a few")
            .to_string();
        eprintln!("Model is not loaded yet, retry in {} seconds", retry_after);
    } else {
        let error = response.text().await?;
        eprintln!("Prediction failed: {}", error);
    }

    Ok(())
}

/// Helper to print lifecycle status
fn print_status(status: &ModelStatus) {
    println!("Model: {}", status.phase);
    if let Some(source) = status.source {
        println!("  Source: {:?}", source);
    }
    if let Some(loaded_at) = status.loaded_at {
        println!("  Loaded at: {}", loaded_at);
    }
    println!("  Last access: {}", status.last_access);
    println!("  Load attempts: {}", status.load_attempts);
    if let Some(failure) = &status.last_failure {
        println!(
            "  Last failure: {:?} at {} - {}",
            failure.kind, failure.at, failure.message
        );
    }
    if let Some(retry) = status.retry_in_secs {
        println!("  Next retry in: {}s", retry);
    }
}

/// Helper to print a prediction
fn print_prediction(prediction: &PredictResponse) {
    println!("Request: {}", prediction.request_id);
    println!("{:<30} {:>8}", "CLASS", "SCORE");
    println!("{}", "-".repeat(39));
    for (class_name, score) in &prediction.predictions {
        println!("{:<30} {:>8}", class_name, score);
    }
    println!();
    println!("Most likely: {}", prediction.top_class);
    println!("Recommendation: {}", prediction.recommendation);
}
