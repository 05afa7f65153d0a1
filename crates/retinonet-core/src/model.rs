//! Tensor, prediction and model status type definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{RetinoError, RetinoResult};

/// Output classes of the screening model, in score order
pub const CLASS_NAMES: [&str; 4] = [
    "Bilateral Retinoblastoma",
    "Left Eye Retinoblastoma",
    "Right Eye Retinoblastoma",
    "Healthy",
];

/// Advice shown next to the most likely class
pub fn recommendation_for(class_name: &str) -> &'static str {
    match class_name {
        "Bilateral Retinoblastoma" => "Seek immediate consultation with a specialist.",
        "Left Eye Retinoblastoma" => "Consult an ophthalmologist as soon as possible.",
        "Right Eye Retinoblastoma" => "Immediate consultation with a specialist is recommended.",
        "Healthy" => "Your scan appears normal, but regular checkups are advised.",
        _ => "No recommendation available.",
    }
}

/// Channel-last image tensor with values in `[0, 1]`
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
    pub data: Vec<f32>,
}

impl ImageTensor {
    /// Create a tensor, checking that `data` matches the shape
    pub fn new(height: usize, width: usize, channels: usize, data: Vec<f32>) -> RetinoResult<Self> {
        if height == 0 || width == 0 || channels == 0 {
            return Err(RetinoError::InvalidInput(format!(
                "empty tensor shape {}x{}x{}",
                height, width, channels
            )));
        }
        let expected = height
            .checked_mul(width)
            .and_then(|n| n.checked_mul(channels))
            .ok_or_else(|| {
                RetinoError::InvalidInput(format!(
                    "tensor shape {}x{}x{} is too large",
                    height, width, channels
                ))
            })?;
        if data.len() != expected {
            return Err(RetinoError::InvalidInput(format!(
                "expected {} values for {}x{}x{}, got {}",
                expected,
                height,
                width,
                channels,
                data.len()
            )));
        }
        Ok(Self {
            height,
            width,
            channels,
            data,
        })
    }

    /// Build a tensor from packed RGB8 pixels, scaling to `[0, 1]`
    pub fn from_rgb8(width: usize, height: usize, pixels: &[u8]) -> RetinoResult<Self> {
        let data = pixels.iter().map(|&p| f32::from(p) / 255.0).collect();
        Self::new(height, width, 3, data)
    }

    /// Global average pooling: mean value of each channel
    pub fn channel_means(&self) -> Vec<f32> {
        let mut sums = vec![0f64; self.channels];
        if self.channels == 0 {
            return Vec::new();
        }
        let mut count = 0usize;
        for pixel in self.data.chunks_exact(self.channels) {
            for (sum, value) in sums.iter_mut().zip(pixel) {
                *sum += f64::from(*value);
            }
            count += 1;
        }
        if count == 0 {
            return vec![0.0; self.channels];
        }
        sums.into_iter().map(|s| (s / count as f64) as f32).collect()
    }
}

/// Score for a single class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassScore {
    pub class_name: String,
    pub score: f32,
}

/// Model output for one image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub scores: Vec<ClassScore>,
}

impl Prediction {
    /// Pair class names with raw scores
    pub fn new(class_names: &[String], scores: &[f32]) -> Self {
        Self {
            scores: class_names
                .iter()
                .zip(scores)
                .map(|(name, score)| ClassScore {
                    class_name: name.clone(),
                    score: *score,
                })
                .collect(),
        }
    }

    /// Highest-scoring class
    pub fn top(&self) -> Option<&ClassScore> {
        self.scores
            .iter()
            .max_by(|a, b| a.score.total_cmp(&b.score))
    }

    /// Scores rendered as percentages with two decimals
    pub fn formatted(&self) -> BTreeMap<String, String> {
        self.scores
            .iter()
            .map(|s| (s.class_name.clone(), format!("{:.2}%", s.score * 100.0)))
            .collect()
    }
}

/// Lifecycle phase of the managed model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadPhase {
    /// No model in memory; a load may be attempted
    Unloaded,
    /// A load procedure holds the load gate
    Loading,
    /// A model handle is available
    Loaded,
}

impl std::fmt::Display for LoadPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadPhase::Unloaded => write!(f, "Unloaded"),
            LoadPhase::Loading => write!(f, "Loading"),
            LoadPhase::Loaded => write!(f, "Loaded"),
        }
    }
}

/// Where the loaded model came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadSource {
    /// Deserialized from the snapshot cache
    Cache,
    /// Built by the loader from the weights file
    Weights,
}

/// Category of a failed load attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    SourceMissing,
    Load,
    TimedOut,
    Fetch,
}

impl FailureKind {
    /// Classify a load-procedure error
    pub fn of(err: &RetinoError) -> Self {
        match err {
            RetinoError::SourceMissing(_) => FailureKind::SourceMissing,
            RetinoError::LoadTimedOut(_) => FailureKind::TimedOut,
            RetinoError::Fetch(_) => FailureKind::Fetch,
            _ => FailureKind::Load,
        }
    }
}

/// Record of the most recent failed load
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadFailure {
    pub kind: FailureKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Snapshot of the lifecycle manager, served by the status endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelStatus {
    pub phase: LoadPhase,
    pub loaded: bool,
    pub source: Option<LoadSource>,
    pub loaded_at: Option<DateTime<Utc>>,
    pub last_access: DateTime<Utc>,
    pub load_attempts: u32,
    pub consecutive_failures: u32,
    pub last_failure: Option<LoadFailure>,
    /// Seconds until a failed load may be retried
    pub retry_in_secs: Option<u64>,
}
