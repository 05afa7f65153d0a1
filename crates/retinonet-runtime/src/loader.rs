//! JSON weights-file loader
//!
//! Weights files store each dense layer as a flat, row-major kernel of shape
//! `[inputs, units]` plus a bias vector, the layout produced when exporting a
//! trained classification head.

use retinonet_core::{RetinoError, RetinoResult, CLASS_NAMES};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

use crate::classifier::{Activation, DenseLayer, RetinaClassifier};
use crate::traits::ModelLoader;

/// Architecture tag accepted by [`WeightsFileLoader`]
pub const ARCHITECTURE: &str = "gap-dense";

/// On-disk weights layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightsFile {
    pub architecture: String,
    #[serde(default = "default_class_names")]
    pub class_names: Vec<String>,
    pub input_channels: usize,
    pub layers: Vec<LayerWeights>,
}

/// One dense layer as exported
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerWeights {
    pub units: usize,
    pub activation: Activation,
    pub kernel: Vec<f32>,
    pub bias: Vec<f32>,
}

fn default_class_names() -> Vec<String> {
    CLASS_NAMES.iter().map(|s| s.to_string()).collect()
}

impl WeightsFile {
    /// Export a classifier into the on-disk layout
    pub fn from_classifier(model: &RetinaClassifier) -> Self {
        let layers = model
            .layers
            .iter()
            .map(|layer| {
                let inputs = layer.input_size();
                let units = layer.output_size();
                let mut kernel = vec![0.0; inputs * units];
                for (j, row) in layer.weights.iter().enumerate() {
                    for (i, w) in row.iter().enumerate() {
                        kernel[i * units + j] = *w;
                    }
                }
                LayerWeights {
                    units,
                    activation: layer.activation,
                    kernel,
                    bias: layer.bias.clone(),
                }
            })
            .collect();

        Self {
            architecture: ARCHITECTURE.to_string(),
            class_names: model.class_names.clone(),
            input_channels: model.input_channels,
            layers,
        }
    }

    /// Rebuild the classifier, validating every kernel shape
    pub fn into_classifier(self) -> RetinoResult<RetinaClassifier> {
        if self.architecture != ARCHITECTURE {
            return Err(RetinoError::Load(format!(
                "unsupported architecture '{}'",
                self.architecture
            )));
        }

        let mut inputs = self.input_channels;
        let mut layers = Vec::with_capacity(self.layers.len());
        for (index, layer) in self.layers.into_iter().enumerate() {
            let units = layer.units;
            if units == 0 || layer.kernel.len() != inputs * units {
                return Err(RetinoError::Load(format!(
                    "layer {} kernel has {} values, expected {}x{}",
                    index,
                    layer.kernel.len(),
                    inputs,
                    units
                )));
            }

            let weights = (0..units)
                .map(|j| (0..inputs).map(|i| layer.kernel[i * units + j]).collect())
                .collect();
            layers.push(DenseLayer {
                weights,
                bias: layer.bias,
                activation: layer.activation,
            });
            inputs = units;
        }

        RetinaClassifier::new(self.class_names, self.input_channels, layers)
    }
}

/// Loader for JSON weights files
#[derive(Debug, Clone, Default)]
pub struct WeightsFileLoader;

impl WeightsFileLoader {
    /// Create a new weights-file loader
    pub fn new() -> Self {
        Self
    }
}

impl ModelLoader for WeightsFileLoader {
    fn load(&self, path: &Path) -> RetinoResult<RetinaClassifier> {
        let start = Instant::now();
        let bytes = std::fs::read(path).map_err(|e| {
            RetinoError::Load(format!("failed to read {}: {}", path.display(), e))
        })?;
        debug!(path = %path.display(), bytes = bytes.len(), "Read weights file");

        let weights: WeightsFile = serde_json::from_slice(&bytes)
            .map_err(|e| RetinoError::Load(format!("malformed weights file: {}", e)))?;
        let model = weights.into_classifier()?;

        info!(
            path = %path.display(),
            layers = model.layers.len(),
            classes = model.class_names.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Built classifier from weights"
        );
        Ok(model)
    }

    fn name(&self) -> &'static str {
        "weights-file"
    }
}
