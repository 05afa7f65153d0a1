//! Retinal-scan classifier
//!
//! The classifier pools an image into per-channel means and runs them through
//! a stack of dense layers. It is immutable once built, so a single instance is
//! shared by every request handler through a [`ModelHandle`].

use retinonet_core::{ImageTensor, Prediction, RetinoError, RetinoResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Shared, read-only reference to a loaded classifier
pub type ModelHandle = Arc<RetinaClassifier>;

/// Layer activation function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Relu,
    Sigmoid,
    Linear,
}

impl Activation {
    fn apply(self, x: f32) -> f32 {
        match self {
            Activation::Relu => x.max(0.0),
            Activation::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Activation::Linear => x,
        }
    }
}

/// Fully connected layer, weights stored as `[output][input]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseLayer {
    pub weights: Vec<Vec<f32>>,
    pub bias: Vec<f32>,
    pub activation: Activation,
}

impl DenseLayer {
    /// Number of inputs the layer expects
    pub fn input_size(&self) -> usize {
        self.weights.first().map_or(0, Vec::len)
    }

    /// Number of outputs the layer produces
    pub fn output_size(&self) -> usize {
        self.weights.len()
    }

    fn forward(&self, input: &[f32]) -> Vec<f32> {
        self.weights
            .iter()
            .zip(&self.bias)
            .map(|(row, bias)| {
                let sum: f32 = row.iter().zip(input).map(|(w, x)| w * x).sum();
                self.activation.apply(sum + bias)
            })
            .collect()
    }
}

/// Image classifier: global average pooling followed by dense layers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetinaClassifier {
    pub class_names: Vec<String>,
    pub input_channels: usize,
    pub layers: Vec<DenseLayer>,
}

impl RetinaClassifier {
    /// Build a classifier, checking that layer shapes chain together
    pub fn new(
        class_names: Vec<String>,
        input_channels: usize,
        layers: Vec<DenseLayer>,
    ) -> RetinoResult<Self> {
        let classifier = Self {
            class_names,
            input_channels,
            layers,
        };
        classifier.validate()?;
        Ok(classifier)
    }

    /// Check internal shape consistency
    pub fn validate(&self) -> RetinoResult<()> {
        if self.layers.is_empty() {
            return Err(RetinoError::Load("classifier has no layers".to_string()));
        }

        let mut width = self.input_channels;
        for (index, layer) in self.layers.iter().enumerate() {
            if layer.output_size() == 0 {
                return Err(RetinoError::Load(format!("layer {} has no units", index)));
            }
            if layer.bias.len() != layer.output_size() {
                return Err(RetinoError::Load(format!(
                    "layer {} has {} biases for {} units",
                    index,
                    layer.bias.len(),
                    layer.output_size()
                )));
            }
            if layer.weights.iter().any(|row| row.len() != width) {
                return Err(RetinoError::Load(format!(
                    "layer {} expects {} inputs per unit",
                    index, width
                )));
            }
            width = layer.output_size();
        }

        if width != self.class_names.len() {
            return Err(RetinoError::Load(format!(
                "output layer has {} units for {} classes",
                width,
                self.class_names.len()
            )));
        }
        Ok(())
    }

    /// Score an image
    pub fn predict(&self, image: &ImageTensor) -> RetinoResult<Prediction> {
        if image.channels != self.input_channels {
            return Err(RetinoError::Inference(format!(
                "model expects {} channels, image has {}",
                self.input_channels, image.channels
            )));
        }

        let mut activations = image.channel_means();
        for layer in &self.layers {
            activations = layer.forward(&activations);
        }

        Ok(Prediction::new(&self.class_names, &activations))
    }
}
