//! retinonet-runtime: Model loading and inference
//!
//! This crate provides the collaborators the lifecycle manager drives:
//! - The `ModelLoader` and `WeightsSource` traits
//! - The retinal-scan classifier and its prediction path
//! - A loader for JSON weights files

pub mod classifier;
pub mod loader;
pub mod traits;

pub use classifier::{Activation, DenseLayer, ModelHandle, RetinaClassifier};
pub use loader::{LayerWeights, WeightsFile, WeightsFileLoader};
pub use traits::{ModelLoader, WeightsSource};
