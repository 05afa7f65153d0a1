//! Loader trait definitions

use async_trait::async_trait;
use retinonet_core::RetinoResult;
use std::path::Path;

use crate::classifier::RetinaClassifier;

/// Builds a classifier from a weights file.
///
/// Implementations block the calling thread, possibly for minutes, and are
/// run on the blocking pool by the lifecycle manager.
pub trait ModelLoader: Send + Sync {
    /// Load a model from the weights at `path`
    fn load(&self, path: &Path) -> RetinoResult<RetinaClassifier>;

    /// Get the loader name
    fn name(&self) -> &'static str;
}

/// Remote origin for weights that are not present locally
#[async_trait]
pub trait WeightsSource: Send + Sync {
    /// Download the weights to `dest`, returning the number of bytes written
    async fn fetch(&self, dest: &Path) -> RetinoResult<u64>;

    /// Human-readable origin, for logs
    fn describe(&self) -> String;
}
