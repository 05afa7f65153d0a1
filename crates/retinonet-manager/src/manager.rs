//! Model lifecycle manager
//!
//! Loading the classifier can take minutes on a cold instance, so the manager
//! starts it in the background at startup and lets request handlers either
//! check readiness without blocking or wait for the model inline.
//!
//! Every load runs under a single load gate. Callers that arrive while a load
//! is in flight queue on the gate and find the model already published when
//! they get through, so the loader runs at most once per successful load. The
//! snapshot cache is read and written only while the gate is held.

use chrono::{DateTime, Utc};
use retinonet_core::{
    FailureKind, LoadFailure, LoadPhase, LoadSource, ModelConfig, ModelStatus, RetinoError,
    RetinoResult,
};
use retinonet_runtime::{ModelHandle, ModelLoader, RetinaClassifier, WeightsSource};
use retinonet_store::{HttpWeightsSource, SnapshotCache};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::retry::RetryPolicy;

/// A loader call that outlived its timeout and still owns the loader
type StalledLoad = JoinHandle<RetinoResult<RetinaClassifier>>;

/// Mutable lifecycle state, guarded by the slot lock
struct Slot {
    phase: LoadPhase,
    handle: Option<ModelHandle>,
    source: Option<LoadSource>,
    loaded_at: Option<DateTime<Utc>>,
    last_access: DateTime<Utc>,
    load_attempts: u32,
    consecutive_failures: u32,
    last_failure: Option<LoadFailure>,
    retry_at: Option<Instant>,
}

impl Slot {
    fn new() -> Self {
        Self {
            phase: LoadPhase::Unloaded,
            handle: None,
            source: None,
            loaded_at: None,
            last_access: Utc::now(),
            load_attempts: 0,
            consecutive_failures: 0,
            last_failure: None,
            retry_at: None,
        }
    }
}

struct Inner {
    model_path: PathBuf,
    cache: SnapshotCache,
    loader: Arc<dyn ModelLoader>,
    weights_source: Option<Arc<dyn WeightsSource>>,
    retry: RetryPolicy,
    load_timeout: Option<Duration>,
    /// Set once the handle is published; never cleared
    loaded: AtomicBool,
    slot: RwLock<Slot>,
    load_gate: Mutex<Option<StalledLoad>>,
    background: StdMutex<Option<JoinHandle<()>>>,
}

/// Builder for [`ModelManager`]
pub struct ManagerBuilder {
    model_path: PathBuf,
    cache: SnapshotCache,
    loader: Arc<dyn ModelLoader>,
    weights_source: Option<Arc<dyn WeightsSource>>,
    retry: RetryPolicy,
    load_timeout: Option<Duration>,
}

impl ManagerBuilder {
    /// Use a specific weights source instead of the configured URL
    pub fn weights_source(mut self, source: Arc<dyn WeightsSource>) -> Self {
        self.weights_source = Some(source);
        self
    }

    /// Override the retry policy
    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Override the loader time bound
    pub fn load_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.load_timeout = timeout;
        self
    }

    /// Create the cache directory and build the manager
    pub async fn build(self) -> RetinoResult<ModelManager> {
        self.cache.init().await?;

        info!(
            model_path = %self.model_path.display(),
            cache_path = %self.cache.path().display(),
            loader = self.loader.name(),
            weights_source = ?self.weights_source.as_ref().map(|s| s.describe()),
            "Model manager initialized"
        );

        Ok(ModelManager {
            inner: Arc::new(Inner {
                model_path: self.model_path,
                cache: self.cache,
                loader: self.loader,
                weights_source: self.weights_source,
                retry: self.retry,
                load_timeout: self.load_timeout,
                loaded: AtomicBool::new(false),
                slot: RwLock::new(Slot::new()),
                load_gate: Mutex::new(None),
                background: StdMutex::new(None),
            }),
        })
    }
}

/// Owns the classifier and coordinates loading it.
///
/// Cloning is cheap; every clone shares the same state.
#[derive(Clone)]
pub struct ModelManager {
    inner: Arc<Inner>,
}

impl ModelManager {
    /// Start building a manager from model configuration
    pub fn builder(config: &ModelConfig, loader: Arc<dyn ModelLoader>) -> ManagerBuilder {
        let weights_source = config
            .weights_url
            .as_ref()
            .map(|url| Arc::new(HttpWeightsSource::new(url.clone())) as Arc<dyn WeightsSource>);

        ManagerBuilder {
            model_path: config.model_path.clone(),
            cache: SnapshotCache::new(config.cache_dir.clone(), &config.cache_file),
            loader,
            weights_source,
            retry: RetryPolicy::from_config(config),
            load_timeout: config.load_timeout(),
        }
    }

    /// Create a manager with settings taken from configuration
    pub async fn new(config: &ModelConfig, loader: Arc<dyn ModelLoader>) -> RetinoResult<Self> {
        Self::builder(config, loader).build().await
    }

    /// Path of the source weights file
    pub fn model_path(&self) -> &Path {
        &self.inner.model_path
    }

    /// Path of the snapshot file
    pub fn cache_path(&self) -> &Path {
        self.inner.cache.path()
    }

    /// Start loading in a background task.
    ///
    /// Does nothing if the model is loaded or a background load is still
    /// running. Failures are logged and leave the model unloaded.
    pub fn start_background_load(&self) {
        if self.is_model_loaded() {
            debug!("Model already loaded, skipping background load");
            return;
        }

        let mut background = self
            .inner
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if background.as_ref().is_some_and(|task| !task.is_finished()) {
            info!("Model already loading in background");
            return;
        }

        let inner = Arc::clone(&self.inner);
        *background = Some(tokio::spawn(async move {
            // Aborting this task must not cut the load procedure short
            let load = tokio::spawn(async move { inner.ensure_loaded().await });
            match load.await {
                Ok(Ok(_)) => info!("Background model load finished"),
                Ok(Err(e)) => warn!(error = %e, "Background model load failed"),
                Err(e) => warn!(error = %e, "Background model load task failed"),
            }
        }));
        info!("Started background loading of model");
    }

    /// Whether a background load task is still running
    pub fn is_loading_in_background(&self) -> bool {
        self.inner
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Get the model, loading it inline if needed.
    ///
    /// Returns `None` when the model could not be loaded; the reason is logged
    /// and recorded in [`ModelManager::status`].
    pub async fn get_model(&self) -> Option<ModelHandle> {
        match self.try_get_model().await {
            Ok(handle) => Some(handle),
            Err(e) => {
                debug!(error = %e, "Model unavailable");
                None
            }
        }
    }

    /// Get the model, loading it inline if needed, with the failure reason.
    ///
    /// The load itself runs in its own task, so a caller that gives up
    /// waiting does not abandon a half-finished load.
    pub async fn try_get_model(&self) -> RetinoResult<ModelHandle> {
        self.inner.touch().await;
        if let Some(handle) = self.inner.loaded_handle().await {
            return Ok(handle);
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.ensure_loaded().await })
            .await
            .map_err(|e| RetinoError::Internal(format!("model load task failed: {}", e)))?
    }

    /// Check whether the model is loaded. Never triggers a load.
    pub fn is_model_loaded(&self) -> bool {
        self.inner.loaded.load(Ordering::Acquire)
    }

    /// Current lifecycle status
    pub async fn status(&self) -> ModelStatus {
        let slot = self.inner.slot.read().await;
        let retry_in_secs = slot
            .retry_at
            .map(|at| at.saturating_duration_since(Instant::now()))
            .filter(|remaining| !remaining.is_zero())
            .map(ceil_secs);

        ModelStatus {
            phase: slot.phase,
            loaded: self.is_model_loaded(),
            source: slot.source,
            loaded_at: slot.loaded_at,
            last_access: slot.last_access,
            load_attempts: slot.load_attempts,
            consecutive_failures: slot.consecutive_failures,
            last_failure: slot.last_failure.clone(),
            retry_in_secs,
        }
    }

    /// Stop watching the background load.
    ///
    /// A load already in progress is left to finish and publish its result,
    /// so the lifecycle state stays consistent and the loader never runs
    /// twice at once.
    pub async fn shutdown(&self) {
        let task = self
            .inner
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(task) = task {
            if !task.is_finished() {
                info!("Detaching from background model load");
                task.abort();
            }
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "Background model load task panicked");
                }
            }
        }
    }
}

impl Inner {
    async fn touch(&self) {
        self.slot.write().await.last_access = Utc::now();
    }

    async fn loaded_handle(&self) -> Option<ModelHandle> {
        if !self.loaded.load(Ordering::Acquire) {
            return None;
        }
        self.slot.read().await.handle.clone()
    }

    /// Load procedure shared by the background and inline paths
    async fn ensure_loaded(&self) -> RetinoResult<ModelHandle> {
        if let Some(handle) = self.loaded_handle().await {
            return Ok(handle);
        }

        let mut stalled = self.load_gate.lock().await;

        // Another load may have finished while we waited on the gate
        if let Some(handle) = self.loaded_handle().await {
            debug!("Model loaded by a concurrent caller");
            return Ok(handle);
        }

        self.check_retry_window().await?;
        self.begin_attempt().await;

        match self.run_load(&mut stalled).await {
            Ok((model, source)) => {
                let handle = Arc::new(model);
                self.publish(Arc::clone(&handle), source).await;

                if source == LoadSource::Weights {
                    if let Err(e) = self.cache.write(&*handle).await {
                        warn!(error = %e, "Failed to save model to cache");
                    }
                }
                Ok(handle)
            }
            Err(e) => {
                self.record_failure(&e).await;
                Err(e)
            }
        }
    }

    async fn check_retry_window(&self) -> RetinoResult<()> {
        let slot = self.slot.read().await;
        let Some(retry_at) = slot.retry_at else {
            return Ok(());
        };

        let now = Instant::now();
        if now >= retry_at {
            return Ok(());
        }

        // A weights file that has appeared since the last attempt is worth
        // trying right away
        let source_missing = slot
            .last_failure
            .as_ref()
            .is_some_and(|f| f.kind == FailureKind::SourceMissing);
        if source_missing && self.model_path.exists() {
            info!(path = %self.model_path.display(), "Model file now present, retrying load");
            return Ok(());
        }

        Err(RetinoError::RetryDeferred(retry_at - now))
    }

    async fn begin_attempt(&self) {
        let mut slot = self.slot.write().await;
        slot.phase = LoadPhase::Loading;
        slot.load_attempts += 1;
    }

    async fn run_load(
        &self,
        stalled: &mut Option<StalledLoad>,
    ) -> RetinoResult<(RetinaClassifier, LoadSource)> {
        if let Some(pending) = stalled.take() {
            if !pending.is_finished() {
                *stalled = Some(pending);
                warn!("Previous model load is still running past its timeout");
                return Err(RetinoError::LoadTimedOut(self.load_timeout.unwrap_or_default()));
            }

            info!("Using result of previously timed-out model load");
            let model = pending
                .await
                .map_err(|e| RetinoError::Load(format!("loader task failed: {}", e)))??;
            return Ok((model, LoadSource::Weights));
        }

        if let Some(model) = self.load_from_cache().await {
            return Ok((model, LoadSource::Cache));
        }

        self.ensure_source().await?;
        let model = self.load_from_weights(stalled).await?;
        Ok((model, LoadSource::Weights))
    }

    async fn load_from_cache(&self) -> Option<RetinaClassifier> {
        let path = self.cache.path();
        match self.cache.read::<RetinaClassifier>().await {
            Ok(Some(model)) => match model.validate() {
                Ok(()) => {
                    info!(path = %path.display(), "Successfully loaded model from cache");
                    Some(model)
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Cached model failed validation");
                    if let Err(e) = self.cache.remove().await {
                        warn!(error = %e, "Failed to remove invalid model snapshot");
                    }
                    None
                }
            },
            Ok(None) => {
                debug!(path = %path.display(), "No model snapshot in cache");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to load from cache");
                None
            }
        }
    }

    async fn ensure_source(&self) -> RetinoResult<()> {
        if self.model_path.exists() {
            return Ok(());
        }

        match &self.weights_source {
            Some(source) => {
                let fetch = source.fetch(&self.model_path);
                match self.load_timeout {
                    Some(limit) => match tokio::time::timeout(limit, fetch).await {
                        Ok(fetched) => fetched?,
                        Err(_) => {
                            error!(
                                source = %source.describe(),
                                timeout_secs = limit.as_secs_f64(),
                                "Weights download timed out"
                            );
                            return Err(RetinoError::LoadTimedOut(limit));
                        }
                    },
                    None => fetch.await?,
                };
                Ok(())
            }
            None => {
                error!(path = %self.model_path.display(), "Model file not found");
                Err(RetinoError::SourceMissing(self.model_path.clone()))
            }
        }
    }

    async fn load_from_weights(
        &self,
        stalled: &mut Option<StalledLoad>,
    ) -> RetinoResult<RetinaClassifier> {
        let loader = Arc::clone(&self.loader);
        let path = self.model_path.clone();

        info!(
            path = %path.display(),
            loader = loader.name(),
            "Loading model from weights"
        );
        let start = Instant::now();
        let mut task = tokio::task::spawn_blocking(move || loader.load(&path));

        let joined = match self.load_timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut task).await.ok() {
                Some(joined) => joined,
                None => {
                    error!(
                        timeout_secs = limit.as_secs_f64(),
                        "Model load timed out"
                    );
                    *stalled = Some(task);
                    return Err(RetinoError::LoadTimedOut(limit));
                }
            },
            None => task.await,
        };

        let model = joined.map_err(|e| RetinoError::Load(format!("loader task failed: {}", e)))??;
        info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Model loaded successfully"
        );
        Ok(model)
    }

    async fn publish(&self, handle: ModelHandle, source: LoadSource) {
        let mut slot = self.slot.write().await;
        slot.handle = Some(handle);
        slot.phase = LoadPhase::Loaded;
        slot.source = Some(source);
        slot.loaded_at = Some(Utc::now());
        slot.consecutive_failures = 0;
        slot.last_failure = None;
        slot.retry_at = None;
        self.loaded.store(true, Ordering::Release);
    }

    async fn record_failure(&self, err: &RetinoError) {
        let mut slot = self.slot.write().await;
        slot.phase = LoadPhase::Unloaded;
        slot.consecutive_failures += 1;

        let delay = self.retry.delay(slot.consecutive_failures);
        slot.retry_at = (!delay.is_zero()).then(|| Instant::now() + delay);
        slot.last_failure = Some(LoadFailure {
            kind: FailureKind::of(err),
            message: err.to_string(),
            at: Utc::now(),
        });

        error!(
            error = %err,
            failures = slot.consecutive_failures,
            retry_in_ms = delay.as_millis() as u64,
            "Error loading model"
        );
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use retinonet_core::{ImageTensor, CLASS_NAMES};
    use retinonet_runtime::{Activation, DenseLayer, WeightsFile, WeightsFileLoader};
    use std::sync::atomic::AtomicUsize;

    fn sample_model() -> RetinaClassifier {
        RetinaClassifier::new(
            CLASS_NAMES.iter().map(|s| s.to_string()).collect(),
            3,
            vec![DenseLayer {
                weights: vec![
                    vec![1.0, 0.0, 0.0],
                    vec![0.0, 1.0, 0.0],
                    vec![0.0, 0.0, 1.0],
                    vec![-1.0, -1.0, -1.0],
                ],
                bias: vec![0.0, 0.0, 0.0, 1.0],
                activation: Activation::Sigmoid,
            }],
        )
        .unwrap()
    }

    fn write_weights(path: &Path) {
        let file = WeightsFile::from_classifier(&sample_model());
        std::fs::write(path, serde_json::to_vec(&file).unwrap()).unwrap();
    }

    /// Loader that counts calls and can be slow or failing
    struct CountingLoader {
        calls: AtomicUsize,
        delay: Duration,
        fail: bool,
    }

    impl CountingLoader {
        fn new() -> Arc<Self> {
            Self::with(Duration::ZERO, false)
        }

        fn with(delay: Duration, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay,
                fail,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ModelLoader for CountingLoader {
        fn load(&self, _path: &Path) -> RetinoResult<RetinaClassifier> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            if self.fail {
                return Err(RetinoError::Load("out of memory".to_string()));
            }
            Ok(sample_model())
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    /// Weights source that writes the sample weights locally
    struct LocalSource {
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl WeightsSource for LocalSource {
        async fn fetch(&self, dest: &Path) -> RetinoResult<u64> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            write_weights(dest);
            Ok(std::fs::metadata(dest)?.len())
        }

        fn describe(&self) -> String {
            "local".to_string()
        }
    }

    fn config(dir: &Path) -> ModelConfig {
        ModelConfig {
            model_path: dir.join("model").join("weights.json"),
            cache_dir: dir.join("cache"),
            ..ModelConfig::default()
        }
    }

    async fn manager(config: &ModelConfig, loader: Arc<dyn ModelLoader>) -> ModelManager {
        ModelManager::builder(config, loader)
            .retry_policy(RetryPolicy::none())
            .build()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_new_creates_cache_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let manager = ModelManager::new(&config, CountingLoader::new()).await.unwrap();

        assert!(config.cache_dir.is_dir());
        assert_eq!(manager.cache_path(), config.cache_path());
        assert!(!manager.is_model_loaded());
        assert_eq!(manager.status().await.phase, LoadPhase::Unloaded);
    }

    #[tokio::test]
    async fn test_missing_source_then_remediation() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        // Default backoff: the remediated file must still be picked up at once
        let manager = ModelManager::new(&config, Arc::new(WeightsFileLoader::new()))
            .await
            .unwrap();

        assert!(!manager.is_model_loaded());
        assert!(manager.get_model().await.is_none());

        let status = manager.status().await;
        assert_eq!(status.phase, LoadPhase::Unloaded);
        let failure = status.last_failure.unwrap();
        assert_eq!(failure.kind, FailureKind::SourceMissing);
        assert!(status.retry_in_secs.is_some());

        std::fs::create_dir_all(config.model_path.parent().unwrap()).unwrap();
        write_weights(&config.model_path);

        let handle = manager.get_model().await.expect("model after remediation");
        assert_eq!(handle.class_names.len(), 4);
        assert!(manager.is_model_loaded());
        assert!(config.cache_path().is_file());

        let status = manager.status().await;
        assert_eq!(status.phase, LoadPhase::Loaded);
        assert_eq!(status.source, Some(LoadSource::Weights));
        assert!(status.last_failure.is_none());
        assert_eq!(status.load_attempts, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_load() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        std::fs::create_dir_all(config.model_path.parent().unwrap()).unwrap();
        write_weights(&config.model_path);

        let loader = CountingLoader::with(Duration::from_millis(200), false);
        let manager = manager(&config, loader.clone()).await;

        manager.start_background_load();
        manager.start_background_load();

        let callers = (0..8).map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.get_model().await })
        });
        let handles: Vec<ModelHandle> = futures::future::join_all(callers)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().expect("model handle"))
            .collect();

        assert_eq!(loader.calls(), 1);
        assert!(handles.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
        assert_eq!(manager.status().await.load_attempts, 1);
    }

    #[tokio::test]
    async fn test_background_load_is_idempotent_once_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        std::fs::create_dir_all(config.model_path.parent().unwrap()).unwrap();
        write_weights(&config.model_path);

        let loader = CountingLoader::new();
        let manager = manager(&config, loader.clone()).await;
        manager.get_model().await.unwrap();
        let written = std::fs::metadata(config.cache_path()).unwrap().modified().unwrap();

        for _ in 0..3 {
            manager.start_background_load();
            assert!(!manager.is_loading_in_background());
        }
        manager.get_model().await.unwrap();

        assert_eq!(loader.calls(), 1);
        let after = std::fs::metadata(config.cache_path()).unwrap().modified().unwrap();
        assert_eq!(written, after);
    }

    #[tokio::test]
    async fn test_background_load_publishes_model() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        std::fs::create_dir_all(config.model_path.parent().unwrap()).unwrap();
        write_weights(&config.model_path);

        let loader = CountingLoader::with(Duration::from_millis(50), false);
        let manager = manager(&config, loader.clone()).await;
        manager.start_background_load();
        assert!(!manager.is_model_loaded());

        for _ in 0..100 {
            if manager.is_model_loaded() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(manager.is_model_loaded());
        assert_eq!(loader.calls(), 1);
    }

    #[tokio::test]
    async fn test_cache_bypasses_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let cache = SnapshotCache::new(config.cache_dir.clone(), &config.cache_file);
        cache.write(&sample_model()).await.unwrap();

        let loader = CountingLoader::new();
        let manager = manager(&config, loader.clone()).await;

        let handle = manager.get_model().await.expect("model from cache");
        assert_eq!(*handle, sample_model());
        assert_eq!(loader.calls(), 0);
        assert_eq!(manager.status().await.source, Some(LoadSource::Cache));
    }

    #[tokio::test]
    async fn test_snapshot_reload_skips_loader() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        std::fs::create_dir_all(config.model_path.parent().unwrap()).unwrap();
        write_weights(&config.model_path);

        let first_loader = CountingLoader::new();
        let first = manager(&config, first_loader.clone()).await;
        let original = first.get_model().await.unwrap();
        assert_eq!(first_loader.calls(), 1);

        // A fresh instance, as after a cold start
        let second_loader = CountingLoader::new();
        let second = manager(&config, second_loader.clone()).await;
        let restored = second.get_model().await.unwrap();
        assert_eq!(second_loader.calls(), 0);

        let image = ImageTensor::from_rgb8(2, 1, &[200, 10, 30, 180, 20, 40]).unwrap();
        assert_eq!(
            original.predict(&image).unwrap(),
            restored.predict(&image).unwrap()
        );
    }

    #[tokio::test]
    async fn test_corrupt_cache_falls_through_to_weights() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        std::fs::create_dir_all(config.model_path.parent().unwrap()).unwrap();
        write_weights(&config.model_path);
        std::fs::create_dir_all(&config.cache_dir).unwrap();
        std::fs::write(config.cache_path(), b"\x80\x04\x95 stale pickle").unwrap();

        let loader = CountingLoader::new();
        let manager = manager(&config, loader.clone()).await;

        assert!(manager.get_model().await.is_some());
        assert_eq!(loader.calls(), 1);
        assert_eq!(manager.status().await.source, Some(LoadSource::Weights));
        // Replaced by a fresh snapshot
        let cache = SnapshotCache::new(config.cache_dir.clone(), &config.cache_file);
        assert!(cache.read::<RetinaClassifier>().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cache_write_failure_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        std::fs::create_dir_all(config.model_path.parent().unwrap()).unwrap();
        write_weights(&config.model_path);
        // A directory where the snapshot file should go
        std::fs::create_dir_all(config.cache_path()).unwrap();

        let loader = CountingLoader::new();
        let manager = manager(&config, loader.clone()).await;

        assert!(manager.get_model().await.is_some());
        assert!(manager.is_model_loaded());
        assert!(config.cache_path().is_dir());
    }

    #[tokio::test]
    async fn test_loader_failure_is_retriable() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        std::fs::create_dir_all(config.model_path.parent().unwrap()).unwrap();
        write_weights(&config.model_path);

        let loader = CountingLoader::with(Duration::ZERO, true);
        let manager = manager(&config, loader.clone()).await;

        assert!(manager.get_model().await.is_none());
        assert!(manager.get_model().await.is_none());
        assert_eq!(loader.calls(), 2);

        let status = manager.status().await;
        assert_eq!(status.consecutive_failures, 2);
        assert_eq!(status.last_failure.unwrap().kind, FailureKind::Load);
        assert!(!config.cache_path().exists());
    }

    #[tokio::test]
    async fn test_backoff_defers_retry() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        std::fs::create_dir_all(config.model_path.parent().unwrap()).unwrap();
        write_weights(&config.model_path);

        let loader = CountingLoader::with(Duration::ZERO, true);
        let manager = ModelManager::builder(&config, loader.clone())
            .retry_policy(RetryPolicy::new(
                Duration::from_secs(60),
                Duration::from_secs(60),
            ))
            .build()
            .await
            .unwrap();

        assert!(matches!(
            manager.try_get_model().await,
            Err(RetinoError::Load(_))
        ));
        assert!(matches!(
            manager.try_get_model().await,
            Err(RetinoError::RetryDeferred(_))
        ));
        assert_eq!(loader.calls(), 1);
        assert_eq!(manager.status().await.retry_in_secs, Some(60));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_timed_out_load_is_not_duplicated() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        std::fs::create_dir_all(config.model_path.parent().unwrap()).unwrap();
        write_weights(&config.model_path);

        let loader = CountingLoader::with(Duration::from_millis(400), false);
        let manager = ModelManager::builder(&config, loader.clone())
            .retry_policy(RetryPolicy::none())
            .load_timeout(Some(Duration::from_millis(50)))
            .build()
            .await
            .unwrap();

        assert!(matches!(
            manager.try_get_model().await,
            Err(RetinoError::LoadTimedOut(_))
        ));
        assert_eq!(
            manager.status().await.last_failure.unwrap().kind,
            FailureKind::TimedOut
        );

        // The stalled call still owns the loader
        assert!(manager.get_model().await.is_none());
        assert_eq!(loader.calls(), 1);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(manager.get_model().await.is_some());
        assert_eq!(loader.calls(), 1);
        assert!(config.cache_path().is_file());
    }

    #[tokio::test]
    async fn test_weights_source_fills_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let source = Arc::new(LocalSource {
            fetches: AtomicUsize::new(0),
        });

        let manager = ModelManager::builder(&config, Arc::new(WeightsFileLoader::new()))
            .weights_source(source.clone())
            .build()
            .await
            .unwrap();

        assert!(manager.get_model().await.is_some());
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
        assert!(config.model_path.is_file());
    }

    #[tokio::test]
    async fn test_readiness_check_never_loads() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        std::fs::create_dir_all(config.model_path.parent().unwrap()).unwrap();
        write_weights(&config.model_path);

        let loader = CountingLoader::new();
        let manager = manager(&config, loader.clone()).await;

        for _ in 0..10 {
            assert!(!manager.is_model_loaded());
        }
        assert_eq!(loader.calls(), 0);
        assert_eq!(manager.status().await.load_attempts, 0);
    }

    #[tokio::test]
    async fn test_readiness_while_loading() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        std::fs::create_dir_all(config.model_path.parent().unwrap()).unwrap();
        write_weights(&config.model_path);

        let loader = CountingLoader::with(Duration::from_millis(300), false);
        let manager = manager(&config, loader.clone()).await;
        manager.start_background_load();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let start = Instant::now();
        assert!(!manager.is_model_loaded());
        assert!(start.elapsed() < Duration::from_millis(50));
        assert_eq!(manager.status().await.phase, LoadPhase::Loading);
        assert!(manager.is_loading_in_background());

        manager.shutdown().await;
        assert!(!manager.is_loading_in_background());
    }

    /// Weights source whose download never completes
    struct HangingSource;

    #[async_trait]
    impl WeightsSource for HangingSource {
        async fn fetch(&self, _dest: &Path) -> RetinoResult<u64> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(0)
        }

        fn describe(&self) -> String {
            "hanging".to_string()
        }
    }

    #[tokio::test]
    async fn test_hung_download_is_bounded_by_load_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let loader = CountingLoader::new();
        let manager = ModelManager::builder(&config, loader.clone())
            .weights_source(Arc::new(HangingSource))
            .retry_policy(RetryPolicy::none())
            .load_timeout(Some(Duration::from_millis(100)))
            .build()
            .await
            .unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), manager.try_get_model())
            .await
            .expect("load gate released after the download timed out");
        assert!(matches!(result, Err(RetinoError::LoadTimedOut(_))));

        let status = manager.status().await;
        assert_eq!(status.phase, LoadPhase::Unloaded);
        assert_eq!(status.last_failure.unwrap().kind, FailureKind::TimedOut);
        assert_eq!(loader.calls(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_mid_load_keeps_single_loader() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        std::fs::create_dir_all(config.model_path.parent().unwrap()).unwrap();
        write_weights(&config.model_path);

        let loader = CountingLoader::with(Duration::from_millis(300), false);
        let manager = manager(&config, loader.clone()).await;
        manager.start_background_load();
        tokio::time::sleep(Duration::from_millis(50)).await;

        manager.shutdown().await;
        assert!(!manager.is_loading_in_background());

        let first = manager.get_model().await.unwrap();
        assert_eq!(loader.calls(), 1);
        assert_eq!(manager.status().await.phase, LoadPhase::Loaded);
        assert!(Arc::ptr_eq(&first, &manager.get_model().await.unwrap()));
    }

    #[test]
    fn test_ceil_secs() {
        assert_eq!(ceil_secs(Duration::from_millis(1)), 1);
        assert_eq!(ceil_secs(Duration::from_secs(2)), 2);
        assert_eq!(ceil_secs(Duration::from_millis(2500)), 3);
    }
}
