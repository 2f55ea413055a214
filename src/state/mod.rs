//! Process-wide service state and the lazy model loader
//!
//! The state moves `Unloaded -> Loading -> Loaded`, or `Loading -> Failed` when the
//! loader errors. `Failed` is not terminal: the next caller retries. Loads are
//! serialized by `load_gate`, and every finished attempt bumps a generation counter.
//! A caller that queued behind an attempt takes that attempt's result instead of
//! starting another one.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info};

use crate::error::ModelError;
use crate::model::{Device, InputSpec, LoadedModel, ModelLoader};

/// Current load state
#[derive(Debug, Clone)]
pub enum LoadState {
    Unloaded,
    Loading,
    Loaded(LoadedModel),
    Failed(ModelError),
}

impl LoadState {
    pub fn phase(&self) -> LoadPhase {
        match self {
            LoadState::Unloaded => LoadPhase::Unloaded,
            LoadState::Loading => LoadPhase::Loading,
            LoadState::Loaded(_) => LoadPhase::Loaded,
            LoadState::Failed(_) => LoadPhase::Failed,
        }
    }
}

/// Load state without the model handle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LoadPhase {
    Unloaded,
    Loading,
    Loaded,
    Failed,
}

impl LoadPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadPhase::Unloaded => "unloaded",
            LoadPhase::Loading => "loading",
            LoadPhase::Loaded => "loaded",
            LoadPhase::Failed => "failed",
        }
    }
}

/// Point-in-time view of the service state
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub phase: LoadPhase,
    pub device: Device,
    pub model_name: String,
    pub last_error: Option<String>,
    pub load_attempts: u64,
    pub load_failures: u64,
}

impl StateSnapshot {
    pub fn model_loaded(&self) -> bool {
        self.phase == LoadPhase::Loaded
    }
}

struct Inner {
    load: LoadState,
    /// Device a load would target, then the device actually used
    device: Device,
    /// Number of finished load attempts
    generation: u64,
}

/// Shared service context: owns the loader and the single model instance
pub struct ServiceState {
    loader: Arc<dyn ModelLoader>,
    inner: RwLock<Inner>,
    load_gate: Mutex<()>,
    lazy_load: bool,
    load_attempts: AtomicU64,
    load_failures: AtomicU64,
}

impl ServiceState {
    pub fn new(loader: Arc<dyn ModelLoader>, lazy_load: bool) -> Self {
        let device = loader.select_device();
        Self {
            loader,
            inner: RwLock::new(Inner {
                load: LoadState::Unloaded,
                device,
                generation: 0,
            }),
            load_gate: Mutex::new(()),
            lazy_load,
            load_attempts: AtomicU64::new(0),
            load_failures: AtomicU64::new(0),
        }
    }

    pub fn model_name(&self) -> &str {
        self.loader.model_name()
    }

    pub fn input_spec(&self) -> InputSpec {
        self.loader.input_spec()
    }

    pub fn dimension(&self) -> usize {
        self.loader.dimension()
    }

    /// Device a load would target now, without touching the state lock
    pub fn preferred_device(&self) -> Device {
        self.loader.select_device()
    }

    /// The loaded model, if any. Never blocks on a load in progress.
    pub async fn loaded(&self) -> Option<LoadedModel> {
        match &self.inner.read().await.load {
            LoadState::Loaded(model) => Some(model.clone()),
            _ => None,
        }
    }

    pub async fn model_loaded(&self) -> bool {
        self.loaded().await.is_some()
    }

    /// Return the model, loading it first if needed.
    ///
    /// With `lazy_load` off only the first load is refused; once a load has been
    /// attempted (at startup) a failure is retried like any other.
    /// The load runs on its own task so a cancelled request cannot abandon it halfway.
    pub async fn ensure_loaded(self: &Arc<Self>) -> Result<LoadedModel, ModelError> {
        let generation = {
            let inner = self.inner.read().await;
            match &inner.load {
                LoadState::Loaded(model) => return Ok(model.clone()),
                LoadState::Unloaded if !self.lazy_load => {
                    return Err(ModelError::Unavailable(
                        "model is not loaded and lazy loading is disabled".to_string(),
                    ));
                }
                _ => inner.generation,
            }
        };

        self.spawn_load(generation).await
    }

    /// Load at startup, regardless of `lazy_load`
    pub async fn eager_load(self: &Arc<Self>) -> Result<LoadedModel, ModelError> {
        let generation = self.inner.read().await.generation;
        self.spawn_load(generation).await
    }

    async fn spawn_load(self: &Arc<Self>, generation: u64) -> Result<LoadedModel, ModelError> {
        let state = Arc::clone(self);
        tokio::spawn(async move { state.load_once(generation).await })
            .await
            .map_err(|e| ModelError::LoadFailed(format!("load task failed: {}", e)))?
    }

    /// Run one load attempt, unless an attempt finished after `observed` was read
    async fn load_once(&self, observed: u64) -> Result<LoadedModel, ModelError> {
        let _gate = self.load_gate.lock().await;

        {
            let inner = self.inner.read().await;
            match &inner.load {
                LoadState::Loaded(model) => {
                    debug!("Model already loaded by a concurrent request");
                    return Ok(model.clone());
                }
                LoadState::Failed(err) if inner.generation != observed => {
                    debug!(error = %err, "Concurrent load attempt failed, not retrying");
                    return Err(err.clone());
                }
                _ => {}
            }
        }

        let device = self.loader.select_device();
        {
            let mut inner = self.inner.write().await;
            inner.load = LoadState::Loading;
            inner.device = device;
        }
        let attempt = self.load_attempts.fetch_add(1, Ordering::SeqCst) + 1;

        info!(
            model = %self.loader.model_name(),
            %device,
            attempt,
            "Loading model"
        );
        let started = Instant::now();

        let result = self
            .loader
            .load(device)
            .await
            .and_then(|model| self.check_contract(model));

        let mut inner = self.inner.write().await;
        inner.generation += 1;
        match result {
            Ok(model) => {
                info!(
                    model = %self.loader.model_name(),
                    device = %model.device,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Model loaded"
                );
                inner.device = model.device;
                inner.load = LoadState::Loaded(model.clone());
                Ok(model)
            }
            Err(e) => {
                self.load_failures.fetch_add(1, Ordering::SeqCst);
                error!(model = %self.loader.model_name(), error = %e, "Model load failed");
                inner.load = LoadState::Failed(e.clone());
                Err(e)
            }
        }
    }

    fn check_contract(&self, model: LoadedModel) -> Result<LoadedModel, ModelError> {
        let expected = self.loader.dimension();
        let actual = model.encoder.dimension();
        if actual != expected {
            return Err(ModelError::LoadFailed(format!(
                "loaded model reports dimension {} (expected {})",
                actual, expected
            )));
        }
        if model.encoder.input_spec() != self.loader.input_spec() {
            return Err(ModelError::LoadFailed(format!(
                "loaded model expects {:?} (declared {:?})",
                model.encoder.input_spec(),
                self.loader.input_spec()
            )));
        }
        Ok(model)
    }

    pub async fn snapshot(&self) -> StateSnapshot {
        let inner = self.inner.read().await;
        let last_error = match &inner.load {
            LoadState::Failed(err) => Some(err.to_string()),
            _ => None,
        };
        StateSnapshot {
            phase: inner.load.phase(),
            device: inner.device,
            model_name: self.loader.model_name().to_string(),
            last_error,
            load_attempts: self.load_attempts.load(Ordering::SeqCst),
            load_failures: self.load_failures.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MockImageEncoder, MockModelLoader};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Fails the first `failures` loads, then succeeds
    struct FlakyLoader {
        failures: usize,
        dimension: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ModelLoader for FlakyLoader {
        fn model_name(&self) -> &str {
            "flaky"
        }

        fn input_spec(&self) -> InputSpec {
            InputSpec::square(8)
        }

        fn dimension(&self) -> usize {
            16
        }

        fn select_device(&self) -> Device {
            Device::Cuda
        }

        async fn load(&self, device: Device) -> Result<LoadedModel, ModelError> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(ModelError::LoadFailed("weights missing".to_string()));
            }
            Ok(LoadedModel {
                encoder: Arc::new(MockImageEncoder::new(InputSpec::square(8), self.dimension)),
                device,
            })
        }
    }

    fn flaky(failures: usize, dimension: usize) -> Arc<FlakyLoader> {
        Arc::new(FlakyLoader {
            failures,
            dimension,
            calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn test_concurrent_first_requests_load_once() {
        let loader = Arc::new(MockModelLoader::new("mock", InputSpec::square(8), 16));
        let state = Arc::new(ServiceState::new(loader.clone(), true));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let state = Arc::clone(&state);
                tokio::spawn(async move { state.ensure_loaded().await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        assert_eq!(loader.load_count(), 1);
        assert_eq!(state.snapshot().await.phase, LoadPhase::Loaded);
    }

    #[tokio::test]
    async fn test_failed_load_is_retried() {
        let loader = flaky(1, 16);
        let state = Arc::new(ServiceState::new(loader.clone(), true));

        let err = state.ensure_loaded().await.unwrap_err();
        assert!(matches!(err, ModelError::LoadFailed(_)));

        let snapshot = state.snapshot().await;
        assert_eq!(snapshot.phase, LoadPhase::Failed);
        assert!(snapshot.last_error.unwrap().contains("weights missing"));
        assert_eq!(snapshot.load_failures, 1);

        let model = state.ensure_loaded().await.unwrap();
        assert_eq!(model.device, Device::Cuda);
        let snapshot = state.snapshot().await;
        assert_eq!(snapshot.phase, LoadPhase::Loaded);
        assert_eq!(snapshot.load_attempts, 2);
        assert!(snapshot.last_error.is_none());
    }

    #[tokio::test]
    async fn test_waiters_share_failed_attempt() {
        let loader = flaky(usize::MAX, 16);
        let state = Arc::new(ServiceState::new(loader.clone(), true));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let state = Arc::clone(&state);
                tokio::spawn(async move { state.ensure_loaded().await })
            })
            .collect();
        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert!(matches!(err, ModelError::LoadFailed(msg) if msg.contains("weights missing")));
        }

        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
        assert_eq!(state.snapshot().await.load_failures, 1);

        // A later request starts a fresh attempt
        assert!(state.ensure_loaded().await.is_err());
        assert_eq!(loader.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_startup_load_retried_without_lazy_load() {
        let loader = flaky(1, 16);
        let state = Arc::new(ServiceState::new(loader.clone(), false));

        assert!(state.eager_load().await.is_err());
        assert_eq!(state.snapshot().await.phase, LoadPhase::Failed);

        let model = state.ensure_loaded().await.unwrap();
        assert_eq!(model.device, Device::Cuda);
        assert_eq!(loader.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_lazy_load_disabled() {
        let loader = flaky(0, 16);
        let state = Arc::new(ServiceState::new(loader.clone(), false));

        let err = state.ensure_loaded().await.unwrap_err();
        assert!(matches!(err, ModelError::Unavailable(_)));
        assert_eq!(loader.calls.load(Ordering::SeqCst), 0);

        state.eager_load().await.unwrap();
        assert!(state.ensure_loaded().await.is_ok());
    }

    #[tokio::test]
    async fn test_dimension_contract_checked_at_load() {
        let state = Arc::new(ServiceState::new(flaky(0, 32), true));

        let err = state.ensure_loaded().await.unwrap_err();
        assert!(matches!(err, ModelError::LoadFailed(msg) if msg.contains("dimension")));
        assert!(!state.model_loaded().await);
    }

    #[tokio::test]
    async fn test_snapshot_before_load() {
        let state = ServiceState::new(flaky(0, 16), true);
        let snapshot = state.snapshot().await;

        assert_eq!(snapshot.phase, LoadPhase::Unloaded);
        assert_eq!(snapshot.device, Device::Cuda);
        assert_eq!(snapshot.model_name, "flaky");
        assert!(!snapshot.model_loaded());
        assert_eq!(snapshot.load_attempts, 0);
    }
}
