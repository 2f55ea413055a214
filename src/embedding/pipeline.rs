//! Request orchestration: preprocess, ensure loaded, encode, normalize

use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use super::normalize::{EmbeddingVector, RawVector};
use crate::config::InferenceConfig;
use crate::error::{ModelError, Result, ServiceError};
use crate::model::Device;
use crate::observability::MetricsCollector;
use crate::preprocess::ImagePreprocessor;
use crate::state::ServiceState;

/// A finished embedding with the metadata reported to clients
#[derive(Debug, Clone)]
pub struct Embedding {
    pub vector: EmbeddingVector,
    pub model: String,
    pub device: Device,
}

impl Embedding {
    pub fn dimension(&self) -> usize {
        self.vector.len()
    }
}

/// Turns image bytes into unit-length embeddings using the shared model
pub struct EmbeddingPipeline {
    state: Arc<ServiceState>,
    preprocessor: Arc<ImagePreprocessor>,
    /// Bounds concurrent `encode` calls on the blocking pool
    permits: Arc<Semaphore>,
    metrics: Arc<MetricsCollector>,
}

impl EmbeddingPipeline {
    pub fn new(
        state: Arc<ServiceState>,
        inference: &InferenceConfig,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let concurrency = inference_concurrency(inference.max_concurrency, state.preferred_device());
        info!(concurrency, "Inference worker permits");

        Self {
            preprocessor: Arc::new(ImagePreprocessor::new(state.input_spec())),
            permits: Arc::new(Semaphore::new(concurrency)),
            state,
            metrics,
        }
    }

    pub fn dimension(&self) -> usize {
        self.state.dimension()
    }

    pub async fn embed(&self, image: Bytes) -> Result<Embedding> {
        // Decode first so bad uploads never trigger a model load
        let started = Instant::now();
        let preprocessor = Arc::clone(&self.preprocessor);
        let decoded = tokio::task::spawn_blocking(move || preprocessor.preprocess(&image)).await??;
        self.metrics.record_preprocess_latency(started.elapsed());
        debug!(
            source_width = decoded.source_width,
            source_height = decoded.source_height,
            "Image decoded"
        );

        let model = self.state.ensure_loaded().await?;

        let spec = model.encoder.input_spec();
        if !decoded.conforms_to(&spec) {
            return Err(ModelError::InputMismatch(format!(
                "preprocessed image is {}x{}, model expects {}x{}",
                decoded.width(),
                decoded.height(),
                spec.size,
                spec.size
            ))
            .into());
        }

        let _permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| ServiceError::Internal(format!("inference pool closed: {}", e)))?;

        let started = Instant::now();
        let encoder = Arc::clone(&model.encoder);
        let raw = tokio::task::spawn_blocking(move || encoder.encode(&decoded)).await??;
        self.metrics.record_inference_latency(started.elapsed());

        let expected = self.dimension();
        if raw.len() != expected {
            return Err(ModelError::DimensionMismatch {
                expected,
                actual: raw.len(),
            }
            .into());
        }

        let vector = RawVector::from(raw).normalize()?;

        Ok(Embedding {
            vector,
            model: self.state.model_name().to_string(),
            device: model.device,
        })
    }
}

/// Permits for concurrent inference. 0 derives a value from the device.
pub fn inference_concurrency(configured: usize, device: Device) -> usize {
    if configured > 0 {
        return configured;
    }
    match device {
        Device::Cuda => 1,
        Device::Cpu => std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1),
    }
}
