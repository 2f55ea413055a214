//! Model adapter boundary for vision embedding models

pub mod mock;
#[cfg(feature = "onnx")]
pub mod onnx;

pub use mock::{MockImageEncoder, MockModelLoader};
#[cfg(feature = "onnx")]
pub use onnx::{OnnxClipEncoder, OnnxClipLoader};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::config::{ModelBackend, ModelConfig};
use crate::error::{ModelError, Result};
use crate::preprocess::DecodedImage;

/// Compute device a model runs on
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cpu,
    Cuda,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda => write!(f, "cuda"),
        }
    }
}

/// Pixel layout a model accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSpec {
    /// Square resolution (width == height)
    pub size: u32,
    pub channels: usize,
}

impl InputSpec {
    pub const RGB_CHANNELS: usize = 3;

    /// Square RGB input
    pub fn square(size: u32) -> Self {
        Self {
            size,
            channels: Self::RGB_CHANNELS,
        }
    }

    /// Number of bytes in a conforming pixel buffer
    pub fn pixel_len(&self) -> usize {
        self.size as usize * self.size as usize * self.channels
    }
}

/// A loaded image embedding model.
///
/// `encode` is blocking and may run concurrently on the same instance;
/// implementations serialize internally when their device requires it.
pub trait ImageEncoder: Send + Sync {
    /// Produce the raw (not yet normalized) embedding for one image
    fn encode(&self, image: &DecodedImage) -> std::result::Result<Vec<f32>, ModelError>;

    /// Length of the vectors `encode` returns
    fn dimension(&self) -> usize;

    /// Pixel layout `encode` accepts
    fn input_spec(&self) -> InputSpec;
}

/// A model instance together with the device it ended up on
#[derive(Clone)]
pub struct LoadedModel {
    pub encoder: Arc<dyn ImageEncoder>,
    pub device: Device,
}

impl fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModel")
            .field("device", &self.device)
            .field("dimension", &self.encoder.dimension())
            .finish_non_exhaustive()
    }
}

/// Builds model instances. Declares the model's contract before anything is loaded.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    /// Identifier reported to clients
    fn model_name(&self) -> &str;

    /// Declared input contract
    fn input_spec(&self) -> InputSpec;

    /// Declared output dimension
    fn dimension(&self) -> usize;

    /// Device a load would target right now
    fn select_device(&self) -> Device;

    /// Instantiate the model. Called at most once at a time.
    async fn load(&self, device: Device) -> std::result::Result<LoadedModel, ModelError>;
}

/// Create the loader for the configured backend
pub fn loader_from_config(config: &ModelConfig) -> Result<Arc<dyn ModelLoader>> {
    match config.backend {
        ModelBackend::Mock => Ok(Arc::new(MockModelLoader::from_config(config))),
        #[cfg(feature = "onnx")]
        ModelBackend::Onnx => Ok(Arc::new(OnnxClipLoader::new(config.clone()))),
        #[cfg(not(feature = "onnx"))]
        ModelBackend::Onnx => Err(crate::error::ServiceError::Config(
            "onnx backend requested but the crate was built without the `onnx` feature".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Device::Cuda).unwrap(), "\"cuda\"");
        assert_eq!(Device::Cpu.to_string(), "cpu");
    }

    #[test]
    fn test_input_spec_pixel_len() {
        assert_eq!(InputSpec::square(224).pixel_len(), 224 * 224 * 3);
    }

    #[test]
    fn test_mock_loader_from_config() {
        let config = ModelConfig {
            backend: ModelBackend::Mock,
            ..ModelConfig::default()
        };
        let loader = loader_from_config(&config).unwrap();
        assert_eq!(loader.dimension(), 512);
        assert_eq!(loader.input_spec(), InputSpec::square(224));
        assert_eq!(loader.select_device(), Device::Cpu);
    }
}
