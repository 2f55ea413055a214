//! CLIP vision encoder through ONNX Runtime
//!
//! Expects a CLIP image tower exported to ONNX with one `[1, 3, H, W]` float input
//! (pixel values normalized with the CLIP mean/std) and an image-embedding output of
//! shape `[1, D]` or `[D]`. The CUDA execution provider is used when requested or,
//! with device `auto`, when available; a CUDA failure under `auto` falls back to CPU.

use anyhow::{Context, Result as AnyResult};
use async_trait::async_trait;
use ndarray::Array4;
use ort::execution_providers::{CPUExecutionProvider, CUDAExecutionProvider, ExecutionProvider};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};
use tracing::{debug, info, warn};

use super::{Device, ImageEncoder, InputSpec, LoadedModel, ModelLoader};
use crate::config::{DevicePreference, ModelConfig};
use crate::error::ModelError;
use crate::preprocess::DecodedImage;

/// CLIP image normalization mean (RGB)
pub const CLIP_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];

/// CLIP image normalization std (RGB)
pub const CLIP_STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_11];

/// Convert RGB pixels into a normalized NCHW tensor `[1, 3, H, W]`
pub fn to_clip_tensor(image: &DecodedImage) -> Array4<f32> {
    let width = image.width() as usize;
    let height = image.height() as usize;
    let pixels = image.pixels();
    let mut tensor = Array4::zeros((1, 3, height, width));

    for y in 0..height {
        for x in 0..width {
            let idx = (y * width + x) * 3;
            for c in 0..3 {
                let value = pixels[idx + c] as f32 / 255.0;
                tensor[[0, c, y, x]] = (value - CLIP_MEAN[c]) / CLIP_STD[c];
            }
        }
    }

    tensor
}

/// ONNX Runtime session wrapping a CLIP vision encoder
pub struct OnnxClipEncoder {
    /// `Session::run` needs exclusive access
    session: Mutex<Session>,
    input_name: String,
    output_name: Option<String>,
    spec: InputSpec,
    dimension: usize,
}

impl std::fmt::Debug for OnnxClipEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxClipEncoder")
            .field("input_name", &self.input_name)
            .field("output_name", &self.output_name)
            .field("spec", &self.spec)
            .field("dimension", &self.dimension)
            .finish_non_exhaustive()
    }
}

impl OnnxClipEncoder {
    fn run(&self, tensor: Array4<f32>) -> AnyResult<Vec<f32>> {
        let input = Value::from_array(tensor).context("Failed to create input tensor")?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| anyhow::anyhow!("ONNX session lock poisoned"))?;
        let outputs = session.run(ort::inputs![self.input_name.as_str() => input])?;

        let output = match &self.output_name {
            Some(name) => outputs
                .get(name.as_str())
                .with_context(|| format!("Model has no output named '{}'", name))?,
            None => &outputs[0],
        };

        let array = output
            .try_extract_array::<f32>()
            .context("Failed to extract output tensor")?;
        debug!(shape = ?array.shape(), "ONNX inference finished");

        Ok(array.iter().copied().collect())
    }
}

impl ImageEncoder for OnnxClipEncoder {
    fn encode(&self, image: &DecodedImage) -> Result<Vec<f32>, ModelError> {
        if !image.conforms_to(&self.spec) {
            return Err(ModelError::InputMismatch(format!(
                "expected {}x{} RGB, got {}x{}",
                self.spec.size,
                self.spec.size,
                image.width(),
                image.height()
            )));
        }

        self.run(to_clip_tensor(image))
            .map_err(|e| ModelError::Inference(format!("{:#}", e)))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn input_spec(&self) -> InputSpec {
        self.spec
    }
}

/// Loads [`OnnxClipEncoder`] sessions from `model.model_path`
pub struct OnnxClipLoader {
    config: ModelConfig,
    cuda_available: OnceLock<bool>,
}

impl OnnxClipLoader {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            config,
            cuda_available: OnceLock::new(),
        }
    }

    fn cuda_available(&self) -> bool {
        *self.cuda_available.get_or_init(|| {
            let available = CUDAExecutionProvider::default()
                .is_available()
                .unwrap_or(false);
            info!(available, "Probed CUDA execution provider");
            available
        })
    }
}

#[async_trait]
impl ModelLoader for OnnxClipLoader {
    fn model_name(&self) -> &str {
        &self.config.name
    }

    fn input_spec(&self) -> InputSpec {
        InputSpec::square(self.config.input_size)
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn select_device(&self) -> Device {
        match self.config.device {
            DevicePreference::Cpu => Device::Cpu,
            DevicePreference::Cuda => Device::Cuda,
            DevicePreference::Auto if self.cuda_available() => Device::Cuda,
            DevicePreference::Auto => Device::Cpu,
        }
    }

    async fn load(&self, device: Device) -> Result<LoadedModel, ModelError> {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || load_blocking(&config, device))
            .await
            .map_err(|e| ModelError::LoadFailed(format!("load task failed: {}", e)))?
    }
}

fn load_blocking(config: &ModelConfig, device: Device) -> Result<LoadedModel, ModelError> {
    let path = Path::new(&config.model_path);
    if !path.exists() {
        return Err(ModelError::LoadFailed(format!(
            "ONNX model file not found: {}",
            path.display()
        )));
    }

    info!(model = %config.name, path = %path.display(), %device, "Loading ONNX model");

    let (session, device) = match device {
        Device::Cpu => (build_session(config, Device::Cpu), Device::Cpu),
        Device::Cuda => match build_session(config, Device::Cuda) {
            Ok(session) => (Ok(session), Device::Cuda),
            Err(e) if config.device == DevicePreference::Auto => {
                warn!("CUDA execution provider failed: {:#}", e);
                warn!("Falling back to CPU execution provider");
                (build_session(config, Device::Cpu), Device::Cpu)
            }
            Err(e) => (Err(e), Device::Cuda),
        },
    };
    let session = session.map_err(|e| ModelError::LoadFailed(format!("{:#}", e)))?;

    let encoder = OnnxClipEncoder {
        session: Mutex::new(session),
        input_name: config.input_name.clone(),
        output_name: config.output_name.clone(),
        spec: InputSpec::square(config.input_size),
        dimension: config.dimension,
    };

    // Validate the output contract with a mid-gray probe image
    let size = config.input_size;
    let probe = DecodedImage::from_rgb(size, size, vec![128; InputSpec::square(size).pixel_len()])
        .ok_or_else(|| ModelError::LoadFailed("failed to build probe image".to_string()))?;
    let output = encoder
        .encode(&probe)
        .map_err(|e| ModelError::LoadFailed(format!("validation inference failed: {}", e)))?;
    if output.len() != config.dimension {
        return Err(ModelError::LoadFailed(format!(
            "model outputs {} values (expected {})",
            output.len(),
            config.dimension
        )));
    }

    info!(model = %config.name, %device, dimension = config.dimension, "ONNX model loaded successfully");

    Ok(LoadedModel {
        encoder: Arc::new(encoder),
        device,
    })
}

fn build_session(config: &ModelConfig, device: Device) -> AnyResult<Session> {
    let builder = Session::builder().context("Failed to create session builder")?;

    let builder = match device {
        Device::Cuda => builder
            .with_execution_providers([CUDAExecutionProvider::default().build().error_on_failure()])
            .context("Failed to set CUDA execution provider")?,
        Device::Cpu => builder
            .with_execution_providers([CPUExecutionProvider::default().build()])
            .context("Failed to set CPU execution provider")?,
    };

    builder
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .context("Failed to set optimization level")?
        .with_intra_threads(config.intra_threads)
        .context("Failed to set intra threads")?
        .commit_from_file(&config.model_path)
        .with_context(|| format!("Failed to load ONNX model from {}", config.model_path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_tensor_layout_and_normalization() {
        // 2x1 image: red pixel then black pixel
        let image = DecodedImage::from_rgb(2, 1, vec![255, 0, 0, 0, 0, 0]).unwrap();
        let tensor = to_clip_tensor(&image);

        assert_eq!(tensor.shape(), &[1, 3, 1, 2]);
        let red = (1.0 - CLIP_MEAN[0]) / CLIP_STD[0];
        assert!((tensor[[0, 0, 0, 0]] - red).abs() < 1e-6);
        let black_green = (0.0 - CLIP_MEAN[1]) / CLIP_STD[1];
        assert!((tensor[[0, 1, 0, 1]] - black_green).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_missing_model_file() {
        let config = ModelConfig {
            model_path: "/nonexistent/visual.onnx".to_string(),
            device: DevicePreference::Cpu,
            ..ModelConfig::default()
        };
        let loader = OnnxClipLoader::new(config);
        assert_eq!(loader.select_device(), Device::Cpu);

        let err = loader.load(Device::Cpu).await.unwrap_err();
        assert!(matches!(err, ModelError::LoadFailed(msg) if msg.contains("not found")));
    }
}
