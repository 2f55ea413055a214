//! Deterministic stand-in model for development and testing
//!
//! The SHA-256 digest of the pixel buffer seeds a PRNG that draws each component
//! uniformly from [-1, 1). Identical pixels always give identical vectors.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use super::{Device, ImageEncoder, InputSpec, LoadedModel, ModelLoader};
use crate::config::ModelConfig;
use crate::error::ModelError;
use crate::preprocess::DecodedImage;

/// Hash-seeded image encoder
#[derive(Debug, Clone)]
pub struct MockImageEncoder {
    spec: InputSpec,
    dimension: usize,
}

impl MockImageEncoder {
    pub fn new(spec: InputSpec, dimension: usize) -> Self {
        Self { spec, dimension }
    }
}

impl ImageEncoder for MockImageEncoder {
    fn encode(&self, image: &DecodedImage) -> Result<Vec<f32>, ModelError> {
        if !image.conforms_to(&self.spec) {
            return Err(ModelError::InputMismatch(format!(
                "expected {}x{}x{}, got {}x{}x{}",
                self.spec.size,
                self.spec.size,
                self.spec.channels,
                image.width(),
                image.height(),
                image.channels()
            )));
        }

        let digest: [u8; 32] = Sha256::digest(image.pixels()).into();
        debug!(digest = %hex::encode(&digest[..8]), "Mock encode");

        let mut rng = StdRng::from_seed(digest);
        Ok((0..self.dimension)
            .map(|_| rng.gen_range(-1.0f32..1.0))
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn input_spec(&self) -> InputSpec {
        self.spec
    }
}

/// Loader for [`MockImageEncoder`]. Always runs on CPU.
#[derive(Debug)]
pub struct MockModelLoader {
    name: String,
    spec: InputSpec,
    dimension: usize,
    loads: AtomicUsize,
}

impl MockModelLoader {
    pub fn new(name: impl Into<String>, spec: InputSpec, dimension: usize) -> Self {
        Self {
            name: name.into(),
            spec,
            dimension,
            loads: AtomicUsize::new(0),
        }
    }

    pub fn from_config(config: &ModelConfig) -> Self {
        Self::new(
            config.name.clone(),
            InputSpec::square(config.input_size),
            config.dimension,
        )
    }

    /// Number of instances built so far
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelLoader for MockModelLoader {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn input_spec(&self) -> InputSpec {
        self.spec
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn select_device(&self) -> Device {
        Device::Cpu
    }

    async fn load(&self, _device: Device) -> Result<LoadedModel, ModelError> {
        let count = self.loads.fetch_add(1, Ordering::SeqCst) + 1;
        info!(model = %self.name, loads = count, "Mock model instantiated");

        Ok(LoadedModel {
            encoder: Arc::new(MockImageEncoder::new(self.spec, self.dimension)),
            device: Device::Cpu,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(size: u32, fill: u8) -> DecodedImage {
        DecodedImage::from_rgb(size, size, vec![fill; (size * size * 3) as usize]).unwrap()
    }

    #[test]
    fn test_encode_is_deterministic() {
        let encoder = MockImageEncoder::new(InputSpec::square(8), 512);
        let a = encoder.encode(&image(8, 10)).unwrap();
        let b = encoder.encode(&image(8, 10)).unwrap();
        let c = encoder.encode(&image(8, 11)).unwrap();

        assert_eq!(a.len(), 512);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.iter().all(|v| (-1.0..1.0).contains(v)));
    }

    #[test]
    fn test_encode_rejects_wrong_shape() {
        let encoder = MockImageEncoder::new(InputSpec::square(8), 512);
        assert!(matches!(
            encoder.encode(&image(4, 0)),
            Err(ModelError::InputMismatch(_))
        ));
    }

    #[tokio::test]
    async fn test_loader_counts_loads() {
        let loader = MockModelLoader::new("mock", InputSpec::square(8), 16);
        assert_eq!(loader.load_count(), 0);

        let loaded = loader.load(Device::Cuda).await.unwrap();
        assert_eq!(loaded.device, Device::Cpu);
        assert_eq!(loaded.encoder.dimension(), 16);
        assert_eq!(loader.load_count(), 1);
    }
}
