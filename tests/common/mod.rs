//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use image_embedder::api::{build_router, AppState};
use image_embedder::config::Config;
use image_embedder::error::ModelError;
use image_embedder::model::{
    Device, ImageEncoder, InputSpec, LoadedModel, MockImageEncoder, ModelLoader,
};
use image_embedder::preprocess::DecodedImage;
use image_embedder::server::build_state;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const BOUNDARY: &str = "XYZ";

pub fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, format).unwrap();
    buf.into_inner()
}

/// Solid red JPEG
pub fn red_jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = ImageBuffer::from_pixel(width, height, Rgb([255u8, 0, 0]));
    encode(DynamicImage::ImageRgb8(img), ImageFormat::Jpeg)
}

/// Gradient PNG
pub fn gradient_png(width: u32, height: u32) -> Vec<u8> {
    let img = ImageBuffer::from_fn(width, height, |x, y| {
        Rgb([(x * 255 / width.max(1)) as u8, (y * 255 / height.max(1)) as u8, 128u8])
    });
    encode(DynamicImage::ImageRgb8(img), ImageFormat::Png)
}

/// `multipart/form-data` body with a single part
pub fn multipart_body(boundary: &str, field: &str, content_type: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"upload.bin\"\r\n",
            field
        )
        .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}

pub fn l2_norm(values: &[f32]) -> f64 {
    values.iter().map(|&v| f64::from(v) * f64::from(v)).sum::<f64>().sqrt()
}

/// What the encoder built by [`CountingLoader`] returns
#[derive(Debug, Clone, Copy)]
pub enum Output {
    /// Hash-seeded vectors of the declared dimension
    Mock,
    /// All zeros
    Zeros,
    /// Hash-seeded vectors of the wrong length
    Length(usize),
}

/// Loader that counts loads, can be slow, and can fail its first attempts
pub struct CountingLoader {
    pub loads: AtomicUsize,
    pub attempts: AtomicUsize,
    pub fail_first: usize,
    pub delay: Duration,
    pub output: Output,
    pub dimension: usize,
}

impl CountingLoader {
    pub fn new() -> Self {
        Self {
            loads: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
            fail_first: 0,
            delay: Duration::ZERO,
            output: Output::Mock,
            dimension: 512,
        }
    }

    pub fn failing_first(mut self, n: usize) -> Self {
        self.fail_first = n;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_output(mut self, output: Output) -> Self {
        self.output = output;
        self
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

struct FixedEncoder {
    inner: MockImageEncoder,
    output: Output,
}

impl ImageEncoder for FixedEncoder {
    fn encode(&self, image: &DecodedImage) -> Result<Vec<f32>, ModelError> {
        let vector = self.inner.encode(image)?;
        Ok(match self.output {
            Output::Mock => vector,
            Output::Zeros => vec![0.0; vector.len()],
            Output::Length(n) => vector.into_iter().cycle().take(n).collect(),
        })
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn input_spec(&self) -> InputSpec {
        self.inner.input_spec()
    }
}

#[async_trait]
impl ModelLoader for CountingLoader {
    fn model_name(&self) -> &str {
        "CLIP-ViT-B-32"
    }

    fn input_spec(&self) -> InputSpec {
        InputSpec::square(224)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn select_device(&self) -> Device {
        Device::Cpu
    }

    async fn load(&self, device: Device) -> Result<LoadedModel, ModelError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.fail_first {
            return Err(ModelError::LoadFailed("weights not found".to_string()));
        }
        self.loads.fetch_add(1, Ordering::SeqCst);

        Ok(LoadedModel {
            encoder: Arc::new(FixedEncoder {
                inner: MockImageEncoder::new(InputSpec::square(224), self.dimension),
                output: self.output,
            }),
            device,
        })
    }
}

pub fn app_with(config: &Config, loader: Arc<CountingLoader>) -> (axum::Router, AppState) {
    let app_state = build_state(config, loader);
    (build_router(app_state.clone()), app_state)
}

pub fn app(loader: Arc<CountingLoader>) -> (axum::Router, AppState) {
    app_with(&Config::default(), loader)
}
