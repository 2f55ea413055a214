//! Image preprocessing: raw bytes to model-ready RGB pixels
//!
//! Decoding goes through the `image` crate. Any color mode is converted to 8-bit RGB
//! (grayscale is expanded, an alpha channel is dropped without blending), then the image
//! is stretched to the model's square input resolution. Aspect ratio is not preserved.

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};
use tracing::debug;

use crate::error::ImageError;
use crate::model::InputSpec;

/// Resampling filter used for resizing (bicubic)
pub const RESIZE_FILTER: FilterType = FilterType::CatmullRom;

/// RGB pixels at the model's input resolution
#[derive(Debug, Clone)]
pub struct DecodedImage {
    /// Width of the uploaded image before resizing
    pub source_width: u32,
    /// Height of the uploaded image before resizing
    pub source_height: u32,
    /// Detected container format
    pub format: ImageFormat,
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl DecodedImage {
    /// Build from a row-major RGB buffer
    pub fn from_rgb(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        if pixels.len() != width as usize * height as usize * InputSpec::RGB_CHANNELS {
            return None;
        }
        Some(Self {
            source_width: width,
            source_height: height,
            format: ImageFormat::Png,
            width,
            height,
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Always 3 (RGB)
    pub fn channels(&self) -> usize {
        InputSpec::RGB_CHANNELS
    }

    /// Row-major `[r, g, b, r, g, b, ...]`
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// RGB value at `(x, y)`
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let idx = (y as usize * self.width as usize + x as usize) * InputSpec::RGB_CHANNELS;
        [self.pixels[idx], self.pixels[idx + 1], self.pixels[idx + 2]]
    }

    /// Whether this buffer satisfies a model's input contract
    pub fn conforms_to(&self, spec: &InputSpec) -> bool {
        self.width == spec.size
            && self.height == spec.size
            && self.channels() == spec.channels
            && self.pixels.len() == spec.pixel_len()
    }
}

/// Decodes uploads into [`DecodedImage`]s for one model input contract
#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    spec: InputSpec,
}

impl ImagePreprocessor {
    pub fn new(spec: InputSpec) -> Self {
        Self { spec }
    }

    pub fn input_spec(&self) -> InputSpec {
        self.spec
    }

    /// Decode, convert to RGB and resize. CPU-bound; call from a blocking context.
    pub fn preprocess(&self, bytes: &[u8]) -> Result<DecodedImage, ImageError> {
        let (image, format) = decode(bytes)?;
        let (source_width, source_height) = image.dimensions();
        if source_width == 0 || source_height == 0 {
            return Err(ImageError::ZeroSized);
        }

        let rgb = image.to_rgb8();
        let size = self.spec.size;
        let rgb = if rgb.dimensions() == (size, size) {
            rgb
        } else {
            image::imageops::resize(&rgb, size, size, RESIZE_FILTER)
        };

        debug!(
            format = ?format,
            source_width,
            source_height,
            color = ?image.color(),
            "Image preprocessed to {}x{} RGB",
            size,
            size
        );

        Ok(DecodedImage {
            source_width,
            source_height,
            format,
            width: size,
            height: size,
            pixels: rgb.into_raw(),
        })
    }
}

/// Detect the format from magic bytes and decode
fn decode(bytes: &[u8]) -> Result<(DynamicImage, ImageFormat), ImageError> {
    if bytes.is_empty() {
        return Err(ImageError::EmptyData);
    }

    let format = image::guess_format(bytes).map_err(|_| ImageError::UnsupportedFormat)?;
    let image = image::load_from_memory_with_format(bytes, format)
        .map_err(|e| ImageError::DecodeFailed(e.to_string()))?;

    Ok((image, format))
}
