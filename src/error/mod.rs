//! Error types for the image embedding service

use thiserror::Error;

/// Result type alias for embedding service operations
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Main error type for the embedding service
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Request decoding error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Image error: {0}")]
    Image(#[from] ImageError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Normalization error: {0}")]
    Normalization(#[from] NormalizationError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised while extracting the image bytes from an HTTP request
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Missing Content-Length header")]
    MissingContentLength,

    #[error("Invalid Content-Length header: {0}")]
    InvalidContentLength(String),

    #[error("Request body too large: {size} bytes exceeds maximum of {max_size} bytes")]
    BodyTooLarge { size: usize, max_size: usize },

    #[error("Missing Content-Type header")]
    MissingContentType,

    #[error("Unsupported content type: {0} (expected image/* or multipart/form-data)")]
    UnsupportedContentType(String),

    #[error("Missing boundary parameter in multipart Content-Type")]
    MissingBoundary,

    #[error("Malformed multipart body: {0}")]
    MalformedMultipart(String),

    #[error("No image file found in form data (expected a part named \"file\")")]
    MissingFilePart,

    #[error("Failed to read request body: {0}")]
    BodyRead(String),
}

/// Errors raised while turning raw bytes into model-ready pixels
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    #[error("Image data is empty")]
    EmptyData,

    #[error("Invalid image format: unrecognized or unsupported image data")]
    UnsupportedFormat,

    #[error("Invalid image file: {0}")]
    DecodeFailed(String),

    #[error("Image has zero width or height")]
    ZeroSized,
}

/// Errors raised by the model loader or the model adapter
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("Model loading failed: {0}")]
    LoadFailed(String),

    #[error("Model unavailable: {0}")]
    Unavailable(String),

    #[error("Input does not match model contract: {0}")]
    InputMismatch(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Invalid embedding dimension: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Errors raised while L2-normalizing a raw model output
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizationError {
    #[error("Cannot normalize zero vector")]
    Degenerate,

    #[error("Cannot normalize empty vector")]
    Empty,

    #[error("Vector contains non-finite values")]
    NonFinite,
}

impl From<config::ConfigError> for ServiceError {
    fn from(err: config::ConfigError) -> Self {
        ServiceError::Config(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ServiceError {
    fn from(err: tokio::task::JoinError) -> Self {
        ServiceError::Internal(format!("worker task failed: {}", err))
    }
}
