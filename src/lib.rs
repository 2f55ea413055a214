//! Image Embedder - HTTP service producing L2-normalized image embeddings
//!
//! Images arrive either as a raw `image/*` body or as a `multipart/form-data` part named
//! `file`. Each upload is decoded, converted to RGB, resized to the model's square input,
//! encoded by a vision model (CLIP ViT-B/32 through ONNX Runtime, or a deterministic mock)
//! and normalized to unit length.
//!
//! ## Features
//!
//! - **Lazy loading**: the model is built once, on the first request or at startup
//! - **Bounded inference**: encode calls run on the blocking pool behind a semaphore
//! - **Observability**: structured logging, health probes, Prometheus metrics
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use image_embedder::prelude::*;
//! use image_embedder::model::MockModelLoader;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::default();
//!     let loader = Arc::new(MockModelLoader::from_config(&config.model));
//!     let app_state = image_embedder::server::build_state(&config, loader);
//!
//!     let png = std::fs::read("cat.png")?;
//!     let embedding = app_state.pipeline.embed(png.into()).await?;
//!     assert_eq!(embedding.dimension(), 512);
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod embedding;
pub mod error;
pub mod model;
pub mod observability;
pub mod preprocess;
pub mod server;
pub mod shutdown;
pub mod state;
pub mod upload;

pub use config::Config;
pub use error::{Result, ServiceError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::embedding::{Embedding, EmbeddingPipeline, EmbeddingVector, RawVector};
    pub use crate::error::{Result, ServiceError};
    pub use crate::model::{Device, ImageEncoder, InputSpec, LoadedModel, ModelLoader};
    pub use crate::observability::{HealthChecker, MetricsCollector};
    pub use crate::preprocess::{DecodedImage, ImagePreprocessor};
    pub use crate::state::{LoadPhase, ServiceState};
}
