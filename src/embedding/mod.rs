//! Embedding generation: L2 normalization and the per-request pipeline

pub mod normalize;
pub mod pipeline;

pub use normalize::{l2_norm, normalize, EmbeddingVector, RawVector};
pub use pipeline::{inference_concurrency, Embedding, EmbeddingPipeline};
