//! Configuration management for the image embedding service

use serde::{Deserialize, Serialize};
use std::path::Path;

pub mod loader;
pub mod validation;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host
    #[serde(default = "default_server_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_server_port")]
    pub port: u16,

    /// Maximum request body size in MB
    #[serde(default = "default_max_body_size")]
    pub max_body_size_mb: usize,
}

/// Which implementation backs the model adapter
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelBackend {
    /// CLIP vision encoder run through ONNX Runtime
    #[default]
    Onnx,
    /// Deterministic stand-in that needs no model file
    Mock,
}

/// Device the model should run on
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    /// Accelerator if available, CPU otherwise
    #[default]
    Auto,
    Cpu,
    Cuda,
}

/// When the model gets loaded
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LoadPolicy {
    /// On the first embed request
    #[default]
    Lazy,
    /// At process startup
    Eager,
}

/// Model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub backend: ModelBackend,

    /// Model identifier reported to clients
    #[serde(default = "default_model_name")]
    pub name: String,

    /// Path to the ONNX vision encoder
    #[serde(default = "default_model_path")]
    pub model_path: String,

    /// Square input resolution expected by the model
    #[serde(default = "default_input_size")]
    pub input_size: u32,

    /// Length of the embedding vector produced by the model
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    #[serde(default)]
    pub device: DevicePreference,

    #[serde(default)]
    pub load_policy: LoadPolicy,

    /// Whether a request may trigger loading an unloaded model
    #[serde(default = "default_lazy_load")]
    pub lazy_load: bool,

    /// Name of the ONNX graph input holding pixel values
    #[serde(default = "default_input_name")]
    pub input_name: String,

    /// Name of the ONNX graph output holding image embeddings (first output if unset)
    #[serde(default)]
    pub output_name: Option<String>,

    /// ONNX Runtime intra-op threads
    #[serde(default = "default_intra_threads")]
    pub intra_threads: usize,
}

/// Inference worker configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Maximum concurrent encode calls (0 = derive from device)
    #[serde(default)]
    pub max_concurrency: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_server_host() -> String { "0.0.0.0".to_string() }
fn default_server_port() -> u16 { 8000 }
fn default_max_body_size() -> usize { 10 } // 10 MB default
fn default_model_name() -> String { "CLIP-ViT-B-32".to_string() }
fn default_model_path() -> String { "models/clip-vit-b-32/visual.onnx".to_string() }
fn default_input_size() -> u32 { 224 }
fn default_dimension() -> usize { 512 }
fn default_lazy_load() -> bool { true }
fn default_input_name() -> String { "pixel_values".to_string() }
fn default_intra_threads() -> usize { 4 }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "json".to_string() }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
            max_body_size_mb: default_max_body_size(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            backend: ModelBackend::default(),
            name: default_model_name(),
            model_path: default_model_path(),
            input_size: default_input_size(),
            dimension: default_dimension(),
            device: DevicePreference::default(),
            load_policy: LoadPolicy::default(),
            lazy_load: default_lazy_load(),
            input_name: default_input_name(),
            output_name: None,
            intra_threads: default_intra_threads(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl ServerConfig {
    /// Maximum body size in bytes
    pub fn max_body_size_bytes(&self) -> usize {
        self.max_body_size_mb * 1024 * 1024
    }

    /// Address to bind, as `host:port`
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::error::Result<Self> {
        let config = loader::load_config(path)?;
        validation::validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides.
    /// The file is optional; missing values fall back to defaults.
    pub fn from_file_with_env<P: AsRef<Path>>(path: P) -> crate::error::Result<Self> {
        let config = loader::load_config_with_env(path)?;
        validation::validate_config(&config)?;
        Ok(config)
    }

    /// Validate this configuration
    pub fn validate(&self) -> crate::error::Result<()> {
        validation::validate_config(self)
    }

    /// Create default configuration
    pub fn default_config() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_clip_contract() {
        let config = Config::default_config();
        assert_eq!(config.model.input_size, 224);
        assert_eq!(config.model.dimension, 512);
        assert_eq!(config.model.load_policy, LoadPolicy::Lazy);
        assert!(config.model.lazy_load);
        assert_eq!(config.server.max_body_size_bytes(), 10 * 1024 * 1024);
    }

    #[test]
    fn test_enums_deserialize_lowercase() {
        let backend: ModelBackend = serde_json::from_str("\"mock\"").unwrap();
        assert_eq!(backend, ModelBackend::Mock);
        let device: DevicePreference = serde_json::from_str("\"cuda\"").unwrap();
        assert_eq!(device, DevicePreference::Cuda);
        let policy: LoadPolicy = serde_json::from_str("\"eager\"").unwrap();
        assert_eq!(policy, LoadPolicy::Eager);
    }
}
