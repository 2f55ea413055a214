//! Configuration validation

use super::*;
use crate::error::{Result, ServiceError};

/// Log formats understood by the binary's subscriber setup
pub const LOG_FORMATS: &[&str] = &["json", "compact", "pretty"];

/// Validate complete configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_server_config(&config.server)?;
    validate_model_config(&config.model)?;
    validate_logging_config(&config.logging)?;
    Ok(())
}

/// Validate server configuration
pub fn validate_server_config(config: &ServerConfig) -> Result<()> {
    // Validate port range
    if config.port == 0 {
        return Err(ServiceError::Config(
            "Server port cannot be 0".to_string()
        ));
    }

    // Validate host
    if config.host.is_empty() {
        return Err(ServiceError::Config(
            "Server host cannot be empty".to_string()
        ));
    }

    if config.max_body_size_mb == 0 {
        return Err(ServiceError::Config(
            "Max body size must be greater than 0".to_string()
        ));
    }

    if config.max_body_size_mb > 100 {
        return Err(ServiceError::Config(
            "Max body size too large (max: 100 MB)".to_string()
        ));
    }

    Ok(())
}

/// Validate model configuration
fn validate_model_config(config: &ModelConfig) -> Result<()> {
    if config.name.trim().is_empty() {
        return Err(ServiceError::Config(
            "Model name cannot be empty".to_string()
        ));
    }

    if config.backend == ModelBackend::Onnx && config.model_path.trim().is_empty() {
        return Err(ServiceError::Config(
            "Model path is required for the onnx backend".to_string()
        ));
    }

    if config.input_size == 0 {
        return Err(ServiceError::Config(
            "Model input size must be greater than 0".to_string()
        ));
    }

    if config.input_size > 4096 {
        return Err(ServiceError::Config(
            "Model input size too large (max: 4096)".to_string()
        ));
    }

    if config.dimension == 0 {
        return Err(ServiceError::Config(
            "Embedding dimension must be greater than 0".to_string()
        ));
    }

    if config.backend == ModelBackend::Onnx && config.input_name.trim().is_empty() {
        return Err(ServiceError::Config(
            "ONNX input name cannot be empty".to_string()
        ));
    }

    if config.intra_threads == 0 {
        return Err(ServiceError::Config(
            "Intra-op threads must be greater than 0".to_string()
        ));
    }

    // Nothing would ever load the model
    if config.load_policy == LoadPolicy::Lazy && !config.lazy_load {
        return Err(ServiceError::Config(
            "lazy_load = false requires load_policy = \"eager\"".to_string()
        ));
    }

    Ok(())
}

/// Validate logging configuration
fn validate_logging_config(config: &LoggingConfig) -> Result<()> {
    if !LOG_FORMATS.contains(&config.format.as_str()) {
        return Err(ServiceError::Config(
            format!("Unknown log format '{}' (expected one of {:?})", config.format, LOG_FORMATS)
        ));
    }

    if config.level.trim().is_empty() {
        return Err(ServiceError::Config(
            "Log level cannot be empty".to_string()
        ));
    }

    Ok(())
}
