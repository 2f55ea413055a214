//! Configuration loader with environment variable support

use super::Config;
use crate::error::Result;
use config::{Environment, File};
use std::path::Path;

/// Environment variable prefix, e.g. `IMAGE_EMBEDDER__SERVER__PORT=9000`
pub const ENV_PREFIX: &str = "IMAGE_EMBEDDER";

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let config = config::Config::builder()
        .add_source(File::from(path.as_ref()))
        .build()?;

    let cfg: Config = config.try_deserialize()?;
    Ok(cfg)
}

/// Load configuration from an optional TOML file with environment variable overrides
pub fn load_config_with_env<P: AsRef<Path>>(path: P) -> Result<Config> {
    let config = config::Config::builder()
        .add_source(File::from(path.as_ref()).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true)
        )
        .build()?;

    let cfg: Config = config.try_deserialize()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LoadPolicy, ModelBackend};
    use std::io::Write;

    fn write_temp(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("{}-{}.toml", name, uuid::Uuid::new_v4()));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_partial_file_fills_defaults() {
        let path = write_temp(
            "partial",
            r#"
            [server]
            port = 9100

            [model]
            backend = "mock"
            load_policy = "eager"
            "#,
        );

        let config = load_config(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.model.backend, ModelBackend::Mock);
        assert_eq!(config.model.load_policy, LoadPolicy::Eager);
        assert_eq!(config.model.dimension, 512);
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_missing_file_is_optional_with_env() {
        let path = std::env::temp_dir().join("does-not-exist-image-embedder.toml");
        let config = load_config_with_env(&path).unwrap();
        assert_eq!(config.model.input_size, 224);
    }

    #[test]
    fn test_example_config_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config.example.toml");
        let config = load_config(&path).unwrap();
        crate::config::validation::validate_config(&config).unwrap();
        assert_eq!(config.model.backend, ModelBackend::Onnx);
        assert_eq!(config.server.port, 8000);
    }

    #[test]
    fn test_missing_file_is_error_without_env() {
        let path = std::env::temp_dir().join("does-not-exist-image-embedder.toml");
        assert!(load_config(&path).is_err());
    }
}
