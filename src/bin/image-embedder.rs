//! Image Embedder Server Binary
//!
//! Serves `POST /embed-image` and the health/metrics endpoints.

use image_embedder::{config::Config, observability::init_observability, server, shutdown};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let config = Config::from_file_with_env(&config_path)?;

    init_observability(&config.logging.level, &config.logging.format);

    info!("Starting Image Embedder v{}", env!("CARGO_PKG_VERSION"));
    info!(
        config_path = %config_path,
        backend = ?config.model.backend,
        model = %config.model.name,
        device = ?config.model.device,
        load_policy = ?config.model.load_policy,
        "Configuration loaded"
    );

    server::start_server(config, shutdown::shutdown_signal()).await?;

    Ok(())
}
