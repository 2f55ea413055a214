//! Service assembly and the HTTP server loop

use axum::Router;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::api::{build_router, AppState};
use crate::config::{Config, LoadPolicy};
use crate::embedding::EmbeddingPipeline;
use crate::error::Result;
use crate::model::{loader_from_config, ModelLoader};
use crate::observability::{HealthChecker, MetricsCollector};
use crate::state::ServiceState;

/// Wire the shared service context around a model loader
pub fn build_state(config: &Config, loader: Arc<dyn ModelLoader>) -> AppState {
    let state = Arc::new(ServiceState::new(loader, config.model.lazy_load));
    let metrics = Arc::new(MetricsCollector::new());
    let pipeline = Arc::new(EmbeddingPipeline::new(
        Arc::clone(&state),
        &config.inference,
        Arc::clone(&metrics),
    ));
    let health_checker = Arc::new(HealthChecker::new(Arc::clone(&state)));

    AppState {
        pipeline,
        state,
        health_checker,
        metrics,
        max_body_size: config.server.max_body_size_bytes(),
    }
}

/// Build the router for a configuration, choosing the loader from `model.backend`
pub fn build_app(config: &Config) -> Result<(Router, AppState)> {
    let loader = loader_from_config(&config.model)?;
    let app_state = build_state(config, loader);
    Ok((build_router(app_state.clone()), app_state))
}

/// Load the model now when the policy asks for it.
///
/// A failure is logged and leaves the state `failed`; the next embed request retries,
/// even with `lazy_load` off.
pub async fn apply_load_policy(config: &Config, state: &Arc<ServiceState>) {
    if config.model.load_policy != LoadPolicy::Eager {
        info!(lazy_load = config.model.lazy_load, "Model will load on first request");
        return;
    }

    match state.eager_load().await {
        Ok(model) => info!(device = %model.device, "Model loaded at startup"),
        Err(e) => warn!("Startup model load failed, next embed request will retry: {}", e),
    }
}

/// Serve until `shutdown` completes
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("Server listening on {}", addr);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Bind the configured address and run the service
pub async fn start_server<F>(config: Config, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (app, app_state) = build_app(&config)?;
    apply_load_policy(&config, &app_state.state).await;

    let addr = config.server.bind_address();
    let listener = TcpListener::bind(&addr).await?;
    serve(listener, app, shutdown).await
}
