//! API route configuration

use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use super::handlers::{self, AppState};

/// Build the complete API router
pub fn build_router(app_state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/healthz", get(handlers::health))
        .route("/health/live", get(handlers::liveness))
        .route("/health/ready", get(handlers::readiness))
        .route("/metrics", get(handlers::metrics));

    // Body size is enforced by the upload decoder so oversized requests get a JSON 413
    let api_routes = Router::new().route("/embed-image", post(handlers::embed_image));

    public_routes
        .merge(api_routes)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(app_state)
}
