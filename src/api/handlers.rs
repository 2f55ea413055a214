//! API request handlers

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, Instrument};
use uuid::Uuid;

use super::error::ApiError;
use crate::embedding::EmbeddingPipeline;
use crate::model::Device;
use crate::observability::{HealthChecker, MetricsCollector};
use crate::state::ServiceState;
use crate::upload;

/// Application state shared by all handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<EmbeddingPipeline>,
    pub state: Arc<ServiceState>,
    pub health_checker: Arc<HealthChecker>,
    pub metrics: Arc<MetricsCollector>,
    /// Maximum accepted request body in bytes
    pub max_body_size: usize,
}

/// Successful `POST /embed-image` body
#[derive(Debug, Serialize, Deserialize)]
pub struct EmbedResponse {
    pub embedding: Vec<f32>,
    pub model: String,
    pub device: Device,
    pub normalized: bool,
    pub dimension: usize,
}

/// Embed one uploaded image
pub async fn embed_image(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<EmbedResponse>, ApiError> {
    let request_id = Uuid::new_v4();
    let span = tracing::info_span!("embed_image", %request_id);

    // Dropped with the future if the client goes away first
    let mut active = state.metrics.begin_request();

    let result = process_embed(&state, request).instrument(span).await;

    active.finish(match &result {
        Ok(_) => StatusCode::OK.as_u16(),
        Err(e) => e.status().as_u16(),
    });
    result.map(Json)
}

async fn process_embed(state: &AppState, request: Request) -> Result<EmbedResponse, ApiError> {
    let (parts, body) = request.into_parts();
    let upload = upload::read_upload(&parts.headers, body, state.max_body_size).await?;
    let image = upload.into_image()?;

    info!(
        bytes = image.bytes.len(),
        content_type = ?image.content_type,
        filename = ?image.filename,
        "Embedding image"
    );

    let embedding = state.pipeline.embed(image.bytes).await?;

    info!(
        dimension = embedding.dimension(),
        device = %embedding.device,
        "Embedding generated"
    );

    Ok(EmbedResponse {
        dimension: embedding.dimension(),
        embedding: embedding.vector.into_inner(),
        model: embedding.model,
        device: embedding.device,
        normalized: true,
    })
}

/// Health snapshot. Always 200; problems are reported in the body.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.health_checker.check_health().await;
    (StatusCode::OK, Json(report))
}

/// Liveness probe handler - always returns 200
pub async fn liveness(State(state): State<AppState>) -> impl IntoResponse {
    let status = if state.health_checker.liveness() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(json!({"status": "alive"})))
}

/// Readiness probe handler - ready once the model is loaded
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    if state.health_checker.readiness().await {
        (StatusCode::OK, Json(json!({"status": "ready"})))
    } else {
        let report = state.health_checker.check_health().await;
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "not_ready", "details": report})),
        )
    }
}

/// Service info
pub async fn root(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "service": "Image Embedder",
        "version": env!("CARGO_PKG_VERSION"),
        "model": state.state.model_name(),
        "status": "running"
    }))
}

/// Prometheus metrics
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.state.snapshot().await;
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.export_prometheus(&snapshot),
    )
}
