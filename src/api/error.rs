//! Mapping of service errors to HTTP responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::error::{DecodeError, ModelError, ServiceError};

/// Error body: `{"detail": "..."}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}

/// A [`ServiceError`] on its way to the client
#[derive(Debug)]
pub struct ApiError(pub ServiceError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            ServiceError::Decode(DecodeError::BodyTooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            ServiceError::Decode(_) => StatusCode::BAD_REQUEST,
            ServiceError::Image(_) => StatusCode::BAD_REQUEST,
            ServiceError::Model(ModelError::LoadFailed(_) | ModelError::Unavailable(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ServiceError::Model(
                ModelError::InputMismatch(_)
                | ModelError::Inference(_)
                | ModelError::DimensionMismatch { .. },
            ) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::Normalization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::Config(_) | ServiceError::Io(_) | ServiceError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Client-facing message. Internal causes are not exposed.
    pub fn detail(&self) -> String {
        match &self.0 {
            ServiceError::Decode(e) => e.to_string(),
            ServiceError::Image(e) => e.to_string(),
            ServiceError::Model(ModelError::LoadFailed(_)) => {
                "Model unavailable: model failed to load".to_string()
            }
            ServiceError::Model(e @ ModelError::Unavailable(_)) => e.to_string(),
            ServiceError::Model(e @ ModelError::DimensionMismatch { .. }) => e.to_string(),
            ServiceError::Model(ModelError::InputMismatch(_) | ModelError::Inference(_)) => {
                "Embedding generation failed".to_string()
            }
            ServiceError::Normalization(e) => format!("Embedding generation failed: {}", e),
            ServiceError::Config(_) | ServiceError::Io(_) | ServiceError::Internal(_) => {
                "Internal server error".to_string()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<ServiceError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self.0, "Request failed");
        } else {
            warn!(status = status.as_u16(), error = %self.0, "Request rejected");
        }

        (status, Json(ErrorBody { detail: self.detail() })).into_response()
    }
}
