//! HTTP API: routes, handlers, and error responses

pub mod error;
pub mod handlers;
pub mod routes;

pub use error::{ApiError, ErrorBody};
pub use handlers::{AppState, EmbedResponse};
pub use routes::build_router;
