use crate::{AppState, handlers};
use axum::{Router, routing::get};

/// Public Router Module
///
/// Endpoints used by monitoring rather than by API clients.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Process liveness plus a database ping; 503 when the store does not answer.
        .route("/health", get(handlers::health))
        .method_not_allowed_fallback(handlers::method_not_allowed)
}
