use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use super::handlers;
use crate::state::AppState;

/// Create the signaling router with the static UI mounted at the root.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/devices", get(handlers::list_devices))
        .route("/offer", post(handlers::offer))
        .fallback_service(ServeDir::new("web"))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
