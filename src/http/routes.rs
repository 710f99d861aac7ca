//! Router assembly.

use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use super::handlers::{self, AppState};
use crate::config::ServerConfig;

/// Build the application router. Every route lives under `/api`.
pub fn router(state: AppState, server: &ServerConfig) -> Router {
    let api = Router::new()
        .route("/upload", post(handlers::upload))
        .route("/chat", post(handlers::chat))
        .route("/usage", get(handlers::usage))
        .route("/config", get(handlers::config))
        .route("/notes/export", post(handlers::export_notes))
        .route(
            "/notes/{id}",
            get(handlers::get_notes).delete(handlers::delete_notes),
        )
        .route("/health", get(handlers::health));

    Router::new()
        .nest("/api", api)
        .layer(DefaultBodyLimit::max(server.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&server.cors_origins))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}
