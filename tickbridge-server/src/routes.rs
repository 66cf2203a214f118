//! Route assembly for the bridge's HTTP and WebSocket surface.

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::http;
use crate::state::AppState;
use crate::websocket;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/health", get(http::health))
        .route("/api/v1/archive/list", get(http::list_dir))
        .route("/api/v1/archive/stat", get(http::stat_path))
        .route("/api/v1/archive/read", get(http::read_range))
        .route("/api/v1/latest", get(http::latest_snapshot))
        .route("/api/v1/symbols", get(http::active_symbols))
        .route("/api/v1/rollovers", get(http::rollover_alerts))
        .route("/api/v1/config/reload", post(http::reload_config))
        .route("/api/v1/stream/{symbol}", get(websocket::stream_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
