//! HTTP surface: signaling WebSocket, health, metrics and room introspection

pub mod error;
pub mod health;
pub mod rooms;
pub mod websocket;

use std::sync::Arc;

use axum::{routing::get, Router};
use roomcast_core::Config;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::gateway::Gateway;

pub use error::{AppError, AppResult};

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(gateway: Arc<Gateway>, config: Arc<Config>) -> Self {
        Self { gateway, config }
    }
}

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    let router = Router::new()
        .route("/ws", get(websocket::websocket_handler))
        .merge(health::create_health_router())
        .merge(rooms::create_rooms_router());

    // Apply layers before state
    let router = router
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Apply state to all routes (must be last)
    router.with_state(state)
}
