//! HTTP router and handlers

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::warn;

use super::envelope::ResponseEnvelope;
use super::handler::ProxyHandler;
use crate::Error;
use crate::config::ServerConfig;

/// Shared application state
pub struct AppState {
    /// Proxy handler
    pub handler: Arc<ProxyHandler>,
    /// Upper bound on one invocation
    pub request_timeout: Duration,
}

/// Create the router
pub fn create_router(state: Arc<AppState>, server: &ServerConfig) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/invoke", post(invoke_handler))
        .layer(DefaultBodyLimit::max(server.max_body_size))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - liveness
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// POST /invoke - run one gateway proxy event, respond with its envelope
async fn invoke_handler(State(state): State<Arc<AppState>>, Json(event): Json<Value>) -> Response {
    let envelope = match tokio::time::timeout(state.request_timeout, state.handler.handle(&event)).await {
        Ok(envelope) => envelope,
        Err(_) => {
            warn!(timeout = ?state.request_timeout, "Invocation timed out");
            ResponseEnvelope::from_error(&Error::BackendTransport(format!(
                "Invocation timed out after {:?}",
                state.request_timeout
            )))
        }
    };
    (StatusCode::OK, Json(envelope)).into_response()
}
