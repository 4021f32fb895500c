//! HTTP API for the Folio service.
//!
//! This module provides:
//! - Health and metrics monitoring
//! - Document upload, listing and deletion
//! - The live status WebSocket

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State, WebSocketUpgrade},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::embeddings::Embedder;
use crate::service::FolioService;
use crate::websocket::{LiveRegistry, handle_ws_connection};

pub mod documents;
use documents::{
    delete_document_handler, get_document_handler, list_documents_handler,
    upload_document_handler,
};

/// Application state
pub struct AppState {
    pub service: Arc<FolioService>,
    pub registry: Arc<LiveRegistry>,
    pub embedder: Arc<dyn Embedder>,
    pub prometheus: PrometheusHandle,
    pub start_time: Instant,
}

/// Build the API router
pub fn router(state: Arc<AppState>, max_upload_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/documents", get(list_documents_handler))
        .route(
            "/documents",
            post(upload_document_handler).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route(
            "/documents/{id}",
            get(get_document_handler).delete(delete_document_handler),
        );

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/ws", get(ws_handler))
        .nest("/api", api_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// === Health & Metrics ===

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let embeddings_available = state.embedder.health_check().await;

    let status = if embeddings_available {
        "healthy".to_string()
    } else {
        "degraded: embedding service unavailable".to_string()
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        embeddings_available,
        live_connections: state.registry.connection_count(),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_seconds: u64,
    embeddings_available: bool,
    live_connections: usize,
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prometheus.render(),
    )
}

// === WebSocket ===

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    info!("WebSocket upgrade request received");
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state.registry.clone()))
}
