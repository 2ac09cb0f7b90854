//! Health, readiness and Prometheus endpoints

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::metrics::encode_metrics;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub feed: String,
    /// True while the hub session is subscribed and serving
    pub session_active: bool,
    pub uptime_secs: u64,
}

/// Shared state for the HTTP endpoints
#[derive(Clone)]
pub struct ServerState {
    pub feed_name: String,
    pub connected: Arc<AtomicBool>,
    started: Instant,
}

impl ServerState {
    pub fn new(feed_name: impl Into<String>, connected: Arc<AtomicBool>) -> Self {
        Self {
            feed_name: feed_name.into(),
            connected,
            started: Instant::now(),
        }
    }

    fn report(&self, status: &'static str) -> HealthResponse {
        HealthResponse {
            status,
            feed: self.feed_name.clone(),
            session_active: self.connected.load(Ordering::SeqCst),
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }
}

/// Liveness: 200 whenever the process is serving HTTP
async fn health(State(state): State<ServerState>) -> Json<HealthResponse> {
    Json(state.report("ok"))
}

/// Readiness: 200 only while the hub session is active
async fn ready(State(state): State<ServerState>) -> (StatusCode, Json<HealthResponse>) {
    if state.connected.load(Ordering::SeqCst) {
        (StatusCode::OK, Json(state.report("ready")))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(state.report("not_ready")))
    }
}

async fn metrics() -> impl IntoResponse {
    match encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
            body,
        ),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain")],
                e.to_string(),
            )
        }
    }
}

pub fn create_router(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve the health endpoints until the listener fails
pub async fn run_server(addr: SocketAddr, state: ServerState) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, feed = %state.feed_name, "Health server listening");
    axum::serve(listener, create_router(state)).await
}
