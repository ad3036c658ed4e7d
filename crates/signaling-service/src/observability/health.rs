//! Health endpoints for the signaling service.
//!
//! - `GET /health` - Liveness probe, with current connection and room counts
//! - `GET /ready` - Readiness probe (bound and not draining)
//!
//! The `/metrics` endpoint is merged onto the same listener in `main.rs`.

use crate::actors::metrics::ActorMetrics;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Liveness/readiness flags plus the live actor gauges.
#[derive(Debug)]
pub struct HealthState {
    /// Always true after startup.
    live: AtomicBool,
    /// True once the public listener is bound; false again while draining.
    ready: AtomicBool,
    metrics: Arc<ActorMetrics>,
}

impl HealthState {
    /// Create a new health state (live=true, ready=false).
    #[must_use]
    pub fn new(metrics: Arc<ActorMetrics>) -> Self {
        Self {
            live: AtomicBool::new(true),
            ready: AtomicBool::new(false),
            metrics,
        }
    }

    /// Mark the service as ready to serve traffic.
    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Mark the service as not ready (during shutdown).
    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    /// Check if the service is live.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Check if the service is ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Body of `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub connections: usize,
    pub rooms: usize,
}

/// Create the health router with liveness and readiness endpoints.
pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(health_state)
}

async fn liveness_handler(
    State(state): State<Arc<HealthState>>,
) -> (StatusCode, Json<HealthReport>) {
    let snapshot = state.metrics.snapshot();
    let (status, label) = if state.is_live() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "down")
    };

    (
        status,
        Json(HealthReport {
            status: label,
            connections: snapshot.connections,
            rooms: snapshot.rooms,
        }),
    )
}

async fn readiness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
