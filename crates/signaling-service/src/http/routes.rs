//! HTTP routes for the signaling service.
//!
//! Defines the Axum router and application state.

use crate::actors::connection::serve_connection;
use crate::actors::messages::RoomSummary;
use crate::actors::metrics::ActorMetrics;
use crate::config::CorsOrigins;
use crate::lifecycle::SessionController;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Session orchestration for upgraded sockets.
    pub controller: SessionController,

    /// Actor counters, shared with the health endpoint.
    pub metrics: Arc<ActorMetrics>,

    /// Root token; every connection runs under a child of it.
    pub cancel_token: CancellationToken,

    /// Largest inbound WebSocket message accepted.
    pub max_message_bytes: usize,
}

/// Body of the rooms listing.
#[derive(Debug, Serialize)]
pub struct RoomList {
    pub rooms: Vec<RoomSummary>,
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/ws` - signaling WebSocket
/// - `/rooms` (GET) and `/get-rooms` (POST) - active rooms with member counts
/// - CORS per configuration and TraceLayer for request logging
pub fn build_routes(state: Arc<AppState>, cors_origins: &CorsOrigins) -> Router {
    let routes = Router::new()
        .route("/ws", get(upgrade_socket))
        .route("/rooms", get(list_rooms))
        .route("/get-rooms", post(list_rooms))
        .with_state(state);

    // Layer order (bottom-to-top execution):
    // 1. CorsLayer - answer preflight, stamp CORS headers
    // 2. TraceLayer - log request details
    routes
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: &CorsOrigins) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    match origins {
        CorsOrigins::Any => layer.allow_origin(Any),
        CorsOrigins::List(list) => {
            let values: Vec<HeaderValue> = list
                .iter()
                .filter_map(|origin| match HeaderValue::from_str(origin) {
                    Ok(value) => Some(value),
                    Err(_) => {
                        warn!(target: "signaling.http", origin = %origin, "Ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            layer.allow_origin(AllowOrigin::list(values))
        }
    }
}

async fn upgrade_socket(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    if state.cancel_token.is_cancelled() {
        debug!(target: "signaling.http", "Refusing upgrade while draining");
        return (StatusCode::SERVICE_UNAVAILABLE, "server shutting down").into_response();
    }

    let controller = state.controller.clone();
    let metrics = Arc::clone(&state.metrics);
    let connection_token = state.cancel_token.child_token();

    ws.max_message_size(state.max_message_bytes)
        .on_upgrade(move |socket| serve_connection(socket, controller, connection_token, metrics))
}

async fn list_rooms(State(state): State<Arc<AppState>>) -> Json<RoomList> {
    Json(RoomList {
        rooms: state.controller.rooms().await,
    })
}
