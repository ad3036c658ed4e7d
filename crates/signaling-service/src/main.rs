//! Mesh Signaling Service
//!
//! WebSocket signaling server for small WebRTC mesh rooms.
//!
//! # Servers
//!
//! - HTTP/WebSocket server for clients (default: 0.0.0.0:8181)
//! - HTTP server for health and metrics endpoints (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize tracing
//! 3. Initialize Prometheus metrics recorder
//! 4. Assemble the service (registry, directory, controller, router)
//! 5. Start health HTTP server (liveness, readiness, metrics)
//! 6. Start client server, mark ready
//! 7. Wait for shutdown signal, then drain

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use common::config::LogFormat;
use signaling_service::config::Config;
use signaling_service::observability::{health_router, init_metrics_recorder, HealthState};
use signaling_service::SignalingApp;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Configuration first: the log filter and format come from it
    let config = Config::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {e}");
        e
    })?;

    init_tracing(&config);

    info!(
        bind_address = %config.bind_address,
        health_bind_address = %config.health_bind_address,
        room_capacity = config.room_capacity,
        outbound_buffer = config.outbound_buffer,
        max_message_bytes = config.max_message_bytes,
        shutdown_grace_secs = config.shutdown_grace.as_secs(),
        "Configuration loaded successfully"
    );

    // Must happen before any metrics are recorded
    info!("Initializing Prometheus metrics recorder...");
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;
    info!("Prometheus metrics recorder initialized");

    let root_token = CancellationToken::new();
    let app = SignalingApp::new(&config, root_token.child_token());
    let health_state = Arc::new(HealthState::new(app.metrics()));

    // Health server (MUST succeed - fail startup if it doesn't)
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let health_app = health_router(Arc::clone(&health_state)).merge(metrics_router);

    // Bind listeners BEFORE spawning to fail fast on bind errors
    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;
    info!(addr = %health_addr, "Health server bound successfully");

    let client_addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.bind_address, "Invalid bind address");
        format!("Invalid bind address: {e}")
    })?;
    let client_listener = tokio::net::TcpListener::bind(client_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %client_addr, "Failed to bind signaling server");
            format!("Failed to bind signaling server to {client_addr}: {e}")
        })?;
    info!(addr = %client_addr, "Signaling server bound successfully");

    let health_shutdown_token = root_token.child_token();
    let health_task = tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(health_listener, health_app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    let client_shutdown_token = root_token.child_token();
    let client_router = app.router();
    let client_task = tokio::spawn(async move {
        info!(addr = %client_addr, "Signaling server starting");
        let server = axum::serve(client_listener, client_router).with_graceful_shutdown(
            async move {
                client_shutdown_token.cancelled().await;
                info!("Signaling server shutting down");
            },
        );
        if let Err(e) = server.await {
            error!(error = %e, "Signaling server failed");
        }
    });

    health_state.set_ready();
    info!("Signaling service running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Mark as not ready immediately so load balancers stop sending traffic
    health_state.set_not_ready();

    // Closes every socket with 1001; per-connection cleanup still runs
    let remaining_rooms = app.shutdown(config.shutdown_grace).await;
    if remaining_rooms > 0 {
        warn!(remaining_rooms, "Rooms still open after grace period");
    }

    root_token.cancel();
    if let Err(e) = client_task.await {
        warn!(error = %e, "Signaling server task ended abnormally");
    }
    if let Err(e) = health_task.await {
        warn!(error = %e, "Health server task ended abnormally");
    }

    info!("Signaling service shutdown complete");
    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.observability.log_filter.clone().into());

    let registry = tracing_subscriber::registry().with(filter);
    match config.observability.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
