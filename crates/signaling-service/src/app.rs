//! Service assembly: wires the registry, directory and controller into a router.

use crate::actors::directory::RoomDirectory;
use crate::actors::metrics::ActorMetrics;
use crate::actors::registry::ConnectionRegistry;
use crate::config::Config;
use crate::http::{build_routes, AppState};
use crate::lifecycle::SessionController;

use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// A fully wired signaling service, ready to be served.
pub struct SignalingApp {
    controller: SessionController,
    metrics: Arc<ActorMetrics>,
    cancel_token: CancellationToken,
    router: Router,
}

impl SignalingApp {
    /// Build the service from configuration.
    ///
    /// Room actors and connection tasks run under child tokens of
    /// `cancel_token`; cancelling it stops them all.
    #[must_use]
    pub fn new(config: &Config, cancel_token: CancellationToken) -> Self {
        let metrics = ActorMetrics::new();
        let registry = ConnectionRegistry::new(config.outbound_buffer, Arc::clone(&metrics));
        let directory = RoomDirectory::new(
            config.room_capacity,
            registry.clone(),
            cancel_token.child_token(),
            Arc::clone(&metrics),
        );
        let controller = SessionController::new(registry, directory, config.limits);

        let state = Arc::new(AppState {
            controller: controller.clone(),
            metrics: Arc::clone(&metrics),
            cancel_token: cancel_token.clone(),
            max_message_bytes: config.max_message_bytes,
        });
        let router = build_routes(state, &config.cors_origins);

        info!(
            target: "signaling.app",
            room_capacity = config.room_capacity,
            outbound_buffer = config.outbound_buffer,
            "Signaling service assembled"
        );

        Self {
            controller,
            metrics,
            cancel_token,
            router,
        }
    }

    /// The client-facing router (`/ws`, `/rooms`, `/get-rooms`).
    #[must_use]
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    #[must_use]
    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    #[must_use]
    pub fn metrics(&self) -> Arc<ActorMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Cancel every connection and room, then wait up to `grace` for rooms to stop.
    ///
    /// Returns the number of rooms that had not stopped in time.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        self.cancel_token.cancel();
        self.controller.directory().shutdown(grace).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::types::RoomId;
    use std::collections::HashMap;

    fn config(capacity: &str) -> Config {
        let vars = HashMap::from([("SIGNALING_ROOM_CAPACITY".to_string(), capacity.to_string())]);
        Config::from_vars(&vars).unwrap()
    }

    #[tokio::test]
    async fn test_app_uses_configured_capacity() {
        let app = SignalingApp::new(&config("2"), CancellationToken::new());
        assert_eq!(app.controller().directory().capacity(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_stops_rooms() {
        let app = SignalingApp::new(&config("4"), CancellationToken::new());
        let a = app.controller().connect().await;
        app.controller().join(a.id, RoomId::from("r1")).await.unwrap();
        assert_eq!(app.metrics().room_count(), 1);

        let remaining = app.shutdown(Duration::from_secs(1)).await;

        assert_eq!(remaining, 0);
        assert!(app.controller().directory().list_rooms().await.is_empty());
    }
}
