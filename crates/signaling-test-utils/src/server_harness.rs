//! Test server harness for E2E testing
//!
//! Provides `TestSignalingServer` for spawning real signaling server instances in tests.

use signaling_service::config::Config;
use signaling_service::SignalingApp;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Test harness for spawning the signaling server in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_rooms_listing() -> Result<(), anyhow::Error> {
///     let server = TestSignalingServer::spawn().await?;
///     let body = server.get_rooms().await?;
///     assert_eq!(body["rooms"], serde_json::json!([]));
///     Ok(())
/// }
/// ```
pub struct TestSignalingServer {
    addr: SocketAddr,
    app: SignalingApp,
    config: Config,
    cancel_token: CancellationToken,
    _handle: JoinHandle<()>,
}

impl TestSignalingServer {
    /// Spawn a server with default configuration.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with(HashMap::new()).await
    }

    /// Spawn a server with extra `SIGNALING_*` variables layered over the defaults.
    ///
    /// The server will:
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Start the HTTP/WebSocket server in the background
    pub async fn spawn_with(overrides: HashMap<String, String>) -> Result<Self, anyhow::Error> {
        let mut vars = HashMap::from([(
            "SIGNALING_BIND_ADDRESS".to_string(),
            "127.0.0.1:0".to_string(),
        )]);
        vars.extend(overrides);

        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let cancel_token = CancellationToken::new();
        let app = SignalingApp::new(&config, cancel_token.child_token());
        let router = app.router();

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let server_token = cancel_token.child_token();
        let handle = tokio::spawn(async move {
            let server = axum::serve(listener, router)
                .with_graceful_shutdown(async move { server_token.cancelled().await });
            if let Err(e) = server.await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            app,
            config,
            cancel_token,
            _handle: handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the signaling WebSocket URL.
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the assembled service, for inspecting state directly.
    pub fn app(&self) -> &SignalingApp {
        &self.app
    }

    /// Get reference to the server configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Fetch `GET /rooms` as JSON.
    pub async fn get_rooms(&self) -> Result<serde_json::Value, anyhow::Error> {
        let response = reqwest::get(format!("{}/rooms", self.url())).await?;
        anyhow::ensure!(
            response.status().is_success(),
            "GET /rooms returned {}",
            response.status()
        );
        Ok(response.json().await?)
    }

    /// Poll until the service holds exactly `count` connections.
    ///
    /// Disconnect cleanup runs after the socket closes, so tests that
    /// observe it from another client wait here first.
    pub async fn wait_for_connections(&self, count: usize) -> Result<(), anyhow::Error> {
        let metrics = self.app.metrics();
        tokio::time::timeout(Duration::from_secs(2), async {
            while metrics.connection_count() != count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .map_err(|_| {
            anyhow::anyhow!(
                "expected {} connections, found {}",
                count,
                metrics.connection_count()
            )
        })
    }

    /// Start graceful shutdown: close every socket and stop every room.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        let remaining = self.app.shutdown(grace).await;
        self.cancel_token.cancel();
        remaining
    }
}

impl Drop for TestSignalingServer {
    fn drop(&mut self) {
        // Stop actors and the accept loop when the test completes
        self.cancel_token.cancel();
        self._handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_server_spawns_successfully() -> Result<(), anyhow::Error> {
        let server = TestSignalingServer::spawn().await?;

        assert!(server.url().starts_with("http://127.0.0.1:"));
        assert!(server.ws_url().ends_with("/ws"));

        let body = server.get_rooms().await?;
        assert_eq!(body, serde_json::json!({ "rooms": [] }));

        Ok(())
    }

    #[tokio::test]
    async fn test_server_applies_overrides() -> Result<(), anyhow::Error> {
        let server = TestSignalingServer::spawn_with(HashMap::from([(
            "SIGNALING_ROOM_CAPACITY".to_string(),
            "2".to_string(),
        )]))
        .await?;

        assert_eq!(server.config().room_capacity, 2);
        assert!(server.addr().ip().is_loopback());

        Ok(())
    }
}
