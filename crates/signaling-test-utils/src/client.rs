//! WebSocket test client speaking the signaling wire protocol.

use common::types::ConnectionId;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::server_harness::TestSignalingServer;

/// How long `recv` waits for an event before failing the test.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// How long `expect_silence` listens before concluding nothing is coming.
pub const SILENCE_WINDOW: Duration = Duration::from_millis(200);

/// One decoded server frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedEvent {
    pub event: String,
    pub data: Value,
}

/// A connected signaling client.
pub struct TestClient {
    id: ConnectionId,
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    /// Open a WebSocket to `server` and read the `connected` greeting.
    pub async fn connect(server: &TestSignalingServer) -> Result<Self, anyhow::Error> {
        let (stream, _) = connect_async(server.ws_url())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to {}: {}", server.ws_url(), e))?;

        let mut client = Self {
            id: ConnectionId::default(),
            stream,
        };

        let data = client.expect_event("connected").await?;
        client.id = serde_json::from_value(data["id"].clone())
            .map_err(|e| anyhow::anyhow!("connected event carried no id: {}", e))?;

        Ok(client)
    }

    /// The id the server assigned on connect.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Send `{"event": event, "data": data}`.
    pub async fn send(&mut self, event: &str, data: Value) -> Result<(), anyhow::Error> {
        let frame = json!({ "event": event, "data": data });
        self.send_raw(&frame.to_string()).await
    }

    /// Send an arbitrary text frame.
    pub async fn send_raw(&mut self, text: &str) -> Result<(), anyhow::Error> {
        self.stream.send(Message::Text(text.to_string())).await?;
        Ok(())
    }

    /// Join `room_id` and return the `all users` list.
    pub async fn join(&mut self, room_id: &str) -> Result<Vec<ConnectionId>, anyhow::Error> {
        self.send("join room", json!(room_id)).await?;
        let users = self.expect_event("all users").await?;
        Ok(serde_json::from_value(users)?)
    }

    /// Receive the next event, skipping control frames.
    pub async fn recv(&mut self) -> Result<ReceivedEvent, anyhow::Error> {
        tokio::time::timeout(RECV_TIMEOUT, self.next_event())
            .await
            .map_err(|_| anyhow::anyhow!("timed out waiting for an event"))?
    }

    /// Receive the next event and require its name to be `event`; returns its data.
    pub async fn expect_event(&mut self, event: &str) -> Result<Value, anyhow::Error> {
        let received = self.recv().await?;
        anyhow::ensure!(
            received.event == event,
            "expected event '{}', got '{}' with {}",
            event,
            received.event,
            received.data
        );
        Ok(received.data)
    }

    /// Require that no event arrives within `SILENCE_WINDOW`.
    pub async fn expect_silence(&mut self) -> Result<(), anyhow::Error> {
        match tokio::time::timeout(SILENCE_WINDOW, self.next_event()).await {
            Err(_) => Ok(()),
            Ok(Ok(received)) => Err(anyhow::anyhow!(
                "expected silence, got '{}' with {}",
                received.event,
                received.data
            )),
            Ok(Err(e)) => Err(e),
        }
    }

    /// Wait for the server to close the socket; returns the close code if any.
    pub async fn expect_close(&mut self) -> Result<Option<u16>, anyhow::Error> {
        tokio::time::timeout(RECV_TIMEOUT, async {
            loop {
                match self.stream.next().await {
                    Some(Ok(Message::Close(frame))) => {
                        return Ok(frame.map(|f| u16::from(f.code)));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(anyhow::anyhow!("socket error: {}", e)),
                    None => return Ok(None),
                }
            }
        })
        .await
        .map_err(|_| anyhow::anyhow!("timed out waiting for close"))?
    }

    /// Close the socket from the client side.
    pub async fn close(mut self) -> Result<(), anyhow::Error> {
        self.stream.close(None).await?;
        Ok(())
    }

    async fn next_event(&mut self) -> Result<ReceivedEvent, anyhow::Error> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    let mut frame: Value = serde_json::from_str(&text)?;
                    let event = frame["event"]
                        .as_str()
                        .ok_or_else(|| anyhow::anyhow!("frame without event: {}", text))?
                        .to_string();
                    let data = frame
                        .get_mut("data")
                        .map(Value::take)
                        .unwrap_or(Value::Null);
                    return Ok(ReceivedEvent { event, data });
                }
                Some(Ok(Message::Close(frame))) => {
                    return Err(anyhow::anyhow!("socket closed: {:?}", frame));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(anyhow::anyhow!("socket error: {}", e)),
                None => return Err(anyhow::anyhow!("socket closed")),
            }
        }
    }
}
