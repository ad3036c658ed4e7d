//! `ConnectionActor` - one task per client WebSocket.
//!
//! Each `ConnectionActor`:
//! - Decodes inbound text frames into `ClientRequest`s for the `SessionController`
//! - Drains the connection's outbound queue onto the socket
//! - Stops on client close, socket error, cancellation, or eviction when
//!   the client stops draining required events
//!
//! # Lifecycle
//!
//! 1. [`serve_connection`] registers the connection and spawns the actor
//! 2. The actor runs until the socket closes or the root token is cancelled
//! 3. [`serve_connection`] disconnects the session, whether the actor exited
//!    cleanly or panicked

use crate::errors::SignalingError;
use crate::lifecycle::SessionController;
use crate::protocol::{ClientRequest, ServerEvent};

use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::registry::Registration;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use common::types::ConnectionId;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Event label used when a frame cannot be decoded into any request.
const UNDECODED_FRAME: &str = "frame";

/// Serve one upgraded WebSocket until it closes.
pub async fn serve_connection(
    socket: WebSocket,
    controller: SessionController,
    cancel_token: CancellationToken,
    metrics: Arc<ActorMetrics>,
) {
    let registration = controller.connect().await;
    let connection_id = registration.id;

    let task = ConnectionActor::spawn(
        socket,
        registration,
        controller.clone(),
        cancel_token,
        Arc::clone(&metrics),
    );

    if let Err(join_error) = task.await {
        if join_error.is_panic() {
            error!(
                target: "signaling.actor.connection",
                connection_id = %connection_id,
                error = ?join_error,
                "Connection actor panicked"
            );
            metrics.record_panic(ActorType::Connection);
        }
    }

    controller.disconnect(connection_id).await;
}

/// The `ConnectionActor` implementation.
pub struct ConnectionActor {
    connection_id: ConnectionId,
    socket: WebSocket,
    outbound: mpsc::Receiver<ServerEvent>,
    mailbox: Arc<MailboxMonitor>,
    evicted: CancellationToken,
    controller: SessionController,
    cancel_token: CancellationToken,
    metrics: Arc<ActorMetrics>,
}

impl ConnectionActor {
    /// Spawn a new connection actor.
    pub fn spawn(
        socket: WebSocket,
        registration: Registration,
        controller: SessionController,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> JoinHandle<()> {
        let actor = Self {
            connection_id: registration.id,
            socket,
            outbound: registration.outbound,
            mailbox: registration.mailbox,
            evicted: registration.evicted,
            controller,
            cancel_token,
            metrics,
        };

        tokio::spawn(actor.run())
    }

    #[instrument(skip_all, name = "signaling.actor.connection", fields(connection_id = %self.connection_id))]
    async fn run(self) {
        let Self {
            connection_id,
            socket,
            mut outbound,
            mailbox,
            evicted,
            controller,
            cancel_token,
            metrics,
        } = self;

        debug!(
            target: "signaling.actor.connection",
            connection_id = %connection_id,
            "ConnectionActor started"
        );

        let (mut sink, mut stream) = socket.split();
        let mut frames_received: u64 = 0;

        loop {
            tokio::select! {
                () = cancel_token.cancelled() => {
                    debug!(
                        target: "signaling.actor.connection",
                        connection_id = %connection_id,
                        "ConnectionActor received cancellation signal"
                    );
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::AWAY,
                            reason: "server shutting down".into(),
                        })))
                        .await;
                    break;
                }

                () = evicted.cancelled() => {
                    warn!(
                        target: "signaling.actor.connection",
                        connection_id = %connection_id,
                        queued = mailbox.current_depth(),
                        "Evicting slow client"
                    );
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::AGAIN,
                            reason: "client too slow".into(),
                        })))
                        .await;
                    break;
                }

                event = outbound.recv() => {
                    let Some(event) = event else {
                        break;
                    };
                    mailbox.record_dequeue();

                    let text = match event.to_json() {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(
                                target: "signaling.actor.connection",
                                connection_id = %connection_id,
                                event_kind = event.kind(),
                                error = %e,
                                "Dropping unencodable event"
                            );
                            continue;
                        }
                    };

                    if let Err(e) = sink.send(Message::Text(text)).await {
                        debug!(
                            target: "signaling.actor.connection",
                            connection_id = %connection_id,
                            error = %e,
                            "Socket write failed"
                        );
                        break;
                    }
                }

                frame = stream.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            frames_received += 1;
                            metrics.record_message_processed();
                            match ClientRequest::decode(&text) {
                                Ok(request) => controller.handle(connection_id, request).await,
                                Err(e) => controller.reject(connection_id, UNDECODED_FRAME, &e).await,
                            }
                        }
                        Some(Ok(Message::Binary(data))) => {
                            frames_received += 1;
                            let e = SignalingError::MalformedRequest(
                                "binary frames are not supported".to_string(),
                            );
                            debug!(
                                target: "signaling.actor.connection",
                                connection_id = %connection_id,
                                bytes = data.len(),
                                "Binary frame rejected"
                            );
                            controller.reject(connection_id, UNDECODED_FRAME, &e).await;
                        }
                        // Pongs are answered by the socket itself
                        Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                        Some(Ok(Message::Close(_))) | None => {
                            debug!(
                                target: "signaling.actor.connection",
                                connection_id = %connection_id,
                                "Client closed connection"
                            );
                            break;
                        }
                        Some(Err(e)) => {
                            debug!(
                                target: "signaling.actor.connection",
                                connection_id = %connection_id,
                                error = %e,
                                "Socket read failed"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "signaling.actor.connection",
            connection_id = %connection_id,
            frames_received = frames_received,
            events_sent = mailbox.messages_processed(),
            events_dropped = mailbox.messages_dropped(),
            "ConnectionActor stopped"
        );
    }
}
