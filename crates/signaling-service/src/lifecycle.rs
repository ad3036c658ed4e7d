//! `SessionController` - per-connection session lifecycle.
//!
//! Drives a connection through `Connected -> Joined -> Disconnected`:
//!
//! - **connect**: register, tell the client its id
//! - **join**: admit into a room (leaving any other room first) and send the
//!   existing members, or reject with `room full`
//! - **leave** / **disconnect**: remove from the room and notify the members
//!   that remain, exactly once
//!
//! Room-scoped side-channel requests (name, chat, reaction, pointer) are
//! checked against the room the registry holds for the connection, never the
//! room the client claims.

use crate::actors::directory::RoomDirectory;
use crate::actors::messages::RoomSummary;
use crate::actors::registry::{ConnectionRegistry, Registration};
use crate::config::RequestLimits;
use crate::errors::SignalingError;
use crate::observability::metrics;
use crate::protocol::{ClientRequest, ServerEvent, SignalEnvelope, SignalKind, SignalPayload};
use crate::routing::{BroadcastService, SignalRelay};

use common::types::{ConnectionId, RoomId};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Name announced when the client sends an empty one.
const UNKNOWN_NAME: &str = "unknown";

/// Chat label used when neither the message nor the session carries a name.
const UNKNOWN_SENDER: &str = "Unknown";

/// Longest accepted reaction type.
const MAX_REACTION_LENGTH: usize = 64;

/// Orchestrates sessions over the registry, directory, relay and broadcast.
#[derive(Debug, Clone)]
pub struct SessionController {
    registry: ConnectionRegistry,
    directory: RoomDirectory,
    relay: SignalRelay,
    broadcast: BroadcastService,
    limits: RequestLimits,
}

impl SessionController {
    #[must_use]
    pub fn new(
        registry: ConnectionRegistry,
        directory: RoomDirectory,
        limits: RequestLimits,
    ) -> Self {
        let relay = SignalRelay::new(registry.clone());
        let broadcast = BroadcastService::new(directory.clone());
        Self {
            registry,
            directory,
            relay,
            broadcast,
            limits,
        }
    }

    /// The connection registry.
    #[must_use]
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// The room directory.
    #[must_use]
    pub fn directory(&self) -> &RoomDirectory {
        &self.directory
    }

    /// Register a new connection and queue its `connected` event.
    pub async fn connect(&self) -> Registration {
        let registration = self.registry.register().await;
        let _ = self
            .registry
            .deliver(
                registration.id,
                ServerEvent::Connected {
                    id: registration.id,
                },
            )
            .await;
        registration
    }

    /// Handle one decoded client request. Failures are reported to the
    /// requester as events; nothing here ends the connection.
    pub async fn handle(&self, connection_id: ConnectionId, request: ClientRequest) {
        let started = Instant::now();
        let event = request.event_name();

        let result = match request {
            ClientRequest::JoinRoom { room_id } => {
                self.join(connection_id, room_id).await.map(|_| ())
            }
            ClientRequest::SendingSignal { target_id, signal } => {
                self.signal(connection_id, target_id, SignalKind::Offer, signal)
                    .await
            }
            ClientRequest::ReturningSignal { target_id, signal } => {
                self.signal(connection_id, target_id, SignalKind::Answer, signal)
                    .await
            }
            ClientRequest::AnnounceName { room_id, name } => {
                self.announce_name(connection_id, &room_id, name).await
            }
            ClientRequest::SendMessage {
                room_id,
                text,
                from,
            } => self.chat(connection_id, &room_id, text, from).await,
            ClientRequest::SendReaction { room_id, reaction } => {
                self.reaction(connection_id, &room_id, reaction).await
            }
            ClientRequest::PointerMove { room_id, x, y } => {
                self.pointer(connection_id, &room_id, x, y).await
            }
            ClientRequest::LeaveRoom => {
                self.leave(connection_id).await;
                Ok(())
            }
        };

        if let Err(error) = result {
            self.reject(connection_id, event, &error).await;
        }

        metrics::record_request_latency(event, started.elapsed());
    }

    /// Report a failed request to the requester.
    pub async fn reject(&self, connection_id: ConnectionId, event: &str, error: &SignalingError) {
        metrics::record_request_rejected(error.as_label());

        let reply = match error {
            SignalingError::RoomFull(room_id) => ServerEvent::RoomFull {
                room_id: room_id.clone(),
            },
            // Relay races with disconnect are expected; the sender is not told
            SignalingError::UnknownTarget | SignalingError::OutboundQueueFull => {
                debug!(
                    target: "signaling.session",
                    connection_id = %connection_id,
                    event = event,
                    reason = error.as_label(),
                    "Request dropped"
                );
                return;
            }
            SignalingError::Internal(detail) => {
                warn!(
                    target: "signaling.session",
                    connection_id = %connection_id,
                    event = event,
                    error = %detail,
                    "Request failed"
                );
                ServerEvent::from_error(error)
            }
            SignalingError::MalformedRequest(_)
            | SignalingError::NotInRoom
            | SignalingError::Draining => {
                debug!(
                    target: "signaling.session",
                    connection_id = %connection_id,
                    event = event,
                    reason = error.as_label(),
                    "Request rejected"
                );
                ServerEvent::from_error(error)
            }
        };

        let _ = self.registry.deliver(connection_id, reply).await;
    }

    /// Join `room_id`, returning the other members in join order.
    ///
    /// The room queues the `all users` event itself, ahead of any later
    /// membership event. A connection already in another room leaves it
    /// first. Joining the room it is already in re-sends the member list and
    /// changes nothing.
    #[instrument(skip_all, name = "signaling.session.join", fields(connection_id = %connection_id, room_id = %room_id))]
    pub async fn join(
        &self,
        connection_id: ConnectionId,
        room_id: RoomId,
    ) -> Result<Vec<ConnectionId>, SignalingError> {
        self.validate_room_id(&room_id)?;

        if let Some(current) = self.registry.room_of(connection_id).await {
            if current != room_id {
                debug!(
                    target: "signaling.session",
                    connection_id = %connection_id,
                    from_room = %current,
                    to_room = %room_id,
                    "Switching rooms, leaving current room first"
                );
                self.leave(connection_id).await;
            }
        }

        let outcome = match self.directory.join(&room_id, connection_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                metrics::record_join(match &e {
                    SignalingError::RoomFull(_) => "room_full",
                    SignalingError::Draining => "rejected",
                    _ => "error",
                });
                return Err(e);
            }
        };

        if let Err(e) = self.registry.set_room(connection_id, room_id.clone()).await {
            // Disconnected while the room admitted it; undo the admission
            self.cleanup(connection_id, &room_id).await;
            metrics::record_join("error");
            return Err(e);
        }

        metrics::record_join(if outcome.newly_joined {
            "joined"
        } else {
            "rejoined"
        });
        info!(
            target: "signaling.session",
            connection_id = %connection_id,
            room_id = %room_id,
            peers = outcome.peers.len(),
            newly_joined = outcome.newly_joined,
            "Joined room"
        );

        Ok(outcome.peers)
    }

    /// Leave the current room, if any. Returns the room left.
    pub async fn leave(&self, connection_id: ConnectionId) -> Option<RoomId> {
        let room_id = self.registry.take_room(connection_id).await?;
        self.cleanup(connection_id, &room_id).await;
        Some(room_id)
    }

    /// Tear down a connection: leave its room, then forget it. Safe to call twice.
    #[instrument(skip_all, name = "signaling.session.disconnect", fields(connection_id = %connection_id))]
    pub async fn disconnect(&self, connection_id: ConnectionId) {
        let Some(departed) = self.registry.unregister(connection_id).await else {
            return;
        };

        if let Some(room_id) = &departed.room {
            self.cleanup(connection_id, room_id).await;
        }

        info!(
            target: "signaling.session",
            connection_id = %connection_id,
            was_joined = departed.room.is_some(),
            session_secs = departed.connected_for.num_seconds(),
            "Session ended"
        );
    }

    /// Remove `connection_id` from `room_id`. The room notifies the members that remain.
    async fn cleanup(&self, connection_id: ConnectionId, room_id: &RoomId) {
        let outcome = self.directory.leave(room_id, connection_id).await;
        if !outcome.removed {
            return;
        }

        info!(
            target: "signaling.session",
            connection_id = %connection_id,
            room_id = %room_id,
            remaining = outcome.remaining.len(),
            notified = outcome.notified,
            "Left room"
        );
    }

    /// Relay a handshake payload to `target_id`.
    pub async fn signal(
        &self,
        connection_id: ConnectionId,
        target_id: ConnectionId,
        kind: SignalKind,
        payload: SignalPayload,
    ) -> Result<(), SignalingError> {
        self.relay
            .relay(SignalEnvelope {
                from: connection_id,
                to: target_id,
                kind,
                payload,
            })
            .await
    }

    /// Announce a display name to the rest of the room.
    pub async fn announce_name(
        &self,
        connection_id: ConnectionId,
        room_id: &RoomId,
        name: String,
    ) -> Result<(), SignalingError> {
        let room_id = self.require_room(connection_id, room_id).await?;
        if name.len() > self.limits.max_display_name_length {
            return Err(SignalingError::MalformedRequest(format!(
                "name exceeds {} bytes",
                self.limits.max_display_name_length
            )));
        }

        let name = if name.trim().is_empty() {
            UNKNOWN_NAME.to_string()
        } else {
            name
        };
        self.registry
            .set_display_name(connection_id, name.clone())
            .await;

        self.broadcast
            .broadcast(
                &room_id,
                Some(connection_id),
                ServerEvent::UserName {
                    name,
                    from_id: connection_id,
                },
            )
            .await;
        Ok(())
    }

    /// Send chat text to the rest of the room.
    pub async fn chat(
        &self,
        connection_id: ConnectionId,
        room_id: &RoomId,
        text: String,
        from: Option<String>,
    ) -> Result<(), SignalingError> {
        let room_id = self.require_room(connection_id, room_id).await?;
        if text.len() > self.limits.max_chat_length {
            return Err(SignalingError::MalformedRequest(format!(
                "message exceeds {} bytes",
                self.limits.max_chat_length
            )));
        }
        if from
            .as_ref()
            .is_some_and(|label| label.len() > self.limits.max_display_name_length)
        {
            return Err(SignalingError::MalformedRequest(format!(
                "sender name exceeds {} bytes",
                self.limits.max_display_name_length
            )));
        }

        let name = match from.filter(|label| !label.trim().is_empty()) {
            Some(label) => label,
            None => self
                .registry
                .display_name(connection_id)
                .await
                .unwrap_or_else(|| UNKNOWN_SENDER.to_string()),
        };

        debug!(
            target: "signaling.session",
            connection_id = %connection_id,
            text_bytes = text.len(),
            "Chat message"
        );

        self.broadcast
            .broadcast(
                &room_id,
                Some(connection_id),
                ServerEvent::ReceiveMessage {
                    from: connection_id,
                    name,
                    text,
                },
            )
            .await;
        Ok(())
    }

    /// Send a reaction to the rest of the room.
    pub async fn reaction(
        &self,
        connection_id: ConnectionId,
        room_id: &RoomId,
        reaction: String,
    ) -> Result<(), SignalingError> {
        let room_id = self.require_room(connection_id, room_id).await?;
        if reaction.trim().is_empty() || reaction.len() > MAX_REACTION_LENGTH {
            return Err(SignalingError::MalformedRequest(format!(
                "reaction type must be 1 to {MAX_REACTION_LENGTH} bytes"
            )));
        }

        self.broadcast
            .broadcast(
                &room_id,
                Some(connection_id),
                ServerEvent::Reaction {
                    from: connection_id,
                    reaction,
                },
            )
            .await;
        Ok(())
    }

    /// Send a normalized pointer position to the rest of the room.
    pub async fn pointer(
        &self,
        connection_id: ConnectionId,
        room_id: &RoomId,
        x: f64,
        y: f64,
    ) -> Result<(), SignalingError> {
        let room_id = self.require_room(connection_id, room_id).await?;
        if !in_unit_range(x) || !in_unit_range(y) {
            return Err(SignalingError::MalformedRequest(
                "pointer coordinates must be within [0, 1]".to_string(),
            ));
        }

        self.broadcast
            .broadcast(
                &room_id,
                Some(connection_id),
                ServerEvent::Pointer {
                    from_id: connection_id,
                    x,
                    y,
                },
            )
            .await;
        Ok(())
    }

    /// Non-empty rooms with member counts.
    pub async fn rooms(&self) -> Vec<RoomSummary> {
        self.directory.list_rooms().await
    }

    /// The registered room of `connection_id`, if it matches `claimed`.
    async fn require_room(
        &self,
        connection_id: ConnectionId,
        claimed: &RoomId,
    ) -> Result<RoomId, SignalingError> {
        match self.registry.room_of(connection_id).await {
            Some(room_id) if room_id == *claimed => Ok(room_id),
            _ => Err(SignalingError::NotInRoom),
        }
    }

    fn validate_room_id(&self, room_id: &RoomId) -> Result<(), SignalingError> {
        if room_id.is_blank() {
            return Err(SignalingError::MalformedRequest(
                "roomId must not be empty".to_string(),
            ));
        }
        if room_id.len() > self.limits.max_room_id_length {
            return Err(SignalingError::MalformedRequest(format!(
                "roomId exceeds {} bytes",
                self.limits.max_room_id_length
            )));
        }
        Ok(())
    }
}

fn in_unit_range(value: f64) -> bool {
    value.is_finite() && (0.0..=1.0).contains(&value)
}
