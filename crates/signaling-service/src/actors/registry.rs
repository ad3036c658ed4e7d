//! `ConnectionRegistry` - the set of live client connections.
//!
//! Each registered connection owns a bounded outbound queue drained by its
//! `ConnectionActor`. Everything that wants to push an event to a client goes
//! through [`ConnectionRegistry::deliver`], which never blocks: a closed queue
//! is reported as `UnknownTarget`. A full queue drops pointer and reaction
//! events; any other event that does not fit evicts the connection, whose
//! actor then closes the socket and runs the normal disconnect cleanup.
//!
//! The registry also remembers which room each connection joined. That value
//! is authoritative for relay and broadcast scoping, and [`take_room`] hands
//! it out exactly once so leave and disconnect cannot both clean up.
//!
//! [`take_room`]: ConnectionRegistry::take_room

use crate::errors::SignalingError;
use crate::observability::metrics;
use crate::protocol::ServerEvent;

use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use chrono::{DateTime, Utc};
use common::types::{ConnectionId, RoomId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug)]
struct ConnectionEntry {
    outbound: mpsc::Sender<ServerEvent>,
    mailbox: Arc<MailboxMonitor>,
    evict: CancellationToken,
    room: Option<RoomId>,
    display_name: Option<String>,
    connected_at: DateTime<Utc>,
}

/// A freshly registered connection.
#[derive(Debug)]
pub struct Registration {
    /// Server-assigned id.
    pub id: ConnectionId,
    /// Receiving end of the outbound queue.
    pub outbound: mpsc::Receiver<ServerEvent>,
    /// Queue depth monitor shared with the registry.
    pub mailbox: Arc<MailboxMonitor>,
    /// Cancelled when the connection fell too far behind to stay consistent.
    pub evicted: CancellationToken,
}

/// Per-fan-out delivery counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
}

/// What was left behind by an unregistered connection.
#[derive(Debug, Clone)]
pub struct Departed {
    /// Room the connection was still in, if any.
    pub room: Option<RoomId>,
    /// How long the connection was registered.
    pub connected_for: chrono::Duration,
}

/// Shared handle to the registry. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<ConnectionId, ConnectionEntry>>>,
    outbound_buffer: usize,
    metrics: Arc<ActorMetrics>,
}

impl ConnectionRegistry {
    /// Create an empty registry whose outbound queues hold `outbound_buffer` events.
    #[must_use]
    pub fn new(outbound_buffer: usize, metrics: Arc<ActorMetrics>) -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            outbound_buffer: outbound_buffer.max(1),
            metrics,
        }
    }

    /// Register a new connection under a fresh id.
    pub async fn register(&self) -> Registration {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.outbound_buffer);
        let mailbox = Arc::new(MailboxMonitor::new(ActorType::Connection, id.to_string()));
        let evict = CancellationToken::new();

        let total = {
            let mut connections = self.connections.write().await;
            connections.insert(
                id,
                ConnectionEntry {
                    outbound: tx,
                    mailbox: Arc::clone(&mailbox),
                    evict: evict.clone(),
                    room: None,
                    display_name: None,
                    connected_at: Utc::now(),
                },
            );
            connections.len()
        };
        self.metrics.connection_created();

        info!(
            target: "signaling.registry",
            connection_id = %id,
            total_connections = total,
            "Connection registered"
        );

        Registration {
            id,
            outbound: rx,
            mailbox,
            evicted: evict,
        }
    }

    /// Remove a connection. Idempotent: only the first call returns `Some`.
    pub async fn unregister(&self, id: ConnectionId) -> Option<Departed> {
        let entry = self.connections.write().await.remove(&id)?;
        self.metrics.connection_closed();

        let departed = Departed {
            room: entry.room,
            connected_for: Utc::now() - entry.connected_at,
        };

        info!(
            target: "signaling.registry",
            connection_id = %id,
            in_room = departed.room.is_some(),
            connected_secs = departed.connected_for.num_seconds(),
            "Connection unregistered"
        );

        Some(departed)
    }

    /// Whether `id` is currently registered.
    pub async fn is_live(&self, id: ConnectionId) -> bool {
        self.connections.read().await.contains_key(&id)
    }

    /// Number of registered connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Room `id` is currently in.
    pub async fn room_of(&self, id: ConnectionId) -> Option<RoomId> {
        self.connections
            .read()
            .await
            .get(&id)
            .and_then(|entry| entry.room.clone())
    }

    /// Record that `id` is now in `room`.
    ///
    /// Fails with `UnknownTarget` if the connection went away in the meantime.
    pub async fn set_room(&self, id: ConnectionId, room: RoomId) -> Result<(), SignalingError> {
        let mut connections = self.connections.write().await;
        let entry = connections
            .get_mut(&id)
            .ok_or(SignalingError::UnknownTarget)?;
        entry.room = Some(room);
        Ok(())
    }

    /// Clear and return the room of `id`. Returns `None` if already cleared.
    pub async fn take_room(&self, id: ConnectionId) -> Option<RoomId> {
        self.connections
            .write()
            .await
            .get_mut(&id)
            .and_then(|entry| entry.room.take())
    }

    /// Remember the display name `id` announced.
    pub async fn set_display_name(&self, id: ConnectionId, name: String) {
        if let Some(entry) = self.connections.write().await.get_mut(&id) {
            entry.display_name = Some(name);
        }
    }

    /// Last display name `id` announced.
    pub async fn display_name(&self, id: ConnectionId) -> Option<String> {
        self.connections
            .read()
            .await
            .get(&id)
            .and_then(|entry| entry.display_name.clone())
    }

    /// Queue `event` for `id` without waiting.
    ///
    /// # Errors
    ///
    /// - `UnknownTarget` if `id` is not registered or its queue is closed
    /// - `OutboundQueueFull` if the client is not draining its queue. The event
    ///   is dropped, and unless it is droppable the connection is evicted.
    pub async fn deliver(&self, id: ConnectionId, event: ServerEvent) -> Result<(), SignalingError> {
        let (outbound, mailbox, evict) = {
            let connections = self.connections.read().await;
            let entry = connections.get(&id).ok_or(SignalingError::UnknownTarget)?;
            (
                entry.outbound.clone(),
                Arc::clone(&entry.mailbox),
                entry.evict.clone(),
            )
        };

        let kind = event.kind();
        let droppable = event.is_droppable();
        match outbound.try_send(event) {
            Ok(()) => {
                mailbox.record_enqueue();
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) if droppable => {
                mailbox.record_drop();
                metrics::record_message_dropped(SignalingError::OutboundQueueFull.as_label());
                debug!(
                    target: "signaling.registry",
                    connection_id = %id,
                    event_kind = kind,
                    "Outbound queue full, event dropped"
                );
                Err(SignalingError::OutboundQueueFull)
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                mailbox.record_drop();
                metrics::record_message_dropped("slow_consumer");
                warn!(
                    target: "signaling.registry",
                    connection_id = %id,
                    event_kind = kind,
                    queued = mailbox.current_depth(),
                    "Outbound queue full on a required event, evicting connection"
                );
                evict.cancel();
                Err(SignalingError::OutboundQueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                metrics::record_message_dropped(SignalingError::UnknownTarget.as_label());
                debug!(
                    target: "signaling.registry",
                    connection_id = %id,
                    event_kind = kind,
                    "Outbound queue closed, event dropped"
                );
                Err(SignalingError::UnknownTarget)
            }
        }
    }

    /// Deliver `event` to every connection in `members` except `excluding`.
    ///
    /// Best effort per member: a member that is gone or not keeping up is
    /// skipped and counted, the others still get the event.
    pub async fn fan_out(
        &self,
        members: &[ConnectionId],
        excluding: Option<ConnectionId>,
        event: &ServerEvent,
    ) -> BroadcastReport {
        let kind = event.kind();
        let mut report = BroadcastReport::default();

        for member in members.iter().copied().filter(|m| Some(*m) != excluding) {
            match self.deliver(member, event.clone()).await {
                Ok(()) => report.delivered += 1,
                Err(_) => report.dropped += 1,
            }
        }

        metrics::record_broadcast(kind, report.delivered);
        debug!(
            target: "signaling.broadcast",
            event_kind = kind,
            delivered = report.delivered,
            dropped = report.dropped,
            "Fan-out complete"
        );

        report
    }
}
