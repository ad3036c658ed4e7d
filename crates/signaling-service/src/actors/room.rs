//! `RoomActor` - one actor per non-empty room.
//!
//! The actor owns the room's member list, so capacity checks and membership
//! changes for one room are serialized by its mailbox. Different rooms run in
//! parallel.
//!
//! Every event that depends on membership is queued from inside the actor's
//! turn: `all users` for a joiner, `remove user` for the members left behind,
//! and room broadcasts. A member therefore sees them in the order the room
//! applied the changes. Queuing is a non-blocking `try_send`.
//!
//! # Lifecycle
//!
//! 1. Spawned by the `RoomDirectory` on the first join of a room name
//! 2. Runs while the room has members
//! 3. When the last member leaves, removes its own directory entry and exits;
//!    requests still queued behind that leave see a closed mailbox and the
//!    directory retries them against a fresh actor
//! 4. On cancellation (shutdown) also removes its entry and exits

use crate::errors::SignalingError;
use crate::protocol::ServerEvent;

use super::directory::{release_room, RoomTable};
use super::messages::{JoinOutcome, LeaveOutcome, RoomMessage};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::registry::{BroadcastReport, ConnectionRegistry};

use common::types::{ConnectionId, RoomId};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Default channel buffer size for the room mailbox.
const ROOM_CHANNEL_BUFFER: usize = 64;

/// Handle to a `RoomActor`.
#[derive(Clone, Debug)]
pub struct RoomActorHandle {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    room_id: RoomId,
    mailbox: Arc<MailboxMonitor>,
}

impl RoomActorHandle {
    /// Get the room ID.
    #[must_use]
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Ask the room to admit `connection_id`.
    ///
    /// On success the `all users` event has already been queued for the joiner.
    pub async fn join(&self, connection_id: ConnectionId) -> Result<JoinOutcome, SignalingError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::Join {
            connection_id,
            respond_to: tx,
        })
        .await?;

        rx.await
            .map_err(|e| SignalingError::Internal(format!("response receive failed: {e}")))?
    }

    /// Remove `connection_id` from the room.
    pub async fn leave(&self, connection_id: ConnectionId) -> Result<LeaveOutcome, SignalingError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::Leave {
            connection_id,
            respond_to: tx,
        })
        .await?;

        rx.await
            .map_err(|e| SignalingError::Internal(format!("response receive failed: {e}")))
    }

    /// Current members in join order.
    pub async fn members(&self) -> Result<Vec<ConnectionId>, SignalingError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::Members { respond_to: tx }).await?;

        rx.await
            .map_err(|e| SignalingError::Internal(format!("response receive failed: {e}")))
    }

    /// Queue `event` for every member except `excluding`.
    pub async fn broadcast(
        &self,
        excluding: Option<ConnectionId>,
        event: ServerEvent,
    ) -> Result<BroadcastReport, SignalingError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::Broadcast {
            excluding,
            event,
            respond_to: tx,
        })
        .await?;

        rx.await
            .map_err(|e| SignalingError::Internal(format!("response receive failed: {e}")))
    }

    /// Cancel the room actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Whether the actor has stopped accepting messages.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Current mailbox depth.
    #[must_use]
    pub fn mailbox_depth(&self) -> usize {
        self.mailbox.current_depth()
    }

    async fn send(&self, message: RoomMessage) -> Result<(), SignalingError> {
        self.mailbox.record_enqueue();
        self.sender.send(message).await.map_err(|e| {
            self.mailbox.record_dequeue();
            SignalingError::Internal(format!("channel send failed: {e}"))
        })
    }
}

/// The `RoomActor` implementation.
pub struct RoomActor {
    room_id: RoomId,
    /// Distinguishes this actor from a later one for the same room name.
    generation: u64,
    capacity: usize,
    /// Join order is significant: "all users" lists peers oldest first.
    members: Vec<ConnectionId>,
    /// Mirrors `members.len()` for lock-free listing.
    member_count: Arc<AtomicUsize>,
    rooms: RoomTable,
    registry: ConnectionRegistry,
    receiver: mpsc::Receiver<RoomMessage>,
    cancel_token: CancellationToken,
    metrics: Arc<ActorMetrics>,
    mailbox: Arc<MailboxMonitor>,
}

impl RoomActor {
    /// Spawn a new room actor.
    ///
    /// Returns a handle and the task join handle.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn spawn(
        room_id: RoomId,
        generation: u64,
        capacity: usize,
        member_count: Arc<AtomicUsize>,
        rooms: RoomTable,
        registry: ConnectionRegistry,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (RoomActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);
        let mailbox = Arc::new(MailboxMonitor::new(ActorType::Room, room_id.as_str()));

        let actor = Self {
            room_id: room_id.clone(),
            generation,
            capacity,
            members: Vec::with_capacity(capacity),
            member_count,
            rooms,
            registry,
            receiver,
            cancel_token: cancel_token.clone(),
            metrics,
            mailbox: Arc::clone(&mailbox),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomActorHandle {
            sender,
            cancel_token,
            room_id,
            mailbox,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "signaling.actor.room", fields(room_id = %self.room_id, generation = self.generation))]
    async fn run(mut self) {
        debug!(
            target: "signaling.actor.room",
            room_id = %self.room_id,
            capacity = self.capacity,
            "RoomActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "signaling.actor.room",
                        room_id = %self.room_id,
                        members = self.members.len(),
                        "RoomActor received cancellation signal"
                    );
                    release_room(&self.rooms, &self.room_id, self.generation, &self.metrics).await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_dequeue();
                            let flow = self.handle_message(message).await;
                            self.metrics.record_message_processed();
                            if flow.is_break() {
                                break;
                            }
                        }
                        None => {
                            debug!(
                                target: "signaling.actor.room",
                                room_id = %self.room_id,
                                "RoomActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        debug!(
            target: "signaling.actor.room",
            room_id = %self.room_id,
            messages_processed = self.mailbox.messages_processed(),
            peak_mailbox_depth = self.mailbox.peak_depth(),
            "RoomActor stopped"
        );
    }

    async fn handle_message(&mut self, message: RoomMessage) -> ControlFlow<()> {
        match message {
            RoomMessage::Join {
                connection_id,
                respond_to,
            } => {
                let result = self.join(connection_id).await;

                // A refused first joiner leaves nothing to keep the room open
                if self.members.is_empty() {
                    self.close().await;
                    let _ = respond_to.send(result);
                    return ControlFlow::Break(());
                }

                let _ = respond_to.send(result);
                ControlFlow::Continue(())
            }

            RoomMessage::Leave {
                connection_id,
                respond_to,
            } => {
                let outcome = self.leave(connection_id).await;

                if self.members.is_empty() {
                    self.close().await;
                    let _ = respond_to.send(outcome);
                    return ControlFlow::Break(());
                }

                let _ = respond_to.send(outcome);
                ControlFlow::Continue(())
            }

            RoomMessage::Members { respond_to } => {
                let _ = respond_to.send(self.members.clone());
                ControlFlow::Continue(())
            }

            RoomMessage::Broadcast {
                excluding,
                event,
                respond_to,
            } => {
                let report = self
                    .registry
                    .fan_out(&self.members, excluding, &event)
                    .await;
                let _ = respond_to.send(report);
                ControlFlow::Continue(())
            }
        }
    }

    /// Unpublish an empty room. Runs before the reply so a retried join
    /// cannot find this actor.
    async fn close(&self) {
        release_room(&self.rooms, &self.room_id, self.generation, &self.metrics).await;
        info!(
            target: "signaling.actor.room",
            room_id = %self.room_id,
            "Room empty, closing"
        );
    }

    /// Admit `connection_id` and queue its peer list.
    ///
    /// A joiner that cannot take the peer list is not admitted.
    async fn join(&mut self, connection_id: ConnectionId) -> Result<JoinOutcome, SignalingError> {
        if self.members.contains(&connection_id) {
            let peers = self.peers_of(connection_id);
            self.registry
                .deliver(connection_id, ServerEvent::AllUsers(peers.clone()))
                .await?;
            return Ok(JoinOutcome {
                peers,
                newly_joined: false,
            });
        }

        if self.members.len() >= self.capacity {
            debug!(
                target: "signaling.actor.room",
                room_id = %self.room_id,
                connection_id = %connection_id,
                members = self.members.len(),
                "Join rejected, room full"
            );
            return Err(SignalingError::RoomFull(self.room_id.clone()));
        }

        let peers = self.members.clone();
        if let Err(e) = self
            .registry
            .deliver(connection_id, ServerEvent::AllUsers(peers.clone()))
            .await
        {
            debug!(
                target: "signaling.actor.room",
                room_id = %self.room_id,
                connection_id = %connection_id,
                error = %e,
                "Join abandoned, peer list undeliverable"
            );
            return Err(e);
        }

        self.members.push(connection_id);
        self.member_count.store(self.members.len(), Ordering::SeqCst);

        info!(
            target: "signaling.actor.room",
            room_id = %self.room_id,
            connection_id = %connection_id,
            members = self.members.len(),
            "Member joined"
        );

        Ok(JoinOutcome {
            peers,
            newly_joined: true,
        })
    }

    /// Remove `connection_id` and tell the members that remain.
    async fn leave(&mut self, connection_id: ConnectionId) -> LeaveOutcome {
        let before = self.members.len();
        self.members.retain(|member| *member != connection_id);
        let removed = self.members.len() != before;

        let mut notified = 0;
        if removed {
            self.member_count.store(self.members.len(), Ordering::SeqCst);
            notified = self
                .registry
                .fan_out(
                    &self.members,
                    None,
                    &ServerEvent::RemoveUser {
                        removed_id: connection_id,
                    },
                )
                .await
                .delivered;
            info!(
                target: "signaling.actor.room",
                room_id = %self.room_id,
                connection_id = %connection_id,
                members = self.members.len(),
                notified = notified,
                "Member left"
            );
        }

        LeaveOutcome {
            removed,
            remaining: self.members.clone(),
            notified,
        }
    }

    fn peers_of(&self, connection_id: ConnectionId) -> Vec<ConnectionId> {
        self.members
            .iter()
            .copied()
            .filter(|member| *member != connection_id)
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::directory::ManagedRoom;
    use crate::actors::registry::Registration;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::sync::RwLock;

    struct Fixture {
        handle: RoomActorHandle,
        task: JoinHandle<()>,
        rooms: RoomTable,
        registry: ConnectionRegistry,
        member_count: Arc<AtomicUsize>,
    }

    /// Spawn a room actor and publish it in a table, as the directory does.
    async fn spawn_room(capacity: usize) -> Fixture {
        let rooms: RoomTable = Arc::new(RwLock::new(HashMap::new()));
        let member_count = Arc::new(AtomicUsize::new(0));
        let metrics = ActorMetrics::new();
        let registry = ConnectionRegistry::new(8, Arc::clone(&metrics));
        let (handle, task) = RoomActor::spawn(
            RoomId::from("r1"),
            1,
            capacity,
            Arc::clone(&member_count),
            Arc::clone(&rooms),
            registry.clone(),
            CancellationToken::new(),
            Arc::clone(&metrics),
        );
        metrics.room_created();
        rooms.write().await.insert(
            RoomId::from("r1"),
            ManagedRoom::new(handle.clone(), 1, Arc::clone(&member_count)),
        );

        Fixture {
            handle,
            task,
            rooms,
            registry,
            member_count,
        }
    }

    impl Fixture {
        async fn connect(&self) -> Registration {
            self.registry.register().await
        }
    }

    fn drain(registration: &mut Registration) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = registration.outbound.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_join_returns_peers_in_join_order() {
        let room = spawn_room(4).await;
        let a = room.connect().await;
        let b = room.connect().await;
        let c = room.connect().await;

        assert!(room.handle.join(a.id).await.unwrap().peers.is_empty());
        assert_eq!(room.handle.join(b.id).await.unwrap().peers, vec![a.id]);
        assert_eq!(room.handle.join(c.id).await.unwrap().peers, vec![a.id, b.id]);
        assert_eq!(room.handle.members().await.unwrap(), vec![a.id, b.id, c.id]);
        assert_eq!(room.member_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_join_queues_peer_list_for_joiner() {
        let room = spawn_room(4).await;
        let mut a = room.connect().await;
        let mut b = room.connect().await;

        room.handle.join(a.id).await.unwrap();
        room.handle.join(b.id).await.unwrap();

        assert!(matches!(
            drain(&mut a).as_slice(),
            [ServerEvent::AllUsers(peers)] if peers.is_empty()
        ));
        assert!(matches!(
            drain(&mut b).as_slice(),
            [ServerEvent::AllUsers(peers)] if *peers == vec![a.id]
        ));
    }

    #[tokio::test]
    async fn test_join_rejected_at_capacity() {
        let room = spawn_room(2).await;
        let a = room.connect().await;
        let b = room.connect().await;
        let c = room.connect().await;
        room.handle.join(a.id).await.unwrap();
        room.handle.join(b.id).await.unwrap();

        let result = room.handle.join(c.id).await;
        assert!(matches!(result, Err(SignalingError::RoomFull(id)) if id.as_str() == "r1"));
        assert_eq!(room.handle.members().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_rejoin_does_not_change_membership() {
        let room = spawn_room(2).await;
        let a = room.connect().await;
        let b = room.connect().await;
        room.handle.join(a.id).await.unwrap();
        room.handle.join(b.id).await.unwrap();

        // Already a member of a full room: accepted, nothing changes
        let outcome = room.handle.join(a.id).await.unwrap();
        assert!(!outcome.newly_joined);
        assert_eq!(outcome.peers, vec![b.id]);
        assert_eq!(room.handle.members().await.unwrap(), vec![a.id, b.id]);
    }

    #[tokio::test]
    async fn test_unregistered_joiner_is_not_admitted() {
        let room = spawn_room(4).await;
        let a = room.connect().await;
        room.handle.join(a.id).await.unwrap();

        let result = room.handle.join(ConnectionId::new()).await;
        assert!(matches!(result, Err(SignalingError::UnknownTarget)));
        assert_eq!(room.handle.members().await.unwrap(), vec![a.id]);
    }

    #[tokio::test]
    async fn test_refused_first_joiner_closes_room() {
        let room = spawn_room(4).await;

        let result = room.handle.join(ConnectionId::new()).await;
        assert!(matches!(result, Err(SignalingError::UnknownTarget)));

        tokio::time::timeout(Duration::from_secs(1), room.task)
            .await
            .expect("room actor should stop")
            .unwrap();
        assert!(room.rooms.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_leave_notifies_remaining_members() {
        let room = spawn_room(4).await;
        let a = room.connect().await;
        let mut b = room.connect().await;
        room.handle.join(a.id).await.unwrap();
        room.handle.join(b.id).await.unwrap();
        drain(&mut b);

        let outcome = room.handle.leave(a.id).await.unwrap();
        assert!(outcome.removed);
        assert_eq!(outcome.remaining, vec![b.id]);
        assert_eq!(outcome.notified, 1);
        assert!(matches!(
            drain(&mut b).as_slice(),
            [ServerEvent::RemoveUser { removed_id }] if *removed_id == a.id
        ));

        let outcome = room.handle.leave(a.id).await.unwrap();
        assert!(!outcome.removed);
        assert_eq!(outcome.remaining, vec![b.id]);
        assert!(drain(&mut b).is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_skips_origin() {
        let room = spawn_room(4).await;
        let mut a = room.connect().await;
        let mut b = room.connect().await;
        room.handle.join(a.id).await.unwrap();
        room.handle.join(b.id).await.unwrap();
        drain(&mut a);
        drain(&mut b);

        let report = room
            .handle
            .broadcast(Some(a.id), ServerEvent::RemoveUser { removed_id: a.id })
            .await
            .unwrap();

        assert_eq!(report.delivered, 1);
        assert!(drain(&mut a).is_empty());
        assert_eq!(drain(&mut b).len(), 1);
    }

    #[tokio::test]
    async fn test_mailbox_depth_counts_queued_requests() {
        let room = spawn_room(4).await;

        // The actor cannot run until this task yields, so all three stay queued
        let mut replies = Vec::new();
        for _ in 0..3 {
            let (tx, rx) = oneshot::channel();
            room.handle
                .send(RoomMessage::Members { respond_to: tx })
                .await
                .unwrap();
            replies.push(rx);
        }
        assert_eq!(room.handle.mailbox_depth(), 3);

        for rx in replies {
            assert!(rx.await.unwrap().is_empty());
        }
        assert_eq!(room.handle.mailbox_depth(), 0);
        assert_eq!(room.handle.mailbox.peak_depth(), 3);
        assert_eq!(room.handle.mailbox.messages_processed(), 3);
    }

    #[tokio::test]
    async fn test_last_leave_unpublishes_and_stops() {
        let room = spawn_room(4).await;
        let a = room.connect().await;
        room.handle.join(a.id).await.unwrap();

        let outcome = room.handle.leave(a.id).await.unwrap();
        assert!(outcome.removed);
        assert!(outcome.remaining.is_empty());

        tokio::time::timeout(Duration::from_secs(1), room.task)
            .await
            .expect("room actor should stop")
            .unwrap();
        assert!(room.rooms.read().await.is_empty());
        assert!(room.handle.is_closed());
        assert!(room.handle.join(a.id).await.is_err());
    }

    #[tokio::test]
    async fn test_cancel_stops_actor() {
        let room = spawn_room(4).await;
        let a = room.connect().await;
        room.handle.join(a.id).await.unwrap();

        room.handle.cancel();
        tokio::time::timeout(Duration::from_secs(1), room.task)
            .await
            .expect("room actor should stop")
            .unwrap();
        assert!(room.handle.members().await.is_err());
        assert!(room.rooms.read().await.is_empty());
    }
}
