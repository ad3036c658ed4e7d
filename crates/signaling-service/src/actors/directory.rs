//! `RoomDirectory` - maps room names to live `RoomActor`s.
//!
//! A room exists exactly while it has members: the first join spawns its
//! actor, the last leave makes the actor unpublish itself. The directory
//! never awaits a room actor while holding the table lock, and a room actor
//! only takes the lock to remove its own entry, so the two cannot deadlock.
//!
//! Entries carry a generation number. A closing actor only removes the entry
//! if it still carries its own generation, never a successor's.

use crate::errors::SignalingError;
use crate::protocol::ServerEvent;

use super::messages::{JoinOutcome, LeaveOutcome, RoomSummary};
use super::metrics::{ActorMetrics, ActorType};
use super::registry::{BroadcastReport, ConnectionRegistry};
use super::room::{RoomActor, RoomActorHandle};

use chrono::{DateTime, Utc};
use common::types::{ConnectionId, RoomId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A join that lands on a closing room is retried against a fresh actor.
const MAX_JOIN_ATTEMPTS: usize = 3;

const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Shared room table.
pub(crate) type RoomTable = Arc<RwLock<HashMap<RoomId, ManagedRoom>>>;

/// Directory entry for one room actor.
#[derive(Debug)]
pub(crate) struct ManagedRoom {
    handle: RoomActorHandle,
    generation: u64,
    member_count: Arc<AtomicUsize>,
    created_at: DateTime<Utc>,
}

impl ManagedRoom {
    pub(crate) fn new(
        handle: RoomActorHandle,
        generation: u64,
        member_count: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            handle,
            generation,
            member_count,
            created_at: Utc::now(),
        }
    }
}

/// Remove `room_id` from the table if it still belongs to `generation`.
pub(crate) async fn release_room(
    rooms: &RoomTable,
    room_id: &RoomId,
    generation: u64,
    metrics: &ActorMetrics,
) -> bool {
    let mut rooms = rooms.write().await;
    let owned = rooms
        .get(room_id)
        .is_some_and(|managed| managed.generation == generation);
    if owned {
        rooms.remove(room_id);
        metrics.room_removed();
    }
    owned
}

/// Room name → room actor directory. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RoomDirectory {
    rooms: RoomTable,
    capacity: usize,
    registry: ConnectionRegistry,
    next_generation: Arc<AtomicU64>,
    cancel_token: CancellationToken,
    metrics: Arc<ActorMetrics>,
}

impl RoomDirectory {
    /// Create an empty directory. Room actors get child tokens of `cancel_token`.
    ///
    /// Room actors queue membership events through `registry`.
    #[must_use]
    pub fn new(
        capacity: usize,
        registry: ConnectionRegistry,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            capacity,
            registry,
            next_generation: Arc::new(AtomicU64::new(1)),
            cancel_token,
            metrics,
        }
    }

    /// Maximum members per room.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Add `connection_id` to `room_id`, creating the room if needed.
    ///
    /// On success the joiner's `all users` event is already queued.
    ///
    /// # Errors
    ///
    /// - `RoomFull` if the room already holds `capacity` members
    /// - `OutboundQueueFull` or `UnknownTarget` if the joiner cannot take its
    ///   peer list; it is not admitted
    /// - `Draining` once shutdown has started
    /// - `Internal` if the room kept closing underneath the join
    pub async fn join(
        &self,
        room_id: &RoomId,
        connection_id: ConnectionId,
    ) -> Result<JoinOutcome, SignalingError> {
        for attempt in 1..=MAX_JOIN_ATTEMPTS {
            if self.cancel_token.is_cancelled() {
                return Err(SignalingError::Draining);
            }

            let handle = self.get_or_spawn(room_id).await;
            match handle.join(connection_id).await {
                Err(SignalingError::Internal(reason)) if handle.is_closed() => {
                    debug!(
                        target: "signaling.directory",
                        room_id = %room_id,
                        attempt = attempt,
                        reason = %reason,
                        "Room closed during join, retrying"
                    );
                }
                result => return result,
            }
        }

        warn!(
            target: "signaling.directory",
            room_id = %room_id,
            "Join abandoned, room kept closing"
        );
        Err(SignalingError::Internal(format!(
            "room closed during {MAX_JOIN_ATTEMPTS} join attempts"
        )))
    }

    /// Remove `connection_id` from `room_id` and notify the members left behind.
    ///
    /// A missing or closing room yields an empty outcome.
    pub async fn leave(&self, room_id: &RoomId, connection_id: ConnectionId) -> LeaveOutcome {
        let Some(handle) = self.handle_for(room_id).await else {
            return LeaveOutcome::default();
        };

        handle.leave(connection_id).await.unwrap_or_else(|e| {
            debug!(
                target: "signaling.directory",
                room_id = %room_id,
                error = %e,
                "Leave on closed room"
            );
            LeaveOutcome::default()
        })
    }

    /// Queue `event` for the members of `room_id`, skipping `excluding`.
    ///
    /// A missing or closing room reaches nobody.
    pub async fn broadcast(
        &self,
        room_id: &RoomId,
        excluding: Option<ConnectionId>,
        event: ServerEvent,
    ) -> BroadcastReport {
        let Some(handle) = self.handle_for(room_id).await else {
            return BroadcastReport::default();
        };

        handle
            .broadcast(excluding, event)
            .await
            .unwrap_or_else(|e| {
                debug!(
                    target: "signaling.directory",
                    room_id = %room_id,
                    error = %e,
                    "Broadcast on closed room"
                );
                BroadcastReport::default()
            })
    }

    /// Current members of `room_id` in join order; empty if the room does not exist.
    pub async fn members_of(&self, room_id: &RoomId) -> Vec<ConnectionId> {
        let Some(handle) = self.handle_for(room_id).await else {
            return Vec::new();
        };
        handle.members().await.unwrap_or_default()
    }

    /// Non-empty rooms with their member counts, oldest first.
    pub async fn list_rooms(&self) -> Vec<RoomSummary> {
        let mut rooms: Vec<RoomSummary> = self
            .rooms
            .read()
            .await
            .iter()
            .filter_map(|(room_id, managed)| {
                let member_count = managed.member_count.load(Ordering::SeqCst);
                (member_count > 0).then(|| RoomSummary {
                    room_id: room_id.clone(),
                    member_count,
                    created_at: managed.created_at,
                })
            })
            .collect();

        rooms.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.room_id.cmp(&b.room_id))
        });
        rooms
    }

    /// Number of rooms with a live actor.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Stop all room actors, waiting up to `grace` for them to exit.
    ///
    /// Returns the number of rooms still published when the wait ended.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        let rooms_at_start = self.room_count().await;
        info!(
            target: "signaling.directory",
            rooms = rooms_at_start,
            grace_secs = grace.as_secs(),
            "Shutting down room directory"
        );

        self.cancel_token.cancel();

        let drained = tokio::time::timeout(grace, async {
            while self.room_count().await > 0 {
                tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
            }
        })
        .await;

        let remaining = self.room_count().await;
        if drained.is_err() {
            warn!(
                target: "signaling.directory",
                remaining_rooms = remaining,
                "Room actors did not stop within grace period"
            );
        } else {
            info!(target: "signaling.directory", "Room directory shut down");
        }
        remaining
    }

    async fn handle_for(&self, room_id: &RoomId) -> Option<RoomActorHandle> {
        self.rooms
            .read()
            .await
            .get(room_id)
            .map(|managed| managed.handle.clone())
    }

    async fn get_or_spawn(&self, room_id: &RoomId) -> RoomActorHandle {
        if let Some(managed) = self.rooms.read().await.get(room_id) {
            if !managed.handle.is_closed() {
                return managed.handle.clone();
            }
        }

        let mut rooms = self.rooms.write().await;
        if let Some(managed) = rooms.get(room_id) {
            if !managed.handle.is_closed() {
                return managed.handle.clone();
            }
            // Actor died without unpublishing (cancelled or panicked)
            rooms.remove(room_id);
            self.metrics.room_removed();
        }

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let member_count = Arc::new(AtomicUsize::new(0));
        let (handle, task) = RoomActor::spawn(
            room_id.clone(),
            generation,
            self.capacity,
            Arc::clone(&member_count),
            Arc::clone(&self.rooms),
            self.registry.clone(),
            self.cancel_token.child_token(),
            Arc::clone(&self.metrics),
        );
        rooms.insert(
            room_id.clone(),
            ManagedRoom::new(handle.clone(), generation, member_count),
        );
        let total_rooms = rooms.len();
        drop(rooms);

        self.metrics.room_created();
        self.supervise(room_id.clone(), generation, task);

        info!(
            target: "signaling.directory",
            room_id = %room_id,
            total_rooms = total_rooms,
            "Room created"
        );

        handle
    }

    /// Watch a room actor task and unpublish it if it panics.
    fn supervise(&self, room_id: RoomId, generation: u64, task: JoinHandle<()>) {
        let rooms = Arc::clone(&self.rooms);
        let metrics = Arc::clone(&self.metrics);

        tokio::spawn(async move {
            if let Err(join_error) = task.await {
                if join_error.is_panic() {
                    error!(
                        target: "signaling.directory",
                        room_id = %room_id,
                        error = ?join_error,
                        "Room actor panicked"
                    );
                    metrics.record_panic(ActorType::Room);
                    release_room(&rooms, &room_id, generation, &metrics).await;
                }
            }
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::actors::registry::Registration;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// A directory plus a registry that keeps every test connection's queue open.
    struct Harness {
        directory: RoomDirectory,
        registry: ConnectionRegistry,
        held: Mutex<Vec<Registration>>,
    }

    impl Harness {
        async fn connect(&self) -> ConnectionId {
            let registration = self.registry.register().await;
            let id = registration.id;
            self.held.lock().unwrap().push(registration);
            id
        }
    }

    fn harness(capacity: usize) -> Harness {
        let metrics = ActorMetrics::new();
        let registry = ConnectionRegistry::new(16, Arc::clone(&metrics));
        Harness {
            directory: RoomDirectory::new(
                capacity,
                registry.clone(),
                CancellationToken::new(),
                metrics,
            ),
            registry,
            held: Mutex::new(Vec::new()),
        }
    }

    /// Poll until the room disappears from the table.
    async fn wait_for_room_gone(directory: &RoomDirectory, room: &RoomId) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while directory.rooms.read().await.contains_key(room) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("room should be removed");
    }

    #[tokio::test]
    async fn test_first_join_creates_room() {
        let h = harness(4);
        let room = RoomId::from("r1");
        let a = h.connect().await;

        let outcome = h.directory.join(&room, a).await.unwrap();
        assert!(outcome.peers.is_empty());
        assert!(outcome.newly_joined);
        assert_eq!(h.directory.members_of(&room).await, vec![a]);
        assert_eq!(h.directory.room_count().await, 1);
    }

    #[tokio::test]
    async fn test_fifth_join_rejected() {
        let h = harness(4);
        let room = RoomId::from("r1");
        let mut members = Vec::new();
        for _ in 0..4 {
            members.push(h.connect().await);
        }

        for (i, member) in members.iter().enumerate() {
            let outcome = h.directory.join(&room, *member).await.unwrap();
            assert_eq!(outcome.peers.len(), i);
        }

        let fifth = h.connect().await;
        let result = h.directory.join(&room, fifth).await;
        assert!(matches!(result, Err(SignalingError::RoomFull(_))));
        assert_eq!(h.directory.members_of(&room).await, members);
    }

    #[tokio::test]
    async fn test_concurrent_joins_respect_capacity() {
        let h = harness(4);
        let room = RoomId::from("busy");

        let mut tasks = Vec::new();
        for _ in 0..12 {
            let id = h.connect().await;
            let directory = h.directory.clone();
            let room = room.clone();
            tasks.push(tokio::spawn(async move {
                directory.join(&room, id).await.map(|_| id)
            }));
        }

        let mut admitted = HashSet::new();
        let mut rejected = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(id) => {
                    admitted.insert(id);
                }
                Err(SignalingError::RoomFull(_)) => rejected += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!(admitted.len(), 4);
        assert_eq!(rejected, 8);
        let members: HashSet<_> = h.directory.members_of(&room).await.into_iter().collect();
        assert_eq!(members, admitted);
    }

    #[tokio::test]
    async fn test_unregistered_join_creates_no_member() {
        let h = harness(4);
        let room = RoomId::from("r1");

        let result = h.directory.join(&room, ConnectionId::new()).await;
        assert!(matches!(result, Err(SignalingError::UnknownTarget)));
        assert!(h.directory.members_of(&room).await.is_empty());
        assert_eq!(h.directory.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_rooms_are_independent() {
        let h = harness(1);
        let a = h.connect().await;
        let b = h.connect().await;
        h.directory.join(&RoomId::from("a"), a).await.unwrap();
        h.directory.join(&RoomId::from("b"), b).await.unwrap();
        assert_eq!(h.directory.room_count().await, 2);
    }

    #[tokio::test]
    async fn test_last_leave_deletes_room_and_next_join_starts_fresh() {
        let h = harness(4);
        let room = RoomId::from("r1");
        let a = h.connect().await;
        let b = h.connect().await;

        h.directory.join(&room, a).await.unwrap();
        let outcome = h.directory.leave(&room, a).await;
        assert!(outcome.removed);
        assert!(outcome.remaining.is_empty());
        wait_for_room_gone(&h.directory, &room).await;
        assert!(h.directory.list_rooms().await.is_empty());

        let outcome = h.directory.join(&room, b).await.unwrap();
        assert!(outcome.peers.is_empty());
        assert_eq!(h.directory.members_of(&room).await, vec![b]);
    }

    #[tokio::test]
    async fn test_join_racing_last_leave_lands_in_live_room() {
        let h = harness(4);
        let room = RoomId::from("churn");

        for _ in 0..50 {
            let leaver = h.connect().await;
            let joiner = h.connect().await;
            h.directory.join(&room, leaver).await.unwrap();

            let (leave, join) = tokio::join!(
                h.directory.leave(&room, leaver),
                h.directory.join(&room, joiner)
            );
            assert!(leave.removed);
            join.unwrap();

            assert_eq!(h.directory.members_of(&room).await, vec![joiner]);
            h.directory.leave(&room, joiner).await;
            wait_for_room_gone(&h.directory, &room).await;
            h.registry.unregister(leaver).await;
            h.registry.unregister(joiner).await;
        }
    }

    #[tokio::test]
    async fn test_leave_unknown_room_is_empty() {
        let h = harness(4);
        let outcome = h
            .directory
            .leave(&RoomId::from("nowhere"), ConnectionId::new())
            .await;
        assert_eq!(outcome, LeaveOutcome::default());
        assert!(h.directory.members_of(&RoomId::from("nowhere")).await.is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_to_missing_room_reaches_nobody() {
        let h = harness(4);
        let report = h
            .directory
            .broadcast(
                &RoomId::from("nowhere"),
                None,
                ServerEvent::RemoveUser {
                    removed_id: ConnectionId::new(),
                },
            )
            .await;
        assert_eq!(report, BroadcastReport::default());
    }

    #[tokio::test]
    async fn test_list_rooms_reports_counts_only() {
        let h = harness(4);
        let first = RoomId::from("first");
        let second = RoomId::from("second");
        for room in [&first, &first, &second] {
            let id = h.connect().await;
            h.directory.join(room, id).await.unwrap();
        }

        let rooms = h.directory.list_rooms().await;
        let counts: HashMap<String, usize> = rooms
            .iter()
            .map(|summary| (summary.room_id.to_string(), summary.member_count))
            .collect();
        assert_eq!(counts.get("first"), Some(&2));
        assert_eq!(counts.get("second"), Some(&1));

        let json = serde_json::to_value(&rooms).unwrap();
        let text = json.to_string();
        assert!(text.contains("memberCount"));
        assert!(!text.contains("members\""));
    }

    #[tokio::test]
    async fn test_shutdown_stops_room_actors() {
        let h = harness(4);
        for room in ["a", "b"] {
            let id = h.connect().await;
            h.directory.join(&RoomId::from(room), id).await.unwrap();
        }

        let remaining = h.directory.shutdown(Duration::from_secs(1)).await;
        assert_eq!(remaining, 0);
        assert!(h.directory.list_rooms().await.is_empty());
    }

    #[tokio::test]
    async fn test_join_after_shutdown_is_draining() {
        let h = harness(4);
        h.directory.shutdown(Duration::from_millis(10)).await;

        let id = h.connect().await;
        let result = h.directory.join(&RoomId::from("late"), id).await;
        assert!(matches!(result, Err(SignalingError::Draining)));
    }
}
