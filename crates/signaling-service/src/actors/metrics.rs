//! Actor metrics and mailbox monitoring.
//!
//! Provides mailbox depth monitoring with per-actor thresholds:
//!
//! | Actor Type | Normal | Warning | Critical |
//! |------------|--------|---------|----------|
//! | Room       | < 64   | 64-256  | > 256    |
//! | Connection | < 32   | 32-128  | > 128    |
//!
//! A room actor only ever sees membership operations, so a deep room mailbox
//! means a join storm. A deep connection queue means a slow browser.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Mailbox depth thresholds for room actors.
pub const ROOM_MAILBOX_NORMAL: usize = 64;
pub const ROOM_MAILBOX_WARNING: usize = 256;

/// Mailbox depth thresholds for connection outbound queues.
pub const CONNECTION_MAILBOX_NORMAL: usize = 32;
pub const CONNECTION_MAILBOX_WARNING: usize = 128;

/// Actor type for metrics labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    /// `RoomActor` (one per non-empty room).
    Room,
    /// `ConnectionActor` (one per WebSocket).
    Connection,
}

impl ActorType {
    /// Returns the actor type as a string for metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActorType::Room => "room",
            ActorType::Connection => "connection",
        }
    }

    /// Returns the warning threshold for this actor type.
    #[must_use]
    pub const fn warning_threshold(&self) -> usize {
        match self {
            ActorType::Room => ROOM_MAILBOX_WARNING,
            ActorType::Connection => CONNECTION_MAILBOX_WARNING,
        }
    }

    /// Returns the normal threshold for this actor type.
    #[must_use]
    pub const fn normal_threshold(&self) -> usize {
        match self {
            ActorType::Room => ROOM_MAILBOX_NORMAL,
            ActorType::Connection => CONNECTION_MAILBOX_NORMAL,
        }
    }
}

/// Mailbox depth level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    /// Below normal threshold.
    Normal,
    /// Between normal and warning thresholds.
    Warning,
    /// Above warning threshold.
    Critical,
}

/// Mailbox monitor for tracking queue depth.
#[derive(Debug)]
pub struct MailboxMonitor {
    actor_type: ActorType,
    /// Room name or connection id.
    actor_id: String,
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
    messages_processed: AtomicU64,
    messages_dropped: AtomicU64,
}

impl MailboxMonitor {
    /// Create a new mailbox monitor for the given actor.
    #[must_use]
    pub fn new(actor_type: ActorType, actor_id: impl Into<String>) -> Self {
        Self {
            actor_type,
            actor_id: actor_id.into(),
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
        }
    }

    /// Record a message being added to the mailbox.
    pub fn record_enqueue(&self) {
        let new_depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;

        let mut current_peak = self.peak_depth.load(Ordering::Relaxed);
        while new_depth > current_peak {
            match self.peak_depth.compare_exchange_weak(
                current_peak,
                new_depth,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current_peak = actual,
            }
        }

        let level = self.level_for_depth(new_depth);
        if level == MailboxLevel::Critical {
            warn!(
                target: "signaling.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                depth = new_depth,
                threshold = self.actor_type.warning_threshold(),
                "Mailbox depth critical"
            );
        } else if level == MailboxLevel::Warning
            && new_depth == self.actor_type.normal_threshold() + 1
        {
            // Once, when crossing into warning
            debug!(
                target: "signaling.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                depth = new_depth,
                "Mailbox depth elevated"
            );
        }
    }

    /// Record a message being removed from the mailbox (processed).
    pub fn record_dequeue(&self) {
        // Saturating: a dequeue can race ahead of its enqueue bookkeeping
        let _ = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| {
                Some(d.saturating_sub(1))
            });
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a message being dropped due to backpressure.
    pub fn record_drop(&self) {
        let dropped = self.messages_dropped.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(
            target: "signaling.actor.mailbox",
            actor_type = self.actor_type.as_str(),
            actor_id = %self.actor_id,
            dropped = dropped,
            "Message dropped due to backpressure"
        );
    }

    /// Get the current mailbox depth.
    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    /// Get the peak mailbox depth.
    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    /// Get total messages processed.
    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    /// Get total messages dropped.
    #[must_use]
    pub fn messages_dropped(&self) -> u64 {
        self.messages_dropped.load(Ordering::Relaxed)
    }

    /// Get the current mailbox level.
    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        self.level_for_depth(self.current_depth())
    }

    fn level_for_depth(&self, depth: usize) -> MailboxLevel {
        if depth > self.actor_type.warning_threshold() {
            MailboxLevel::Critical
        } else if depth > self.actor_type.normal_threshold() {
            MailboxLevel::Warning
        } else {
            MailboxLevel::Normal
        }
    }
}

/// Aggregated, lock-free counters for the actor system.
///
/// Shared between the directory, the registry and the health endpoint.
#[derive(Debug, Default)]
pub struct ActorMetrics {
    /// Rooms currently holding at least one member.
    pub active_rooms: AtomicUsize,
    /// WebSocket connections currently registered.
    pub active_connections: AtomicUsize,
    /// Total actor panics (indicates bugs).
    pub actor_panics: AtomicU64,
    /// Total messages processed across all actors.
    pub total_messages_processed: AtomicU64,
}

/// Point-in-time view of [`ActorMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActorMetricsSnapshot {
    pub rooms: usize,
    pub connections: usize,
    pub panics: u64,
}

impl ActorMetrics {
    /// Create a new shared metrics instance.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Increment active room count.
    pub fn room_created(&self) {
        let rooms = self.active_rooms.fetch_add(1, Ordering::Relaxed) + 1;
        crate::observability::metrics::set_rooms_active(rooms);
    }

    /// Decrement active room count.
    pub fn room_removed(&self) {
        let rooms = self
            .active_rooms
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            })
            .unwrap_or(0)
            .saturating_sub(1);
        crate::observability::metrics::set_rooms_active(rooms);
    }

    /// Increment active connection count.
    pub fn connection_created(&self) {
        let connections = self.active_connections.fetch_add(1, Ordering::Relaxed) + 1;
        crate::observability::metrics::set_connections_active(connections);
    }

    /// Decrement active connection count.
    pub fn connection_closed(&self) {
        let connections = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            })
            .unwrap_or(0)
            .saturating_sub(1);
        crate::observability::metrics::set_connections_active(connections);
    }

    /// Record an actor panic.
    pub fn record_panic(&self, actor_type: ActorType) {
        let total = self.actor_panics.fetch_add(1, Ordering::Relaxed) + 1;
        crate::observability::metrics::record_actor_panic(actor_type.as_str());
        tracing::error!(
            target: "signaling.actor.panic",
            actor_type = actor_type.as_str(),
            total_panics = total,
            "Actor panic detected - indicates bug, investigation required"
        );
    }

    /// Record a message being processed.
    pub fn record_message_processed(&self) {
        self.total_messages_processed
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Get current room count.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.active_rooms.load(Ordering::Relaxed)
    }

    /// Get current connection count.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Take a snapshot of the gauges.
    #[must_use]
    pub fn snapshot(&self) -> ActorMetricsSnapshot {
        ActorMetricsSnapshot {
            rooms: self.active_rooms.load(Ordering::Relaxed),
            connections: self.active_connections.load(Ordering::Relaxed),
            panics: self.actor_panics.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_type_as_str() {
        assert_eq!(ActorType::Room.as_str(), "room");
        assert_eq!(ActorType::Connection.as_str(), "connection");
    }

    #[test]
    fn test_actor_type_thresholds() {
        assert_eq!(ActorType::Room.normal_threshold(), 64);
        assert_eq!(ActorType::Room.warning_threshold(), 256);
        assert_eq!(ActorType::Connection.normal_threshold(), 32);
        assert_eq!(ActorType::Connection.warning_threshold(), 128);
    }

    #[test]
    fn test_mailbox_monitor_enqueue_dequeue() {
        let monitor = MailboxMonitor::new(ActorType::Room, "standup");

        assert_eq!(monitor.current_depth(), 0);

        monitor.record_enqueue();
        monitor.record_enqueue();
        monitor.record_enqueue();
        assert_eq!(monitor.current_depth(), 3);
        assert_eq!(monitor.peak_depth(), 3);

        monitor.record_dequeue();
        assert_eq!(monitor.current_depth(), 2);
        assert_eq!(monitor.peak_depth(), 3);
        assert_eq!(monitor.messages_processed(), 1);
    }

    #[test]
    fn test_mailbox_monitor_dequeue_never_underflows() {
        let monitor = MailboxMonitor::new(ActorType::Connection, "conn");
        monitor.record_dequeue();
        assert_eq!(monitor.current_depth(), 0);
    }

    #[test]
    fn test_mailbox_monitor_levels() {
        let monitor = MailboxMonitor::new(ActorType::Room, "standup");
        assert_eq!(monitor.current_level(), MailboxLevel::Normal);

        for _ in 0..100 {
            monitor.record_enqueue();
        }
        assert_eq!(monitor.current_level(), MailboxLevel::Warning);

        for _ in 0..200 {
            monitor.record_enqueue();
        }
        assert_eq!(monitor.current_level(), MailboxLevel::Critical);
    }

    #[test]
    fn test_mailbox_monitor_drop() {
        let monitor = MailboxMonitor::new(ActorType::Connection, "conn");
        monitor.record_drop();
        monitor.record_drop();
        assert_eq!(monitor.messages_dropped(), 2);
    }

    #[test]
    fn test_actor_metrics_counts() {
        let metrics = ActorMetrics::new();

        metrics.room_created();
        metrics.room_created();
        metrics.connection_created();
        metrics.connection_created();
        metrics.connection_created();
        metrics.room_removed();
        metrics.connection_closed();

        assert_eq!(metrics.room_count(), 1);
        assert_eq!(metrics.connection_count(), 2);
        assert_eq!(
            metrics.snapshot(),
            ActorMetricsSnapshot {
                rooms: 1,
                connections: 2,
                panics: 0
            }
        );
    }

    #[test]
    fn test_actor_metrics_decrement_saturates() {
        let metrics = ActorMetrics::new();
        metrics.room_removed();
        metrics.connection_closed();
        assert_eq!(metrics.room_count(), 0);
        assert_eq!(metrics.connection_count(), 0);
    }

    #[test]
    fn test_actor_metrics_panics() {
        let metrics = ActorMetrics::new();
        metrics.record_panic(ActorType::Room);
        metrics.record_panic(ActorType::Connection);
        assert_eq!(metrics.snapshot().panics, 2);
    }
}
