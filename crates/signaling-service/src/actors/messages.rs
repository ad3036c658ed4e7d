//! Message types for actor communication.
//!
//! Request-reply uses `tokio::sync::oneshot` carried inside the message.

use crate::errors::SignalingError;
use crate::protocol::ServerEvent;

use super::registry::BroadcastReport;

use chrono::{DateTime, Utc};
use common::types::{ConnectionId, RoomId};
use serde::Serialize;
use tokio::sync::oneshot;

/// Messages sent to a `RoomActor`.
#[derive(Debug)]
pub enum RoomMessage {
    /// Add a connection if the room has space, and queue `all users` for it.
    Join {
        connection_id: ConnectionId,
        respond_to: oneshot::Sender<Result<JoinOutcome, SignalingError>>,
    },

    /// Remove a connection, and queue `remove user` for the members left.
    Leave {
        connection_id: ConnectionId,
        respond_to: oneshot::Sender<LeaveOutcome>,
    },

    /// Current members in join order.
    Members {
        respond_to: oneshot::Sender<Vec<ConnectionId>>,
    },

    /// Queue `event` for every member except `excluding`.
    Broadcast {
        excluding: Option<ConnectionId>,
        event: ServerEvent,
        respond_to: oneshot::Sender<BroadcastReport>,
    },
}

/// Result of an accepted join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    /// Members other than the joiner, in join order.
    pub peers: Vec<ConnectionId>,
    /// False when the connection was already a member (membership unchanged).
    pub newly_joined: bool,
}

/// Result of a leave.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LeaveOutcome {
    /// Whether the connection was a member.
    pub removed: bool,
    /// Members that remain, in join order.
    pub remaining: Vec<ConnectionId>,
    /// Remaining members the removal notice was queued for.
    pub notified: usize,
}

/// Listing entry for one non-empty room. Counts only; never member ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub room_id: RoomId,
    pub member_count: usize,
    pub created_at: DateTime<Utc>,
}
