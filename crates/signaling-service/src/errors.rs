//! Signaling service error types.
//!
//! Error types map to `error` event codes sent back to the requesting client.
//! Internal details are logged server-side but not exposed to clients.

use common::types::RoomId;
use thiserror::Error;

/// Signaling service error type.
///
/// Maps to client-facing error codes:
/// - `MalformedRequest`: `BAD_REQUEST` (1)
/// - `NotInRoom`: `FORBIDDEN` (3)
/// - `UnknownTarget`: `NOT_FOUND` (4)
/// - `Internal`: `INTERNAL_ERROR` (6)
/// - `RoomFull`, `OutboundQueueFull`, `Draining`: `CAPACITY_EXCEEDED` (7)
#[derive(Debug, Error)]
pub enum SignalingError {
    /// Room already holds the maximum number of members. Membership unchanged.
    #[error("Room at capacity: {0}")]
    RoomFull(RoomId),

    /// Relay or delivery addressed to a connection that is no longer registered.
    ///
    /// Expected race with disconnect; never surfaced to clients.
    #[error("Unknown target connection")]
    UnknownTarget,

    /// Request payload is missing required fields or has invalid values.
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// Room-scoped request from a connection that is not a member of that room.
    #[error("Connection is not a member of the room")]
    NotInRoom,

    /// Target's outbound queue is full; the event was dropped.
    #[error("Outbound queue full")]
    OutboundQueueFull,

    /// Service is shutting down and not accepting new joins.
    #[error("Service is draining")]
    Draining,

    /// Internal error (actor channel failure, etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SignalingError {
    /// Returns the client-facing error code for this error.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        match self {
            SignalingError::MalformedRequest(_) => 1, // BAD_REQUEST
            SignalingError::NotInRoom => 3,           // FORBIDDEN
            SignalingError::UnknownTarget => 4,       // NOT_FOUND
            SignalingError::Internal(_) => 6,         // INTERNAL_ERROR
            SignalingError::RoomFull(_)
            | SignalingError::OutboundQueueFull
            | SignalingError::Draining => 7, // CAPACITY_EXCEEDED
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            SignalingError::RoomFull(_) => "Room is full".to_string(),
            SignalingError::UnknownTarget => "Target not found".to_string(),
            SignalingError::MalformedRequest(reason) => reason.clone(),
            SignalingError::NotInRoom => "Not a member of that room".to_string(),
            SignalingError::OutboundQueueFull => "Peer is not keeping up".to_string(),
            SignalingError::Draining => "Server is shutting down, please reconnect".to_string(),
            SignalingError::Internal(_) => "An internal error occurred".to_string(),
        }
    }

    /// Stable label for the `reason` metric dimension.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            SignalingError::RoomFull(_) => "room_full",
            SignalingError::UnknownTarget => "unknown_target",
            SignalingError::MalformedRequest(_) => "malformed_request",
            SignalingError::NotInRoom => "not_in_room",
            SignalingError::OutboundQueueFull => "outbound_queue_full",
            SignalingError::Draining => "draining",
            SignalingError::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(
            SignalingError::MalformedRequest("missing roomId".to_string()).error_code(),
            1
        );
        assert_eq!(SignalingError::NotInRoom.error_code(), 3);
        assert_eq!(SignalingError::UnknownTarget.error_code(), 4);
        assert_eq!(
            SignalingError::Internal("channel closed".to_string()).error_code(),
            6
        );
        assert_eq!(SignalingError::RoomFull(RoomId::from("r1")).error_code(), 7);
        assert_eq!(SignalingError::OutboundQueueFull.error_code(), 7);
        assert_eq!(SignalingError::Draining.error_code(), 7);
    }

    #[test]
    fn test_client_messages_hide_internal_details() {
        let err = SignalingError::Internal("room actor r1 mailbox closed".to_string());
        assert!(!err.client_message().contains("mailbox"));
        assert_eq!(err.client_message(), "An internal error occurred");

        // Room name is not echoed back in the generic message
        let err = SignalingError::RoomFull(RoomId::from("secret-room"));
        assert!(!err.client_message().contains("secret-room"));
    }

    #[test]
    fn test_malformed_request_message_is_passed_through() {
        let err = SignalingError::MalformedRequest("pointer x out of range".to_string());
        assert_eq!(err.client_message(), "pointer x out of range");
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!("{}", SignalingError::RoomFull(RoomId::from("r1"))),
            "Room at capacity: r1"
        );
        assert_eq!(
            format!("{}", SignalingError::MalformedRequest("bad json".to_string())),
            "Malformed request: bad json"
        );
    }

    #[test]
    fn test_labels_are_distinct() {
        let labels = [
            SignalingError::RoomFull(RoomId::from("r")).as_label(),
            SignalingError::UnknownTarget.as_label(),
            SignalingError::MalformedRequest(String::new()).as_label(),
            SignalingError::NotInRoom.as_label(),
            SignalingError::OutboundQueueFull.as_label(),
            SignalingError::Draining.as_label(),
            SignalingError::Internal(String::new()).as_label(),
        ];
        let unique: std::collections::HashSet<_> = labels.iter().collect();
        assert_eq!(unique.len(), labels.len());
    }
}
