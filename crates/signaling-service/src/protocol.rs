//! Wire protocol between browser clients and the signaling service.
//!
//! Every WebSocket text frame is one JSON object `{"event": <name>, "data": <payload>}`.
//! Event names are the ones the browser client already emits (`"join room"`,
//! `"sending signal"`, ...). Field names are camelCase; the older spellings
//! (`roomID`, `userToSignal`, `callerID`, `message`) are accepted as aliases.
//!
//! Handshake payloads are kept as [`RawValue`] end to end so the service never
//! parses, normalizes or re-serializes them.

use crate::errors::SignalingError;

use common::types::{ConnectionId, RoomId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// Client → server event names.
pub mod client_events {
    pub const JOIN_ROOM: &str = "join room";
    pub const SENDING_SIGNAL: &str = "sending signal";
    pub const RETURNING_SIGNAL: &str = "returning signal";
    pub const ANNOUNCE_NAME: &str = "tell everyone that i arrived";
    pub const SEND_MESSAGE: &str = "send message";
    pub const SEND_REACTION: &str = "send reaction";
    pub const POINTER_MOVE: &str = "pointer move";
    pub const LEAVE_ROOM: &str = "leave room";
}

/// Opaque handshake payload (SDP offer/answer, ICE candidate, ...).
///
/// Serialized exactly as received.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalPayload(Box<RawValue>);

impl SignalPayload {
    /// Wrap a JSON text fragment. Fails if `json` is not valid JSON.
    pub fn from_json(json: impl Into<String>) -> Result<Self, serde_json::Error> {
        RawValue::from_string(json.into()).map(Self)
    }

    /// The payload text as received.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.get()
    }

    /// Payload size in bytes (for logging, never the content).
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.get().len()
    }

    /// Whether the payload text is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.get().is_empty()
    }
}

/// Direction of a relayed handshake payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// Initiator → existing member (offer-type).
    Offer,
    /// Responder → initiator (answer-type).
    Answer,
}

impl SignalKind {
    /// Label for metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
        }
    }
}

/// An addressed handshake payload.
#[derive(Debug, Clone)]
pub struct SignalEnvelope {
    /// Sending connection.
    pub from: ConnectionId,
    /// Destination connection.
    pub to: ConnectionId,
    /// Offer or answer direction.
    pub kind: SignalKind,
    /// Opaque payload, delivered unmodified.
    pub payload: SignalPayload,
}

/// A decoded client request.
#[derive(Debug, Clone)]
pub enum ClientRequest {
    /// Join (or create) a room.
    JoinRoom { room_id: RoomId },
    /// Offer-type payload to an existing member.
    SendingSignal {
        target_id: ConnectionId,
        signal: SignalPayload,
    },
    /// Answer-type payload back to the initiator.
    ReturningSignal {
        target_id: ConnectionId,
        signal: SignalPayload,
    },
    /// Announce a display name to the room.
    AnnounceName { room_id: RoomId, name: String },
    /// Chat text to the room.
    SendMessage {
        room_id: RoomId,
        text: String,
        /// Optional sender label chosen by the client.
        from: Option<String>,
    },
    /// Reaction (emoji, hand raise, ...) to the room.
    SendReaction { room_id: RoomId, reaction: String },
    /// Normalized pointer position to the room.
    PointerMove { room_id: RoomId, x: f64, y: f64 },
    /// Leave the current room.
    LeaveRoom,
}

/// Outer frame shared by every client event.
#[derive(Debug, Deserialize)]
struct ClientFrame {
    event: String,
    #[serde(default)]
    data: Option<Box<RawValue>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JoinRoomData {
    Bare(RoomId),
    Object {
        #[serde(rename = "roomId", alias = "roomID")]
        room_id: RoomId,
    },
}

#[derive(Debug, Deserialize)]
struct OfferData {
    #[serde(rename = "targetId", alias = "userToSignal")]
    target_id: ConnectionId,
    signal: SignalPayload,
}

#[derive(Debug, Deserialize)]
struct AnswerData {
    #[serde(rename = "targetId", alias = "callerID")]
    target_id: ConnectionId,
    signal: SignalPayload,
}

#[derive(Debug, Deserialize)]
struct NameData {
    #[serde(rename = "roomId", alias = "roomID")]
    room_id: RoomId,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct ChatData {
    #[serde(rename = "roomId", alias = "roomID")]
    room_id: RoomId,
    #[serde(alias = "message")]
    text: String,
    #[serde(default)]
    from: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReactionData {
    #[serde(rename = "roomId", alias = "roomID")]
    room_id: RoomId,
    #[serde(rename = "type")]
    reaction: String,
}

#[derive(Debug, Deserialize)]
struct PointerData {
    #[serde(rename = "roomId", alias = "roomID")]
    room_id: RoomId,
    x: f64,
    y: f64,
}

impl ClientRequest {
    /// Decode one text frame.
    ///
    /// Any structural problem (bad JSON, unknown event, missing fields) is a
    /// `MalformedRequest` that rejects this frame only.
    pub fn decode(text: &str) -> Result<Self, SignalingError> {
        let frame: ClientFrame = serde_json::from_str(text)
            .map_err(|e| SignalingError::MalformedRequest(format!("invalid frame: {e}")))?;

        let event = frame.event.as_str();
        let data = frame.data.as_deref();

        let request = match event {
            client_events::JOIN_ROOM => {
                let room_id = match payload::<JoinRoomData>(event, data)? {
                    JoinRoomData::Bare(room_id) | JoinRoomData::Object { room_id } => room_id,
                };
                ClientRequest::JoinRoom { room_id }
            }
            client_events::SENDING_SIGNAL => {
                let OfferData { target_id, signal } = payload(event, data)?;
                ClientRequest::SendingSignal { target_id, signal }
            }
            client_events::RETURNING_SIGNAL => {
                let AnswerData { target_id, signal } = payload(event, data)?;
                ClientRequest::ReturningSignal { target_id, signal }
            }
            client_events::ANNOUNCE_NAME => {
                let NameData { room_id, name } = payload(event, data)?;
                ClientRequest::AnnounceName { room_id, name }
            }
            client_events::SEND_MESSAGE => {
                let ChatData {
                    room_id,
                    text,
                    from,
                } = payload(event, data)?;
                ClientRequest::SendMessage {
                    room_id,
                    text,
                    from,
                }
            }
            client_events::SEND_REACTION => {
                let ReactionData { room_id, reaction } = payload(event, data)?;
                ClientRequest::SendReaction { room_id, reaction }
            }
            client_events::POINTER_MOVE => {
                let PointerData { room_id, x, y } = payload(event, data)?;
                ClientRequest::PointerMove { room_id, x, y }
            }
            client_events::LEAVE_ROOM => ClientRequest::LeaveRoom,
            _ => {
                return Err(SignalingError::MalformedRequest(
                    "unknown event".to_string(),
                ))
            }
        };

        Ok(request)
    }

    /// Event name for logs and metric labels.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            ClientRequest::JoinRoom { .. } => client_events::JOIN_ROOM,
            ClientRequest::SendingSignal { .. } => client_events::SENDING_SIGNAL,
            ClientRequest::ReturningSignal { .. } => client_events::RETURNING_SIGNAL,
            ClientRequest::AnnounceName { .. } => client_events::ANNOUNCE_NAME,
            ClientRequest::SendMessage { .. } => client_events::SEND_MESSAGE,
            ClientRequest::SendReaction { .. } => client_events::SEND_REACTION,
            ClientRequest::PointerMove { .. } => client_events::POINTER_MOVE,
            ClientRequest::LeaveRoom => client_events::LEAVE_ROOM,
        }
    }
}

fn payload<T: DeserializeOwned>(event: &str, data: Option<&RawValue>) -> Result<T, SignalingError> {
    let data = data.ok_or_else(|| {
        SignalingError::MalformedRequest(format!("'{event}' requires a data payload"))
    })?;
    serde_json::from_str(data.get())
        .map_err(|e| SignalingError::MalformedRequest(format!("invalid '{event}' payload: {e}")))
}

/// Events pushed from the service to a client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// First event on every connection: the id the server assigned.
    #[serde(rename = "connected")]
    Connected { id: ConnectionId },

    /// Join accepted: the other members, in join order.
    #[serde(rename = "all users")]
    AllUsers(Vec<ConnectionId>),

    /// Join rejected; the connection is not a member.
    #[serde(rename = "room full")]
    RoomFull {
        #[serde(rename = "roomId")]
        room_id: RoomId,
    },

    /// Offer-type payload from a new member.
    #[serde(rename = "user joined")]
    UserJoined {
        signal: SignalPayload,
        #[serde(rename = "fromId")]
        from_id: ConnectionId,
    },

    /// Answer-type payload from an existing member.
    #[serde(rename = "receiving returned signal")]
    ReceivingReturnedSignal {
        signal: SignalPayload,
        #[serde(rename = "fromId")]
        from_id: ConnectionId,
    },

    /// A member announced its display name.
    #[serde(rename = "user broadcasting his name")]
    UserName {
        name: String,
        #[serde(rename = "fromId")]
        from_id: ConnectionId,
    },

    /// Chat text from another member.
    #[serde(rename = "receive message")]
    ReceiveMessage {
        from: ConnectionId,
        name: String,
        text: String,
    },

    /// Reaction from another member.
    #[serde(rename = "reaction")]
    Reaction {
        from: ConnectionId,
        #[serde(rename = "type")]
        reaction: String,
    },

    /// Pointer position from another member.
    #[serde(rename = "pointer")]
    Pointer {
        #[serde(rename = "fromId")]
        from_id: ConnectionId,
        x: f64,
        y: f64,
    },

    /// A member left; tear down the direct link to it.
    #[serde(rename = "remove user")]
    RemoveUser {
        #[serde(rename = "removedId")]
        removed_id: ConnectionId,
    },

    /// A request from this client was rejected.
    #[serde(rename = "error")]
    Error { code: i32, message: String },
}

impl ServerEvent {
    /// Build the `error` event for a rejected request.
    #[must_use]
    pub fn from_error(error: &SignalingError) -> Self {
        ServerEvent::Error {
            code: error.error_code(),
            message: error.client_message(),
        }
    }

    /// Encode as a text frame.
    pub fn to_json(&self) -> Result<String, SignalingError> {
        serde_json::to_string(self)
            .map_err(|e| SignalingError::Internal(format!("event encoding failed: {e}")))
    }

    /// Bounded label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            ServerEvent::Connected { .. } => "connected",
            ServerEvent::AllUsers(_) => "all_users",
            ServerEvent::RoomFull { .. } => "room_full",
            ServerEvent::UserJoined { .. } => "user_joined",
            ServerEvent::ReceivingReturnedSignal { .. } => "returned_signal",
            ServerEvent::UserName { .. } => "user_name",
            ServerEvent::ReceiveMessage { .. } => "chat",
            ServerEvent::Reaction { .. } => "reaction",
            ServerEvent::Pointer { .. } => "pointer",
            ServerEvent::RemoveUser { .. } => "remove_user",
            ServerEvent::Error { .. } => "error",
        }
    }

    /// Whether a full outbound queue may drop this event.
    ///
    /// Pointer positions and reactions are superseded by the next one. Every
    /// other event changes what the client believes about its peers, so a
    /// client that cannot take it is disconnected instead.
    #[must_use]
    pub const fn is_droppable(&self) -> bool {
        matches!(self, ServerEvent::Pointer { .. } | ServerEvent::Reaction { .. })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn id() -> ConnectionId {
        ConnectionId::new()
    }

    #[test]
    fn test_only_presentation_events_are_droppable() {
        let from = id();
        assert!(ServerEvent::Pointer { from_id: from, x: 0.1, y: 0.2 }.is_droppable());
        assert!(ServerEvent::Reaction {
            from,
            reaction: "wave".to_string()
        }
        .is_droppable());

        assert!(!ServerEvent::AllUsers(vec![from]).is_droppable());
        assert!(!ServerEvent::RemoveUser { removed_id: from }.is_droppable());
        assert!(!ServerEvent::UserJoined {
            signal: SignalPayload::from_json("{}").unwrap(),
            from_id: from
        }
        .is_droppable());
    }

    #[test]
    fn test_decode_join_room_bare_string() {
        let request = ClientRequest::decode(r#"{"event":"join room","data":"r1"}"#).unwrap();
        assert!(matches!(request, ClientRequest::JoinRoom { room_id } if room_id.as_str() == "r1"));
    }

    #[test]
    fn test_decode_join_room_object() {
        let request =
            ClientRequest::decode(r#"{"event":"join room","data":{"roomId":"r2"}}"#).unwrap();
        assert!(matches!(request, ClientRequest::JoinRoom { room_id } if room_id.as_str() == "r2"));
    }

    #[test]
    fn test_decode_signal_preserves_payload_bytes() {
        let target = id();
        // Odd spacing and key order must survive untouched
        let signal = r#"{ "type":"offer",  "sdp":"v=0\r\no=- 1 2 IN IP4 0.0.0.0" }"#;
        let frame = format!(
            r#"{{"event":"sending signal","data":{{"targetId":"{target}","signal":{signal}}}}}"#
        );

        let request = ClientRequest::decode(&frame).unwrap();
        match request {
            ClientRequest::SendingSignal { target_id, signal: payload } => {
                assert_eq!(target_id, target);
                assert_eq!(payload.as_str(), signal);
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn test_decode_signal_accepts_legacy_field_names() {
        let target = id();
        let caller = id();
        let frame = json!({
            "event": "sending signal",
            "data": {"userToSignal": target, "callerID": caller, "signal": {"type": "offer"}}
        })
        .to_string();
        let request = ClientRequest::decode(&frame).unwrap();
        assert!(matches!(request, ClientRequest::SendingSignal { target_id, .. } if target_id == target));

        let frame = json!({
            "event": "returning signal",
            "data": {"callerID": caller, "signal": {"type": "answer"}}
        })
        .to_string();
        let request = ClientRequest::decode(&frame).unwrap();
        assert!(matches!(request, ClientRequest::ReturningSignal { target_id, .. } if target_id == caller));
    }

    #[test]
    fn test_decode_chat_with_legacy_fields() {
        let frame = json!({
            "event": "send message",
            "data": {"roomID": "r1", "message": "hi", "from": "Ada"}
        })
        .to_string();
        match ClientRequest::decode(&frame).unwrap() {
            ClientRequest::SendMessage {
                room_id,
                text,
                from,
            } => {
                assert_eq!(room_id.as_str(), "r1");
                assert_eq!(text, "hi");
                assert_eq!(from.as_deref(), Some("Ada"));
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn test_decode_reaction_and_pointer() {
        let frame = json!({"event": "send reaction", "data": {"roomId": "r1", "type": "clap"}})
            .to_string();
        assert!(matches!(
            ClientRequest::decode(&frame).unwrap(),
            ClientRequest::SendReaction { reaction, .. } if reaction == "clap"
        ));

        let frame = json!({"event": "pointer move", "data": {"roomId": "r1", "x": 0.25, "y": 1.0}})
            .to_string();
        match ClientRequest::decode(&frame).unwrap() {
            ClientRequest::PointerMove { x, y, .. } => {
                assert!((x - 0.25).abs() < f64::EPSILON);
                assert!((y - 1.0).abs() < f64::EPSILON);
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn test_decode_leave_room_needs_no_data() {
        let request = ClientRequest::decode(r#"{"event":"leave room"}"#).unwrap();
        assert!(matches!(request, ClientRequest::LeaveRoom));
        assert_eq!(request.event_name(), client_events::LEAVE_ROOM);
    }

    #[test]
    fn test_decode_rejects_malformed_frames() {
        let cases = [
            "not json",
            r#"{"data":"r1"}"#,
            r#"{"event":"fly away","data":{}}"#,
            r#"{"event":"join room"}"#,
            r#"{"event":"send message","data":{"roomId":"r1"}}"#,
            r#"{"event":"sending signal","data":{"targetId":"not-a-uuid","signal":{}}}"#,
            r#"{"event":"pointer move","data":{"roomId":"r1","x":"left","y":0}}"#,
        ];

        for case in cases {
            let result = ClientRequest::decode(case);
            assert!(
                matches!(result, Err(SignalingError::MalformedRequest(_))),
                "expected MalformedRequest for {case}"
            );
        }
    }

    #[test]
    fn test_encode_all_users_is_bare_array() {
        let a = id();
        let b = id();
        let json: Value =
            serde_json::from_str(&ServerEvent::AllUsers(vec![a, b]).to_json().unwrap()).unwrap();
        assert_eq!(json["event"], "all users");
        assert_eq!(json["data"], json!([a, b]));
    }

    #[test]
    fn test_encode_relayed_signal_is_verbatim() {
        let from = id();
        let signal = SignalPayload::from_json(r#"{"candidate":"a=1",  "sdpMid":"0"}"#).unwrap();
        let text = ServerEvent::UserJoined {
            signal,
            from_id: from,
        }
        .to_json()
        .unwrap();

        assert!(text.contains(r#"{"candidate":"a=1",  "sdpMid":"0"}"#));
        let json: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["event"], "user joined");
        assert_eq!(json["data"]["fromId"], json!(from));
    }

    #[test]
    fn test_encode_field_names() {
        let removed = id();
        let json: Value = serde_json::from_str(
            &ServerEvent::RemoveUser {
                removed_id: removed,
            }
            .to_json()
            .unwrap(),
        )
        .unwrap();
        assert_eq!(json, json!({"event": "remove user", "data": {"removedId": removed}}));

        let from = id();
        let json: Value = serde_json::from_str(
            &ServerEvent::Reaction {
                from,
                reaction: "wave".to_string(),
            }
            .to_json()
            .unwrap(),
        )
        .unwrap();
        assert_eq!(json["data"], json!({"from": from, "type": "wave"}));

        let json: Value = serde_json::from_str(
            &ServerEvent::RoomFull {
                room_id: RoomId::from("r1"),
            }
            .to_json()
            .unwrap(),
        )
        .unwrap();
        assert_eq!(json, json!({"event": "room full", "data": {"roomId": "r1"}}));
    }

    #[test]
    fn test_error_event_uses_client_message() {
        let event = ServerEvent::from_error(&SignalingError::Internal("secret detail".to_string()));
        let text = event.to_json().unwrap();
        assert!(!text.contains("secret detail"));
        assert!(text.contains("\"code\":6"));
    }

    #[test]
    fn test_signal_payload_rejects_invalid_json() {
        assert!(SignalPayload::from_json("{not json").is_err());
        let payload = SignalPayload::from_json("\"opaque\"").unwrap();
        assert_eq!(payload.len(), 8);
        assert!(!payload.is_empty());
    }
}
