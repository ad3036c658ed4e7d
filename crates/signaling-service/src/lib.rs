//! Mesh Signaling Service Library
//!
//! Coordinates small groups of browser peers that set up direct WebRTC
//! connections with one another:
//!
//! - Room membership with a hard per-room capacity (default 4)
//! - Point-to-point relay of opaque WebRTC offers and answers
//! - Room broadcast of presence, names, chat, reactions and pointer positions
//! - Removal notices to remaining members when a peer leaves or drops
//!
//! The service never inspects media or signaling payloads.
//!
//! # Architecture
//!
//! ```text
//! SessionController (per request, cloned into every connection task)
//! ├── ConnectionRegistry   connection id -> outbound queue, current room
//! ├── RoomDirectory        room name -> RoomActor (serialized membership)
//! ├── SignalRelay          offer/answer delivery within a room
//! └── BroadcastService     fan-out to room members except the origin
//! ```
//!
//! # Modules
//!
//! - [`actors`] - room and connection actors, registry, directory
//! - [`app`] - service assembly
//! - [`config`] - service configuration from environment
//! - [`errors`] - error types with client-facing codes
//! - [`http`] - WebSocket upgrade and rooms listing
//! - [`lifecycle`] - session lifecycle controller
//! - [`observability`] - metrics and health endpoints
//! - [`protocol`] - wire events
//! - [`routing`] - signal relay and room broadcast

pub mod actors;
pub mod app;
pub mod config;
pub mod errors;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod protocol;
pub mod routing;

pub use app::SignalingApp;
