//! Actor model for the signaling service.
//!
//! # Actor Hierarchy
//!
//! ```text
//! RoomDirectory (room name -> RoomActor table)
//! └── RoomActor (one per non-empty room, owns its member list)
//!
//! ConnectionRegistry (connection id -> outbound queue + current room)
//! └── ConnectionActor (one per WebSocket, drains the queue onto the socket)
//! ```
//!
//! # Key Design Decisions
//!
//! - Membership changes for a room are serialized by that room's mailbox
//! - Delivery to clients is a non-blocking enqueue; nothing awaits a socket
//!   while holding a lock or while a room actor waits
//! - `CancellationToken` children propagate shutdown from the root token
//!
//! # Cancellation
//!
//! Room actors and connection actors run under child tokens of the
//! service's root token. Cancelling the root closes every socket with
//! `1001 Going Away` and stops every room actor.

pub mod connection;
pub mod directory;
pub mod messages;
pub mod metrics;
pub mod registry;
pub mod room;

pub use connection::{serve_connection, ConnectionActor};
pub use directory::RoomDirectory;
pub use messages::{JoinOutcome, LeaveOutcome, RoomMessage, RoomSummary};
pub use metrics::{ActorMetrics, ActorType, MailboxLevel, MailboxMonitor};
pub use registry::{ConnectionRegistry, Departed, Registration};
pub use room::{RoomActor, RoomActorHandle};
