//! Room fan-out: deliver one event to every member of a room except the origin.
//!
//! The fan-out runs inside the room actor's turn, so a broadcast is ordered
//! with the joins and leaves of the same room. Delivery is best effort per
//! member. A member that is gone or not keeping up is skipped and counted;
//! the others still get the event.

use crate::actors::directory::RoomDirectory;
use crate::protocol::ServerEvent;

pub use crate::actors::registry::BroadcastReport;

use common::types::{ConnectionId, RoomId};

#[derive(Debug, Clone)]
pub struct BroadcastService {
    directory: RoomDirectory,
}

impl BroadcastService {
    #[must_use]
    pub fn new(directory: RoomDirectory) -> Self {
        Self { directory }
    }

    /// Send `event` to the current members of `room_id`, skipping `excluding`.
    pub async fn broadcast(
        &self,
        room_id: &RoomId,
        excluding: Option<ConnectionId>,
        event: ServerEvent,
    ) -> BroadcastReport {
        self.directory.broadcast(room_id, excluding, event).await
    }
}
