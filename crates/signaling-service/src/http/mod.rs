//! Client-facing HTTP surface: the signaling WebSocket and the rooms listing.

pub mod routes;

pub use routes::{build_routes, AppState, RoomList};
