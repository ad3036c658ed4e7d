//! Event routing between connections: point-to-point relay and room fan-out.

pub mod broadcast;
pub mod relay;

pub use broadcast::{BroadcastReport, BroadcastService};
pub use relay::SignalRelay;
