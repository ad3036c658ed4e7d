//! Observability for the signaling service.
//!
//! # Privacy by Default
//!
//! Spans use `#[instrument(skip_all)]` with explicit fields. Handshake
//! payloads, chat text and display names are never logged; only their sizes.
//! Metric labels are bounded; room names and connection ids are not labels.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `signaling_connections_active` | Gauge | none | Registered WebSocket connections |
//! | `signaling_rooms_active` | Gauge | none | Non-empty rooms |
//! | `signaling_joins_total` | Counter | `outcome` | Join results |
//! | `signaling_signals_relayed_total` | Counter | `kind`, `outcome` | Offer/answer relays |
//! | `signaling_broadcasts_total` | Counter | `kind` | Room fan-outs |
//! | `signaling_messages_dropped_total` | Counter | `reason` | Undeliverable events |
//! | `signaling_requests_rejected_total` | Counter | `reason` | Rejected client requests |
//! | `signaling_request_latency_seconds` | Histogram | `event` | Request handling time |
//! | `signaling_actor_panics_total` | Counter | `actor_type` | Actor task panics |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
