//! Point-to-point relay of handshake payloads between two room members.
//!
//! The relay never inspects the payload. A target that is gone, or that is
//! not in the sender's room, gets nothing and the sender is not told: peers
//! routinely race a disconnect while negotiating.

use crate::actors::registry::ConnectionRegistry;
use crate::errors::SignalingError;
use crate::observability::metrics;
use crate::protocol::{ServerEvent, SignalEnvelope, SignalKind};

use tracing::{debug, instrument};

/// Routes offer/answer payloads to a single connection.
#[derive(Debug, Clone)]
pub struct SignalRelay {
    registry: ConnectionRegistry,
}

impl SignalRelay {
    #[must_use]
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    /// Deliver `envelope` to its target.
    ///
    /// Offers arrive as `user joined`, answers as `receiving returned signal`,
    /// both tagged with the sender's id.
    ///
    /// # Errors
    ///
    /// `UnknownTarget` when the target is not live, is the sender itself, or
    /// does not share the sender's room; `OutboundQueueFull` when the target
    /// is not draining. In every error case nothing was delivered.
    #[instrument(skip_all, name = "signaling.relay", fields(from = %envelope.from, to = %envelope.to, kind = envelope.kind.as_str()))]
    pub async fn relay(&self, envelope: SignalEnvelope) -> Result<(), SignalingError> {
        let SignalEnvelope {
            from,
            to,
            kind,
            payload,
        } = envelope;

        let same_room = from != to
            && match (
                self.registry.room_of(from).await,
                self.registry.room_of(to).await,
            ) {
                (Some(sender_room), Some(target_room)) => sender_room == target_room,
                _ => false,
            };

        if !same_room {
            debug!(
                target: "signaling.relay",
                from = %from,
                to = %to,
                "Signal target not in sender's room, dropped"
            );
            metrics::record_signal_relayed(kind.as_str(), "dropped");
            return Err(SignalingError::UnknownTarget);
        }

        let payload_bytes = payload.len();
        let event = match kind {
            SignalKind::Offer => ServerEvent::UserJoined {
                signal: payload,
                from_id: from,
            },
            SignalKind::Answer => ServerEvent::ReceivingReturnedSignal {
                signal: payload,
                from_id: from,
            },
        };

        match self.registry.deliver(to, event).await {
            Ok(()) => {
                debug!(
                    target: "signaling.relay",
                    from = %from,
                    to = %to,
                    payload_bytes = payload_bytes,
                    "Signal relayed"
                );
                metrics::record_signal_relayed(kind.as_str(), "delivered");
                Ok(())
            }
            Err(e) => {
                metrics::record_signal_relayed(kind.as_str(), "dropped");
                Err(e)
            }
        }
    }
}
