//! Message router for Callwire.
//!
//! The router forwards signaling events to the single endpoint they address.
//! It never inspects payloads and never trusts a client-supplied sender: the
//! delivered `peer` field is always the identifier of the channel the event
//! arrived on.

use crate::channel::SendError;
use crate::id::EndpointId;
use crate::registry::Registry;
use callwire_protocol::{Frame, Signal};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Why a signal was not delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The frame named no destination.
    MissingDestination,
    /// No endpoint is registered under the destination identifier.
    UnknownDestination,
    /// The destination is registered but its connection is shutting down.
    ChannelClosed,
    /// The destination's outbound queue is full.
    QueueFull,
}

impl DropReason {
    /// Short label for logs and metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::MissingDestination => "missing_destination",
            DropReason::UnknownDestination => "unknown_destination",
            DropReason::ChannelClosed => "channel_closed",
            DropReason::QueueFull => "queue_full",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of forwarding one signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued on the destination's channel.
    Delivered,
    /// Silently dropped.
    Dropped(DropReason),
}

impl Delivery {
    /// Whether the signal reached its destination's queue.
    #[must_use]
    pub fn is_delivered(&self) -> bool {
        matches!(self, Delivery::Delivered)
    }
}

/// Identifier-addressed signal router.
#[derive(Debug, Clone)]
pub struct Router {
    registry: Arc<Registry>,
}

impl Router {
    /// Create a router resolving destinations through `registry`.
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Forward a signal from `sender` to the endpoint it addresses.
    ///
    /// The destination receives a frame of the same kind whose `peer` is
    /// `sender` and whose payload is passed through unchanged. Missing or
    /// unknown destinations are dropped without any error.
    pub fn forward(&self, sender: &EndpointId, signal: Signal) -> Delivery {
        let kind = signal.kind;
        let Some(destination) = signal.destination().map(str::to_owned) else {
            debug!(sender = %sender, kind = %kind, "Dropping signal without destination");
            return Delivery::Dropped(DropReason::MissingDestination);
        };

        let Some(channel) = self.registry.lookup(&destination) else {
            debug!(
                sender = %sender,
                destination = %destination,
                kind = %kind,
                "Dropping signal for unknown destination"
            );
            return Delivery::Dropped(DropReason::UnknownDestination);
        };

        let frame = Frame::signal(kind, sender.as_str(), signal.payload);
        if let Err(e) = channel.send(frame) {
            let reason = match e {
                SendError::Full => DropReason::QueueFull,
                SendError::Closed => DropReason::ChannelClosed,
            };
            debug!(
                sender = %sender,
                destination = %destination,
                kind = %kind,
                reason = %reason,
                "Dropping undeliverable signal"
            );
            return Delivery::Dropped(reason);
        }

        trace!(sender = %sender, destination = %destination, kind = %kind, "Forwarded signal");
        Delivery::Delivered
    }
}
