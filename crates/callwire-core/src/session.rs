//! Per-connection lifecycle.
//!
//! A [`Session`] is created by [`Relay::connect`](crate::Relay::connect) and
//! moves through `Connecting → Connected → Disconnected`. The last transition
//! is terminal and happens on [`Session::disconnect`] or when the session is
//! dropped, whichever comes first.

use crate::channel::ChannelHandle;
use crate::id::EndpointId;
use crate::relay::{Relay, RelayError};
use crate::router::{Delivery, DropReason};
use callwire_protocol::{Frame, FrameType, SignalKind};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Identifier allocated, not yet registered.
    Connecting,
    /// Registered and routing.
    Connected,
    /// Deregistered. Terminal.
    Disconnected,
}

/// What [`Session::dispatch`] did with an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    /// Signal queued on the destination's channel.
    Forwarded(SignalKind),
    /// Signal dropped.
    Dropped(SignalKind, DropReason),
    /// A reply of the given type was queued on this session's own channel.
    Replied(FrameType),
    /// Frame ignored.
    Ignored(FrameType),
}

/// One endpoint's connection as seen by the relay.
#[derive(Debug)]
pub struct Session {
    id: EndpointId,
    relay: Arc<Relay>,
    channel: ChannelHandle,
    state: SessionState,
}

impl Session {
    pub(crate) fn new(id: EndpointId, relay: Arc<Relay>, channel: ChannelHandle) -> Self {
        Self {
            id,
            relay,
            channel,
            state: SessionState::Connecting,
        }
    }

    /// Greet the endpoint and register it.
    ///
    /// The greeting goes out before registration so the endpoint learns its
    /// own identifier before the first roster arrives.
    pub(crate) fn establish(&mut self) -> Result<(), RelayError> {
        debug_assert_eq!(self.state, SessionState::Connecting);

        let heartbeat = self.relay.config().heartbeat_interval_ms;
        self.reply(Frame::connected(self.id.as_str(), heartbeat));

        match self
            .relay
            .registry()
            .register(self.id.clone(), self.channel.clone())
        {
            Ok(_) => {
                self.state = SessionState::Connected;
                debug!(endpoint = %self.id, "Session connected");
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Disconnected;
                Err(e)
            }
        }
    }

    /// The endpoint identifier.
    #[must_use]
    pub fn id(&self) -> &EndpointId {
        &self.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Check if the session is still routing.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    /// Handle one inbound frame from this endpoint.
    ///
    /// Signaling frames are forwarded with this session's identifier as the
    /// sender. `ping` is answered with `pong` on the session's own channel.
    /// Server-only frames, `pong`, and anything after disconnect are ignored.
    pub fn dispatch(&self, frame: Frame) -> Dispatched {
        let frame_type = frame.frame_type();
        if !self.is_connected() {
            trace!(endpoint = %self.id, frame_type = %frame_type, "Frame after disconnect ignored");
            return Dispatched::Ignored(frame_type);
        }
        if frame_type.is_server_only() {
            warn!(endpoint = %self.id, frame_type = %frame_type, "Server-only frame from endpoint");
            return Dispatched::Ignored(frame_type);
        }

        match frame.into_signal() {
            Ok(signal) => {
                let kind = signal.kind;
                let destination = signal.peer.clone();
                match self.relay.router().forward(&self.id, signal) {
                    Delivery::Delivered => Dispatched::Forwarded(kind),
                    Delivery::Dropped(reason) => {
                        if self.relay.config().notify_unavailable {
                            self.reply(Frame::peer_unavailable(
                                destination.unwrap_or_default(),
                                kind,
                            ));
                        }
                        Dispatched::Dropped(kind, reason)
                    }
                }
            }
            Err(Frame::Ping { timestamp }) => {
                self.reply(Frame::pong(timestamp));
                Dispatched::Replied(FrameType::Pong)
            }
            Err(_) => Dispatched::Ignored(frame_type),
        }
    }

    /// Queue a relay-originated frame on this session's own channel.
    fn reply(&self, frame: Frame) {
        let frame_type = frame.frame_type();
        if let Err(e) = self.channel.send(frame) {
            debug!(endpoint = %self.id, frame_type = %frame_type, error = %e, "Reply dropped");
        }
    }

    /// Tear the session down and deregister the endpoint.
    ///
    /// Returns `true` on the first call for a connected session; later calls
    /// are no-ops.
    pub fn disconnect(&mut self) -> bool {
        let was_connected = self.is_connected();
        self.state = SessionState::Disconnected;

        if was_connected {
            debug!(endpoint = %self.id, "Session disconnected");
            self.relay.registry().deregister(self.id.as_str());
        }
        was_connected
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disconnect();
    }
}
