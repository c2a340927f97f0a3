//! Frame types for the Callwire protocol.
//!
//! Frames are the fundamental unit of communication between endpoints and the
//! relay. Every frame is an internally tagged object whose `type` field names
//! the event, so the same definitions serve both the JSON text encoding and the
//! MessagePack binary encoding.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Current protocol version, announced in the `connected` greeting.
pub const PROTOCOL_VERSION: u8 = 1;

/// Error codes carried by [`Frame::Error`].
pub mod error_codes {
    /// The relay already holds a registration for the allocated identifier.
    pub const DUPLICATE_ENDPOINT: u16 = 1001;
    /// The relay has reached its endpoint limit.
    pub const CAPACITY_REACHED: u16 = 1002;
}

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    Connected = 0x01,
    PresenceUpdate = 0x02,
    CallRequest = 0x03,
    CallAccept = 0x04,
    CallReject = 0x05,
    NegotiationOffer = 0x06,
    NegotiationAnswer = 0x07,
    NetworkCandidate = 0x08,
    PeerUnavailable = 0x09,
    Ping = 0x0A,
    Pong = 0x0B,
    Error = 0x0C,
}

impl FrameType {
    /// Wire name of the frame type, as it appears in the `type` tag.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameType::Connected => "connected",
            FrameType::PresenceUpdate => "presence-update",
            FrameType::CallRequest => "call-request",
            FrameType::CallAccept => "call-accept",
            FrameType::CallReject => "call-reject",
            FrameType::NegotiationOffer => "negotiation-offer",
            FrameType::NegotiationAnswer => "negotiation-answer",
            FrameType::NetworkCandidate => "network-candidate",
            FrameType::PeerUnavailable => "peer-unavailable",
            FrameType::Ping => "ping",
            FrameType::Pong => "pong",
            FrameType::Error => "error",
        }
    }

    /// Whether only the relay is expected to originate this frame type.
    #[must_use]
    pub fn is_server_only(&self) -> bool {
        matches!(
            self,
            FrameType::Connected
                | FrameType::PresenceUpdate
                | FrameType::PeerUnavailable
                | FrameType::Error
        )
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kinds of signaling event the relay forwards between endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalKind {
    /// Ask the destination to start a call.
    CallRequest,
    /// Accept a call request.
    CallAccept,
    /// Decline a call request.
    CallReject,
    /// Session description offer.
    NegotiationOffer,
    /// Session description answer.
    NegotiationAnswer,
    /// Network path candidate.
    NetworkCandidate,
}

impl SignalKind {
    /// Every signal kind, in protocol order.
    pub const ALL: [SignalKind; 6] = [
        SignalKind::CallRequest,
        SignalKind::CallAccept,
        SignalKind::CallReject,
        SignalKind::NegotiationOffer,
        SignalKind::NegotiationAnswer,
        SignalKind::NetworkCandidate,
    ];

    /// Wire name of the kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        self.frame_type().as_str()
    }

    /// The frame type used to carry this kind.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            SignalKind::CallRequest => FrameType::CallRequest,
            SignalKind::CallAccept => FrameType::CallAccept,
            SignalKind::CallReject => FrameType::CallReject,
            SignalKind::NegotiationOffer => FrameType::NegotiationOffer,
            SignalKind::NegotiationAnswer => FrameType::NegotiationAnswer,
            SignalKind::NetworkCandidate => FrameType::NetworkCandidate,
        }
    }

    /// Whether frames of this kind carry an opaque payload.
    #[must_use]
    pub fn carries_payload(&self) -> bool {
        matches!(
            self,
            SignalKind::NegotiationOffer
                | SignalKind::NegotiationAnswer
                | SignalKind::NetworkCandidate
        )
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A signaling event detached from its frame.
///
/// `peer` is the destination on inbound signals and the sender on outbound
/// deliveries. The relay never reads a sender from the client.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    /// Event kind.
    pub kind: SignalKind,
    /// Peer identifier, if the frame named one.
    pub peer: Option<String>,
    /// Opaque payload for negotiation and candidate events. Must be
    /// JSON-representable in either encoding.
    pub payload: Option<Value>,
}

impl Signal {
    /// The addressed peer, treating an empty string as absent.
    #[must_use]
    pub fn destination(&self) -> Option<&str> {
        self.peer.as_deref().filter(|p| !p.is_empty())
    }
}

/// A protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Frame {
    /// Greeting sent once the relay has accepted a connection.
    Connected {
        /// Identifier assigned to this connection.
        connection_id: String,
        /// Protocol version.
        version: u8,
        /// Heartbeat interval in milliseconds.
        heartbeat: u32,
    },

    /// Full roster of connected endpoints, in join order.
    PresenceUpdate {
        /// Connected endpoint identifiers.
        peers: Vec<String>,
    },

    /// Call request.
    CallRequest {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        peer: Option<String>,
    },

    /// Call accepted.
    CallAccept {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        peer: Option<String>,
    },

    /// Call rejected.
    CallReject {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        peer: Option<String>,
    },

    /// Negotiation offer.
    NegotiationOffer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        peer: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },

    /// Negotiation answer.
    NegotiationAnswer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        peer: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },

    /// Network candidate.
    NetworkCandidate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        peer: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },

    /// A signal could not be delivered because the destination is gone.
    PeerUnavailable {
        /// The destination that was addressed.
        peer: String,
        /// Kind of the dropped signal.
        kind: SignalKind,
    },

    /// Keepalive ping.
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    Pong {
        /// Echoed timestamp from the ping.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Connection-level error, sent right before the relay closes the socket.
    Error {
        /// Error code, see [`error_codes`].
        code: u16,
        /// Human-readable message.
        message: String,
    },
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Connected { .. } => FrameType::Connected,
            Frame::PresenceUpdate { .. } => FrameType::PresenceUpdate,
            Frame::CallRequest { .. } => FrameType::CallRequest,
            Frame::CallAccept { .. } => FrameType::CallAccept,
            Frame::CallReject { .. } => FrameType::CallReject,
            Frame::NegotiationOffer { .. } => FrameType::NegotiationOffer,
            Frame::NegotiationAnswer { .. } => FrameType::NegotiationAnswer,
            Frame::NetworkCandidate { .. } => FrameType::NetworkCandidate,
            Frame::PeerUnavailable { .. } => FrameType::PeerUnavailable,
            Frame::Ping { .. } => FrameType::Ping,
            Frame::Pong { .. } => FrameType::Pong,
            Frame::Error { .. } => FrameType::Error,
        }
    }

    /// The signal kind carried by this frame, if it is a signaling frame.
    #[must_use]
    pub fn signal_kind(&self) -> Option<SignalKind> {
        match self {
            Frame::CallRequest { .. } => Some(SignalKind::CallRequest),
            Frame::CallAccept { .. } => Some(SignalKind::CallAccept),
            Frame::CallReject { .. } => Some(SignalKind::CallReject),
            Frame::NegotiationOffer { .. } => Some(SignalKind::NegotiationOffer),
            Frame::NegotiationAnswer { .. } => Some(SignalKind::NegotiationAnswer),
            Frame::NetworkCandidate { .. } => Some(SignalKind::NetworkCandidate),
            _ => None,
        }
    }

    /// Split a signaling frame into a [`Signal`].
    ///
    /// Non-signaling frames are handed back unchanged.
    pub fn into_signal(self) -> Result<Signal, Frame> {
        let (kind, peer, payload) = match self {
            Frame::CallRequest { peer } => (SignalKind::CallRequest, peer, None),
            Frame::CallAccept { peer } => (SignalKind::CallAccept, peer, None),
            Frame::CallReject { peer } => (SignalKind::CallReject, peer, None),
            Frame::NegotiationOffer { peer, payload } => {
                (SignalKind::NegotiationOffer, peer, payload)
            }
            Frame::NegotiationAnswer { peer, payload } => {
                (SignalKind::NegotiationAnswer, peer, payload)
            }
            Frame::NetworkCandidate { peer, payload } => {
                (SignalKind::NetworkCandidate, peer, payload)
            }
            other => return Err(other),
        };
        Ok(Signal {
            kind,
            peer,
            payload,
        })
    }

    /// Build a signaling frame of `kind` naming `peer`.
    ///
    /// The payload is discarded for kinds that do not carry one.
    #[must_use]
    pub fn signal(kind: SignalKind, peer: impl Into<String>, payload: Option<Value>) -> Self {
        let peer = Some(peer.into());
        match kind {
            SignalKind::CallRequest => Frame::CallRequest { peer },
            SignalKind::CallAccept => Frame::CallAccept { peer },
            SignalKind::CallReject => Frame::CallReject { peer },
            SignalKind::NegotiationOffer => Frame::NegotiationOffer { peer, payload },
            SignalKind::NegotiationAnswer => Frame::NegotiationAnswer { peer, payload },
            SignalKind::NetworkCandidate => Frame::NetworkCandidate { peer, payload },
        }
    }

    /// Create a new Connected frame.
    #[must_use]
    pub fn connected(connection_id: impl Into<String>, heartbeat: u32) -> Self {
        Frame::Connected {
            connection_id: connection_id.into(),
            version: PROTOCOL_VERSION,
            heartbeat,
        }
    }

    /// Create a new PresenceUpdate frame.
    #[must_use]
    pub fn presence_update(peers: Vec<String>) -> Self {
        Frame::PresenceUpdate { peers }
    }

    /// Create a new PeerUnavailable frame.
    #[must_use]
    pub fn peer_unavailable(peer: impl Into<String>, kind: SignalKind) -> Self {
        Frame::PeerUnavailable {
            peer: peer.into(),
            kind,
        }
    }

    /// Create a new Ping frame.
    #[must_use]
    pub fn ping() -> Self {
        Frame::Ping { timestamp: None }
    }

    /// Create a new Pong frame.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        Frame::Pong { timestamp }
    }

    /// Create a new Error frame.
    #[must_use]
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Frame::Error {
            code,
            message: message.into(),
        }
    }
}
