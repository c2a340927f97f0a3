//! # callwire-protocol
//!
//! Wire protocol definitions for the Callwire signaling relay.
//!
//! Endpoints and the relay exchange tagged frames over a WebSocket. The frame
//! vocabulary covers presence (`presence-update`), the six signaling kinds the
//! relay forwards between peers, and a few connection-level frames.
//!
//! ## Frame Types
//!
//! - `connected` - Greeting carrying the endpoint's own identifier
//! - `presence-update` - Full roster of connected endpoints
//! - `call-request` / `call-accept` / `call-reject` - Call setup
//! - `negotiation-offer` / `negotiation-answer` - Session descriptions
//! - `network-candidate` - Path discovery candidates
//! - `peer-unavailable` / `error` / `ping` / `pong`
//!
//! ## Example
//!
//! ```rust
//! use callwire_protocol::{codec, Frame, SignalKind};
//!
//! let frame = Frame::signal(SignalKind::CallRequest, "peer-2", None);
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;

pub use codec::{decode, encode, Encoded, Encoding, FrameCodec, ProtocolError};
pub use frames::{error_codes, Frame, FrameType, Signal, SignalKind, PROTOCOL_VERSION};
