//! Codecs for encoding and decoding Callwire frames.
//!
//! Two encodings are supported:
//!
//! - **JSON**: one frame per WebSocket text message.
//! - **MessagePack**: binary messages with a 4-byte big-endian length prefix
//!   per frame. A single binary message may carry several frames, or only part
//!   of one.
//!
//! Payloads are carried as JSON values in both encodings, so a MessagePack
//! payload must be JSON-representable. Binary (`bin`) and extension values
//! fail to decode with [`ProtocolError::Decode`]; the frame is skipped and the
//! stream stays in sync.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Deserialize;
use std::str::FromStr;
use thiserror::Error;

use crate::frames::Frame;

/// Maximum frame size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Not enough data to decode frame.
    #[error("Incomplete frame: need {0} more bytes")]
    Incomplete(usize),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Unknown encoding name.
    #[error("Unknown encoding: {0}")]
    UnknownEncoding(String),
}

/// Frame encoding negotiated per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum Encoding {
    /// JSON text messages.
    #[default]
    #[serde(rename = "json")]
    Json,
    /// Length-prefixed MessagePack binary messages.
    #[serde(rename = "msgpack", alias = "messagepack")]
    MessagePack,
}

impl Encoding {
    /// Name used in the `encoding` query parameter.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Json => "json",
            Encoding::MessagePack => "msgpack",
        }
    }
}

impl FromStr for Encoding {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Encoding::Json),
            "msgpack" | "messagepack" => Ok(Encoding::MessagePack),
            other => Err(ProtocolError::UnknownEncoding(other.to_string())),
        }
    }
}

/// An encoded frame ready to be written to a WebSocket.
#[derive(Debug, Clone, PartialEq)]
pub enum Encoded {
    /// Text message (JSON).
    Text(String),
    /// Binary message (MessagePack).
    Binary(Bytes),
}

impl Encoded {
    /// Encoded length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Encoded::Text(text) => text.len(),
            Encoded::Binary(data) => data.len(),
        }
    }

    /// Whether the encoded message is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Encode a frame to length-prefixed MessagePack bytes.
///
/// The encoded format is:
/// - 4 bytes: Big-endian length prefix
/// - N bytes: MessagePack-encoded frame
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode(frame: &Frame) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    encode_into(frame, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a frame into an existing buffer.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode_into(frame: &Frame, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    let payload = rmp_serde::to_vec_named(frame)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    buf.reserve(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);

    Ok(())
}

/// Decode a single length-prefixed MessagePack frame.
///
/// # Errors
///
/// Returns an error if the data is incomplete, too large, or invalid.
pub fn decode(data: &[u8]) -> Result<Frame, ProtocolError> {
    if data.len() < LENGTH_PREFIX_SIZE {
        return Err(ProtocolError::Incomplete(LENGTH_PREFIX_SIZE - data.len()));
    }

    let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if data.len() < total_size {
        return Err(ProtocolError::Incomplete(total_size - data.len()));
    }

    let frame = rmp_serde::from_slice(&data[LENGTH_PREFIX_SIZE..total_size])?;
    Ok(frame)
}

/// Try to decode a frame from a buffer, advancing it if successful.
///
/// Returns `Ok(Some(frame))` if a complete frame was decoded,
/// `Ok(None)` if more data is needed, or `Err` on protocol error.
/// A frame that fails to deserialize is still consumed from the buffer.
///
/// # Errors
///
/// Returns an error if the frame is too large or invalid.
pub fn decode_from(buf: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if buf.len() < total_size {
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_SIZE);
    let payload = buf.split_to(length);
    let frame = rmp_serde::from_slice(&payload)?;

    Ok(Some(frame))
}

/// Encode a frame as a JSON text message.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_json(frame: &Frame) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(frame)?)
}

/// Decode a frame from a JSON text message.
///
/// # Errors
///
/// Returns an error if the text is not a valid frame.
pub fn decode_json(text: &str) -> Result<Frame, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

/// Per-connection codec.
///
/// Outbound frames use the connection's [`Encoding`]. Inbound text messages
/// are always JSON and inbound binary messages are always MessagePack, so a
/// client may mix both.
#[derive(Debug, Default)]
pub struct FrameCodec {
    encoding: Encoding,
    read_buffer: BytesMut,
}

impl FrameCodec {
    /// Create a new codec instance.
    #[must_use]
    pub fn new(encoding: Encoding) -> Self {
        Self {
            encoding,
            read_buffer: BytesMut::with_capacity(4096),
        }
    }

    /// The outbound encoding.
    #[must_use]
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Encode a frame for sending.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self, frame: &Frame) -> Result<Encoded, ProtocolError> {
        match self.encoding {
            Encoding::Json => encode_json(frame).map(Encoded::Text),
            Encoding::MessagePack => encode(frame).map(Encoded::Binary),
        }
    }

    /// Decode an inbound text message.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid frame.
    pub fn decode_text(&self, text: &str) -> Result<Frame, ProtocolError> {
        decode_json(text)
    }

    /// Append inbound binary data to the read buffer.
    pub fn feed(&mut self, data: &[u8]) {
        self.read_buffer.extend_from_slice(data);
    }

    /// Take the next complete frame out of the read buffer.
    ///
    /// An oversized length prefix discards the whole buffer, since the stream
    /// can no longer be resynchronised.
    ///
    /// # Errors
    ///
    /// Returns an error if the next frame is too large or invalid.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        match decode_from(&mut self.read_buffer) {
            Err(ProtocolError::FrameTooLarge(len)) => {
                self.read_buffer.clear();
                Err(ProtocolError::FrameTooLarge(len))
            }
            other => other,
        }
    }

    /// Bytes waiting in the read buffer.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.read_buffer.len()
    }
}
