//! Channel handles.
//!
//! A [`ChannelHandle`] is the send half of one endpoint's connection. The
//! transport drains the matching receiver onto the socket; the core only ever
//! pushes frames into it, so sending never blocks. Each queue is bounded and a
//! frame that does not fit is dropped.

use callwire_protocol::Frame;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::trace;

/// Outbound queue length used when nothing else is configured.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Receiver end of a channel's outbound queue.
pub type OutboundReceiver = mpsc::Receiver<Arc<Frame>>;

/// Why a frame could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// The endpoint is not draining its queue fast enough.
    Full,
    /// The connection's receiver is gone.
    Closed,
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Full => f.write_str("outbound queue full"),
            SendError::Closed => f.write_str("channel closed"),
        }
    }
}

impl std::error::Error for SendError {}

/// Send half of an endpoint connection.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    sender: mpsc::Sender<Arc<Frame>>,
}

impl ChannelHandle {
    /// Create a handle together with the receiver the transport drains.
    ///
    /// At most `capacity` frames wait in the queue; a zero capacity is raised
    /// to one.
    #[must_use]
    pub fn pair(capacity: usize) -> (Self, OutboundReceiver) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Queue a frame for delivery without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Full`] if the queue is at capacity and
    /// [`SendError::Closed`] if the connection's receiver is gone. The frame
    /// is dropped in both cases.
    pub fn send(&self, frame: impl Into<Arc<Frame>>) -> Result<(), SendError> {
        let frame = frame.into();
        trace!(frame_type = %frame.frame_type(), "Queueing frame");
        self.sender.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => SendError::Full,
            TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// Check if the receiving side has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Check whether two handles feed the same queue.
    #[must_use]
    pub fn same_channel(&self, other: &ChannelHandle) -> bool {
        self.sender.same_channel(&other.sender)
    }
}
