//! # callwire-core
//!
//! Session registry and message routing for the Callwire signaling relay.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Registry** - Ordered presence roster and channel registration table,
//!   broadcasting the full roster on every change
//! - **Router** - Identifier-addressed forwarding of signaling events
//! - **Session** - Per-connection lifecycle (`Connecting → Connected → Disconnected`)
//! - **Relay** - Process-wide coordinator tying the above to an identifier allocator
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Transport  │────▶│   Session   │────▶│   Router    │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │                   │
//!                            ▼                   ▼
//!                     ┌─────────────────────────────┐
//!                     │          Registry           │
//!                     └─────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use callwire_core::{ChannelHandle, Relay};
//! use std::sync::Arc;
//!
//! let relay = Arc::new(Relay::new());
//! let (handle, mut outbound) = ChannelHandle::pair(64);
//!
//! let session = relay.connect(handle).unwrap();
//! assert_eq!(relay.registry().snapshot(), vec![session.id().to_string()]);
//!
//! // Greeting, then the roster.
//! assert!(outbound.try_recv().is_ok());
//! assert!(outbound.try_recv().is_ok());
//! ```

pub mod channel;
pub mod id;
pub mod presence;
pub mod registry;
pub mod relay;
pub mod router;
pub mod session;

pub use channel::{ChannelHandle, OutboundReceiver, SendError, DEFAULT_QUEUE_CAPACITY};
pub use id::{EndpointId, IdAllocator, SequentialAllocator, UuidAllocator};
pub use presence::{Presence, PresenceState};
pub use registry::{Registry, RegistryStats};
pub use relay::{Relay, RelayConfig, RelayError};
pub use router::{Delivery, DropReason, Router};
pub use session::{Dispatched, Session, SessionState};
