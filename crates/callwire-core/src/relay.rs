//! The relay: process-wide coordinator for endpoints.
//!
//! A [`Relay`] owns the registry, the router and the identifier allocator. The
//! transport hands every established connection to [`Relay::connect`] and gets
//! back a [`Session`] that it feeds inbound frames to.

use crate::channel::ChannelHandle;
use crate::id::{EndpointId, IdAllocator, UuidAllocator};
use crate::registry::{Registry, RegistryStats};
use crate::router::Router;
use crate::session::Session;
use callwire_protocol::error_codes;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Relay errors.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The allocated identifier is already registered.
    #[error("Endpoint already registered: {0}")]
    DuplicateEndpoint(EndpointId),

    /// Maximum number of endpoints reached.
    #[error("Maximum endpoints reached: {0}")]
    CapacityReached(usize),
}

impl RelayError {
    /// Protocol error code reported to the rejected endpoint.
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            RelayError::DuplicateEndpoint(_) => error_codes::DUPLICATE_ENDPOINT,
            RelayError::CapacityReached(_) => error_codes::CAPACITY_REACHED,
        }
    }
}

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Maximum number of connected endpoints.
    pub max_endpoints: usize,
    /// Heartbeat interval announced in the greeting, in milliseconds.
    pub heartbeat_interval_ms: u32,
    /// Reply with `peer-unavailable` when a signal cannot be delivered.
    pub notify_unavailable: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_endpoints: 100_000,
            heartbeat_interval_ms: 30_000,
            notify_unavailable: false,
        }
    }
}

/// The signaling relay.
pub struct Relay {
    registry: Arc<Registry>,
    router: Router,
    allocator: Box<dyn IdAllocator>,
    config: RelayConfig,
}

impl Relay {
    /// Create a relay with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RelayConfig::default())
    }

    /// Create a relay allocating random UUID identifiers.
    #[must_use]
    pub fn with_config(config: RelayConfig) -> Self {
        Self::with_allocator(config, Box::new(UuidAllocator))
    }

    /// Create a relay with a custom identifier allocator.
    #[must_use]
    pub fn with_allocator(config: RelayConfig, allocator: Box<dyn IdAllocator>) -> Self {
        info!("Creating relay with config: {:?}", config);
        let registry = Arc::new(Registry::new(config.max_endpoints));
        Self {
            router: Router::new(Arc::clone(&registry)),
            registry,
            allocator,
            config,
        }
    }

    /// Accept a newly established channel.
    ///
    /// Allocates an identifier, greets the endpoint with it and registers it,
    /// which broadcasts the new roster to every connected endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the identifier collides with a live one or the
    /// relay is full. Only this connection is affected.
    pub fn connect(self: &Arc<Self>, channel: ChannelHandle) -> Result<Session, RelayError> {
        let id = self.allocator.allocate();
        let mut session = Session::new(id, Arc::clone(self), channel);

        if let Err(e) = session.establish() {
            warn!(endpoint = %session.id(), error = %e, "Connection rejected");
            return Err(e);
        }
        Ok(session)
    }

    /// The presence registry.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The message router.
    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Relay configuration.
    #[must_use]
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        self.registry.stats()
    }
}

impl Default for Relay {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Relay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relay")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::OutboundReceiver;
    use crate::session::Dispatched;
    use callwire_protocol::{Frame, SignalKind};
    use serde_json::json;
    use std::sync::Mutex;

    /// Hands out a fixed list of identifiers.
    struct ScriptedAllocator(Mutex<Vec<&'static str>>);

    impl ScriptedAllocator {
        fn new(ids: &[&'static str]) -> Box<Self> {
            let mut ids = ids.to_vec();
            ids.reverse();
            Box::new(Self(Mutex::new(ids)))
        }
    }

    impl IdAllocator for ScriptedAllocator {
        fn allocate(&self) -> EndpointId {
            self.0.lock().unwrap().pop().unwrap().into()
        }
    }

    fn drain(rx: &mut OutboundReceiver) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push((*frame).clone());
        }
        frames
    }

    fn rosters(frames: &[Frame]) -> Vec<Vec<String>> {
        frames
            .iter()
            .filter_map(|f| match f {
                Frame::PresenceUpdate { peers } => Some(peers.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_three_endpoint_scenario() {
        let relay = Arc::new(Relay::with_allocator(
            RelayConfig::default(),
            ScriptedAllocator::new(&["X", "Y", "Z"]),
        ));

        let (x, mut rx_x) = ChannelHandle::pair(64);
        let (y, mut rx_y) = ChannelHandle::pair(64);
        let (z, mut rx_z) = ChannelHandle::pair(64);

        let session_x = relay.connect(x).unwrap();
        assert_eq!(rosters(&drain(&mut rx_x)), vec![vec!["X"]]);

        let mut session_y = relay.connect(y).unwrap();
        assert_eq!(rosters(&drain(&mut rx_x)), vec![vec!["X", "Y"]]);
        assert_eq!(rosters(&drain(&mut rx_y)), vec![vec!["X", "Y"]]);

        let session_z = relay.connect(z).unwrap();
        assert_eq!(rosters(&drain(&mut rx_x)), vec![vec!["X", "Y", "Z"]]);
        assert_eq!(rosters(&drain(&mut rx_y)), vec![vec!["X", "Y", "Z"]]);
        assert_eq!(rosters(&drain(&mut rx_z)), vec![vec!["X", "Y", "Z"]]);

        // X calls Z.
        session_x.dispatch(Frame::signal(SignalKind::CallRequest, "Z", None));
        assert_eq!(
            drain(&mut rx_z),
            vec![Frame::signal(SignalKind::CallRequest, "X", None)]
        );

        // Z offers to X.
        let offer = json!({"type": "offer", "sdp": "P"});
        session_z.dispatch(Frame::signal(
            SignalKind::NegotiationOffer,
            "X",
            Some(offer.clone()),
        ));
        assert_eq!(
            drain(&mut rx_x),
            vec![Frame::signal(SignalKind::NegotiationOffer, "Z", Some(offer))]
        );

        // Y leaves.
        session_y.disconnect();
        assert_eq!(rosters(&drain(&mut rx_x)), vec![vec!["X", "Z"]]);
        assert_eq!(rosters(&drain(&mut rx_z)), vec![vec!["X", "Z"]]);
        assert!(drain(&mut rx_y).is_empty());

        // X sends a candidate to the departed Y.
        let outcome = session_x.dispatch(Frame::signal(
            SignalKind::NetworkCandidate,
            "Y",
            Some(json!({"candidate": "c"})),
        ));
        assert!(matches!(outcome, Dispatched::Dropped(..)));
        assert!(drain(&mut rx_x).is_empty());
        assert!(drain(&mut rx_y).is_empty());
        assert!(drain(&mut rx_z).is_empty());
    }

    #[test]
    fn test_duplicate_identifier_rejects_only_new_connection() {
        let relay = Arc::new(Relay::with_allocator(
            RelayConfig::default(),
            ScriptedAllocator::new(&["dup", "dup"]),
        ));
        let (first, _rx_first) = ChannelHandle::pair(64);
        let (second, _rx_second) = ChannelHandle::pair(64);

        let _session = relay.connect(first).unwrap();
        let err = relay.connect(second).unwrap_err();
        assert!(matches!(err, RelayError::DuplicateEndpoint(_)));
        assert_eq!(err.code(), error_codes::DUPLICATE_ENDPOINT);

        // Dropping the rejected session must not evict the live one.
        assert_eq!(relay.registry().snapshot(), vec!["dup"]);
        assert_eq!(relay.stats().presence_broadcasts, 1);
    }

    #[test]
    fn test_capacity() {
        let config = RelayConfig {
            max_endpoints: 2,
            ..RelayConfig::default()
        };
        let relay = Arc::new(Relay::with_config(config));

        let mut sessions = Vec::new();
        for _ in 0..2 {
            let (handle, rx) = ChannelHandle::pair(64);
            sessions.push((relay.connect(handle).unwrap(), rx));
        }

        let (handle, _rx) = ChannelHandle::pair(64);
        let err = relay.connect(handle).unwrap_err();
        assert!(matches!(err, RelayError::CapacityReached(2)));

        sessions.pop();
        let (handle, _rx) = ChannelHandle::pair(64);
        assert!(relay.connect(handle).is_ok());
    }

    #[test]
    fn test_presence_accuracy_over_churn() {
        let relay = Arc::new(Relay::with_allocator(
            RelayConfig::default(),
            Box::new(crate::id::SequentialAllocator::default()),
        ));
        let (watcher, mut rx_watch) = ChannelHandle::pair(64);
        let _watch = relay.connect(watcher).unwrap();
        drain(&mut rx_watch);

        let mut live: Vec<(Session, OutboundReceiver)> = Vec::new();
        for round in 0..20 {
            if round % 3 == 2 {
                let (mut session, _rx) = live.remove(0);
                session.disconnect();
            } else {
                let (handle, rx) = ChannelHandle::pair(64);
                live.push((relay.connect(handle).unwrap(), rx));
            }

            let mut expected = vec!["peer-1".to_string()];
            expected.extend(live.iter().map(|(s, _)| s.id().to_string()));

            let seen = rosters(&drain(&mut rx_watch));
            assert_eq!(seen, vec![expected.clone()]);
            assert_eq!(relay.registry().snapshot(), expected);
        }
    }
}
