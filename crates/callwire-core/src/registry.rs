//! Presence registry.
//!
//! The registry owns both the channel registration table and the ordered
//! presence set. Lookups go straight to the lock-free table; every mutation,
//! together with the roster broadcast it triggers, runs under one mutex so
//! that broadcasts are totally ordered and the roster always mirrors the table.

use crate::channel::ChannelHandle;
use crate::id::EndpointId;
use crate::presence::{Presence, PresenceState};
use crate::relay::RelayError;
use callwire_protocol::Frame;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Endpoint registry with broadcast-on-change presence.
#[derive(Debug)]
pub struct Registry {
    /// Registered channels indexed by endpoint.
    channels: DashMap<EndpointId, ChannelHandle>,
    /// Ordered roster. Also serializes every mutation of `channels`.
    presence: Mutex<Presence>,
    /// Number of presence broadcasts sent so far.
    broadcasts: AtomicU64,
    /// Maximum number of registered endpoints.
    max_endpoints: usize,
}

impl Registry {
    /// Create a registry accepting at most `max_endpoints` endpoints.
    #[must_use]
    pub fn new(max_endpoints: usize) -> Self {
        Self {
            channels: DashMap::new(),
            presence: Mutex::new(Presence::new()),
            broadcasts: AtomicU64::new(0),
            max_endpoints,
        }
    }

    /// Register an endpoint and broadcast the new roster to everyone,
    /// the new endpoint included.
    ///
    /// Returns the number of channels the broadcast reached.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::DuplicateEndpoint`] if the identifier is already
    /// registered, or [`RelayError::CapacityReached`] if the registry is full.
    /// Neither changes the roster.
    pub fn register(&self, id: EndpointId, channel: ChannelHandle) -> Result<usize, RelayError> {
        let mut presence = self.lock_presence();

        if presence.is_present(id.as_str()) {
            warn!(endpoint = %id, "Identifier collision on register");
            return Err(RelayError::DuplicateEndpoint(id));
        }
        if presence.count() >= self.max_endpoints {
            warn!(endpoint = %id, limit = self.max_endpoints, "Endpoint limit reached");
            return Err(RelayError::CapacityReached(self.max_endpoints));
        }

        self.channels.insert(id.clone(), channel);
        presence.join(id.clone());

        info!(endpoint = %id, endpoints = presence.count(), "Endpoint registered");
        Ok(self.broadcast(&presence))
    }

    /// Deregister an endpoint and broadcast the roster to the remaining ones.
    ///
    /// Returns `false` without broadcasting if the endpoint was not registered.
    pub fn deregister(&self, id: &str) -> bool {
        let mut presence = self.lock_presence();

        if presence.leave(id).is_none() {
            debug!(endpoint = %id, "Deregister of unknown endpoint ignored");
            return false;
        }
        self.channels.remove(id);

        info!(endpoint = %id, endpoints = presence.count(), "Endpoint deregistered");
        self.broadcast(&presence);
        true
    }

    /// Look up the channel registered for an endpoint.
    #[must_use]
    pub fn lookup(&self, id: &str) -> Option<ChannelHandle> {
        self.channels.get(id).map(|entry| entry.value().clone())
    }

    /// Check if an endpoint is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.channels.contains_key(id)
    }

    /// Number of registered endpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Check if no endpoint is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Current roster in join order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<String> {
        self.lock_presence().snapshot()
    }

    /// Current roster with join timestamps.
    #[must_use]
    pub fn members(&self) -> Vec<PresenceState> {
        self.lock_presence().members().to_vec()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            endpoints: self.len(),
            presence_broadcasts: self.broadcasts.load(Ordering::Relaxed),
        }
    }

    /// Send the full roster to every registered channel.
    ///
    /// Must be called with the presence lock held.
    fn broadcast(&self, presence: &Presence) -> usize {
        let frame = Arc::new(Frame::presence_update(presence.snapshot()));
        self.broadcasts.fetch_add(1, Ordering::Relaxed);

        let recipients = presence
            .members()
            .iter()
            .filter_map(|m| {
                self.channels
                    .get(m.endpoint_id.as_str())
                    .map(|channel| (m, channel))
            })
            .filter(|(member, channel)| match channel.send(Arc::clone(&frame)) {
                Ok(()) => true,
                Err(e) => {
                    warn!(endpoint = %member.endpoint_id, error = %e, "Roster not delivered");
                    false
                }
            })
            .count();

        debug!(
            endpoints = presence.count(),
            recipients = recipients,
            "Broadcast presence"
        );
        recipients
    }

    fn lock_presence(&self) -> MutexGuard<'_, Presence> {
        self.presence.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(usize::MAX)
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Number of connected endpoints.
    pub endpoints: usize,
    /// Presence broadcasts sent since start.
    pub presence_broadcasts: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::OutboundReceiver;

    fn drain(rx: &mut OutboundReceiver) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push((*frame).clone());
        }
        frames
    }

    fn roster(ids: &[&str]) -> Frame {
        Frame::presence_update(ids.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_register_broadcasts_to_all() {
        let registry = Registry::default();
        let (a, mut rx_a) = ChannelHandle::pair(64);
        let (b, mut rx_b) = ChannelHandle::pair(64);

        assert_eq!(registry.register("a".into(), a).unwrap(), 1);
        assert_eq!(drain(&mut rx_a), vec![roster(&["a"])]);

        assert_eq!(registry.register("b".into(), b).unwrap(), 2);
        assert_eq!(drain(&mut rx_a), vec![roster(&["a", "b"])]);
        assert_eq!(drain(&mut rx_b), vec![roster(&["a", "b"])]);

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.stats().presence_broadcasts, 2);
    }

    #[test]
    fn test_deregister_broadcasts_to_remaining() {
        let registry = Registry::default();
        let (a, mut rx_a) = ChannelHandle::pair(64);
        let (b, mut rx_b) = ChannelHandle::pair(64);
        registry.register("a".into(), a).unwrap();
        registry.register("b".into(), b).unwrap();
        drain(&mut rx_a);
        drain(&mut rx_b);

        assert!(registry.deregister("b"));
        assert_eq!(drain(&mut rx_a), vec![roster(&["a"])]);
        assert!(drain(&mut rx_b).is_empty());
        assert!(!registry.contains("b"));
    }

    #[test]
    fn test_deregister_is_idempotent() {
        let registry = Registry::default();
        let (a, mut rx_a) = ChannelHandle::pair(64);
        let (b, _rx_b) = ChannelHandle::pair(64);
        registry.register("a".into(), a).unwrap();
        registry.register("b".into(), b).unwrap();
        drain(&mut rx_a);

        assert!(registry.deregister("b"));
        assert!(!registry.deregister("b"));
        assert!(!registry.deregister("never-existed"));

        assert_eq!(drain(&mut rx_a), vec![roster(&["a"])]);
        assert_eq!(registry.stats().presence_broadcasts, 3);
    }

    #[test]
    fn test_duplicate_register_rejected() {
        let registry = Registry::default();
        let (first, mut rx_first) = ChannelHandle::pair(64);
        let (second, mut rx_second) = ChannelHandle::pair(64);

        registry.register("a".into(), first.clone()).unwrap();
        drain(&mut rx_first);

        assert!(matches!(
            registry.register("a".into(), second),
            Err(RelayError::DuplicateEndpoint(_))
        ));

        // The first registration is untouched and nothing was broadcast.
        assert!(registry.lookup("a").unwrap().same_channel(&first));
        assert!(drain(&mut rx_first).is_empty());
        assert!(drain(&mut rx_second).is_empty());
        assert_eq!(registry.snapshot(), vec!["a"]);
    }

    #[test]
    fn test_capacity_reached() {
        let registry = Registry::new(1);
        let (a, _rx_a) = ChannelHandle::pair(64);
        let (b, _rx_b) = ChannelHandle::pair(64);

        registry.register("a".into(), a).unwrap();
        assert!(matches!(
            registry.register("b".into(), b),
            Err(RelayError::CapacityReached(1))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_closed_channel_not_counted() {
        let registry = Registry::default();
        let (a, rx_a) = ChannelHandle::pair(64);
        let (b, _rx_b) = ChannelHandle::pair(64);
        registry.register("a".into(), a).unwrap();
        drop(rx_a);

        assert_eq!(registry.register("b".into(), b).unwrap(), 1);
    }

    #[test]
    fn test_presence_mirrors_table() {
        let registry = Registry::default();
        let mut receivers = Vec::new();
        for id in ["p1", "p2", "p3", "p4"] {
            let (handle, rx) = ChannelHandle::pair(64);
            registry.register(id.into(), handle).unwrap();
            receivers.push(rx);
        }
        registry.deregister("p2");
        registry.deregister("p4");

        assert_eq!(registry.snapshot(), vec!["p1", "p3"]);
        for id in registry.snapshot() {
            assert!(registry.contains(&id));
        }
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.members()[1].endpoint_id.as_str(), "p3");
    }
}
