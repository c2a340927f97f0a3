//! Presence tracking for Callwire.
//!
//! The presence set is the ordered roster of connected endpoints. Members are
//! kept in join order, which is the order clients see in `presence-update`.

use crate::id::EndpointId;
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Presence state for a single endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct PresenceState {
    /// Endpoint ID.
    pub endpoint_id: EndpointId,
    /// When the endpoint joined, in milliseconds since the epoch.
    pub joined_at: u64,
}

impl PresenceState {
    /// Create a new presence state stamped with the current time.
    #[must_use]
    pub fn new(endpoint_id: EndpointId) -> Self {
        Self {
            endpoint_id,
            joined_at: now_millis(),
        }
    }
}

/// Ordered presence roster.
#[derive(Debug, Default)]
pub struct Presence {
    members: Vec<PresenceState>,
}

impl Presence {
    /// Create an empty roster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of present members.
    #[must_use]
    pub fn count(&self) -> usize {
        self.members.len()
    }

    /// Check if presence is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Check if an endpoint is present.
    #[must_use]
    pub fn is_present(&self, endpoint_id: &str) -> bool {
        self.position(endpoint_id).is_some()
    }

    /// Get the presence state for an endpoint.
    #[must_use]
    pub fn get(&self, endpoint_id: &str) -> Option<&PresenceState> {
        self.members
            .iter()
            .find(|m| m.endpoint_id.as_str() == endpoint_id)
    }

    /// Append a member to the roster.
    ///
    /// Returns `false` and leaves the roster untouched if already present.
    pub fn join(&mut self, endpoint_id: EndpointId) -> bool {
        if self.is_present(endpoint_id.as_str()) {
            return false;
        }

        debug!(endpoint = %endpoint_id, "Presence: member joined");
        self.members.push(PresenceState::new(endpoint_id));
        true
    }

    /// Remove a member, preserving the order of the others.
    ///
    /// Returns the removed presence state, if any.
    pub fn leave(&mut self, endpoint_id: &str) -> Option<PresenceState> {
        let state = self.position(endpoint_id).map(|i| self.members.remove(i));
        if state.is_some() {
            debug!(endpoint = %endpoint_id, "Presence: member left");
        }
        state
    }

    /// All members in join order.
    #[must_use]
    pub fn members(&self) -> &[PresenceState] {
        &self.members
    }

    /// Member identifiers in join order, as sent on the wire.
    #[must_use]
    pub fn snapshot(&self) -> Vec<String> {
        self.members
            .iter()
            .map(|m| m.endpoint_id.to_string())
            .collect()
    }

    fn position(&self, endpoint_id: &str) -> Option<usize> {
        self.members
            .iter()
            .position(|m| m.endpoint_id.as_str() == endpoint_id)
    }
}
