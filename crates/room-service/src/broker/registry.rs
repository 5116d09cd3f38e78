//! Connection-to-identity bindings.
//!
//! One entry per live connection, owned by the broker instance. Entries are
//! created on the first join (room or waiting room) and removed in O(1) on
//! disconnect.
//!
//! Each binding keeps the caller's latest participant record per joined
//! room. Keepalive uses it to restore a record whose TTL lapsed, and
//! disconnect uses the room list even when the store's user index has
//! expired.

use super::ConnectionId;
use common::types::RoomCode;
use dashmap::DashMap;
use signaling_protocol::events::Participant;
use std::collections::HashMap;

/// Identity and joined rooms of one connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Binding {
    pub user_id: String,
    pub rooms: HashMap<RoomCode, Participant>,
    /// Last keepalive (epoch ms).
    pub touched_at: i64,
}

/// Live bindings keyed by connection.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    bindings: DashMap<ConnectionId, Binding>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a connection to a user.
    ///
    /// Returns `false` without changing anything if the connection is
    /// already bound to a different user.
    #[must_use]
    pub fn bind(&self, conn: &ConnectionId, user_id: &str) -> bool {
        let entry = self.bindings.entry(conn.clone()).or_insert_with(|| Binding {
            user_id: user_id.to_string(),
            ..Binding::default()
        });
        entry.user_id == user_id
    }

    /// The bound user, if any.
    #[must_use]
    pub fn user_id(&self, conn: &ConnectionId) -> Option<String> {
        self.bindings.get(conn).map(|b| b.user_id.clone())
    }

    /// Record a joined room. A join refreshes every TTL, so it also counts
    /// as a keepalive.
    pub fn add_room(&self, conn: &ConnectionId, code: &RoomCode, participant: Participant, now_ms: i64) {
        if let Some(mut binding) = self.bindings.get_mut(conn) {
            binding.rooms.insert(code.clone(), participant);
            binding.touched_at = now_ms;
        }
    }

    /// Replace the participant snapshot for a room the connection is in.
    pub fn update_participant(&self, conn: &ConnectionId, code: &RoomCode, participant: Participant) {
        if let Some(mut binding) = self.bindings.get_mut(conn) {
            if let Some(slot) = binding.rooms.get_mut(code) {
                *slot = participant;
            }
        }
    }

    pub fn remove_room(&self, conn: &ConnectionId, code: &RoomCode) {
        if let Some(mut binding) = self.bindings.get_mut(conn) {
            binding.rooms.remove(code);
        }
    }

    /// Rooms to refresh if the last keepalive is at least `interval_ms` old.
    /// Marks the connection as touched at `now_ms` when anything is due.
    pub fn due_for_keepalive(
        &self,
        conn: &ConnectionId,
        now_ms: i64,
        interval_ms: i64,
    ) -> Vec<(RoomCode, Participant)> {
        let Some(mut binding) = self.bindings.get_mut(conn) else {
            return Vec::new();
        };
        if binding.rooms.is_empty() || now_ms.saturating_sub(binding.touched_at) < interval_ms {
            return Vec::new();
        }
        binding.touched_at = now_ms;
        binding
            .rooms
            .iter()
            .map(|(code, participant)| (code.clone(), participant.clone()))
            .collect()
    }

    /// Remove and return the binding.
    pub fn unbind(&self, conn: &ConnectionId) -> Option<Binding> {
        self.bindings.remove(conn).map(|(_, binding)| binding)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
