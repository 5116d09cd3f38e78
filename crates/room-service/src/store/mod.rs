//! Ephemeral session store.
//!
//! Holds live room state: room metadata, membership, participant records,
//! settings and the waiting queue. Every record that represents live state
//! carries a TTL so crashed processes self-heal.
//!
//! # Key Patterns
//!
//! - `room:{code}` - Room metadata (HASH: `host_id`, `created_at`, ...)
//! - `room:{code}:participants` - Member user ids (SET)
//! - `room:{code}:participant:{user}` - Participant record (JSON)
//! - `room:{code}:settings` - Room settings (JSON)
//! - `room:{code}:waiting` - Waiting queue (HASH user -> JSON)
//! - `room:{code}:admitted` - Admitted but not yet joined (SET)
//! - `user:{id}:rooms` - Rooms the user is a member of (SET)
//! - `user:{id}:waiting` - Rooms the user is waiting in (SET)
//!
//! # Atomicity
//!
//! Compound operations that touch membership run as a single Lua script in
//! Redis, or under a single lock acquisition in memory. Callers never
//! read-modify-write membership themselves. Whole-value updates of a string
//! key go through [`SessionStore::compare_and_swap`].

pub mod lua_scripts;
pub mod memory;
pub mod redis;

pub use self::memory::MemorySessionStore;
pub use self::redis::RedisSessionStore;

use crate::errors::StoreError;
use async_trait::async_trait;
use common::types::RoomCode;
use std::collections::HashMap;
use std::time::Duration;

/// Keys for one room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomKeys {
    pub code: RoomCode,
    pub room: String,
    pub participants: String,
    pub settings: String,
    pub waiting: String,
    pub admitted: String,
}

impl RoomKeys {
    #[must_use]
    pub fn new(code: &RoomCode) -> Self {
        Self {
            code: code.clone(),
            room: format!("room:{code}"),
            participants: format!("room:{code}:participants"),
            settings: format!("room:{code}:settings"),
            waiting: format!("room:{code}:waiting"),
            admitted: format!("room:{code}:admitted"),
        }
    }

    /// Key of one participant record.
    #[must_use]
    pub fn participant(&self, user_id: &str) -> String {
        format!("room:{}:participant:{user_id}", self.code)
    }
}

/// Rooms a user is a member of.
#[must_use]
pub fn user_rooms_key(user_id: &str) -> String {
    format!("user:{user_id}:rooms")
}

/// Rooms a user is waiting in.
#[must_use]
pub fn user_waiting_key(user_id: &str) -> String {
    format!("user:{user_id}:waiting")
}

/// Expiry applied by compound writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ttls {
    /// Room hash, membership set, settings.
    pub room: Duration,
    /// Participant records, user indexes, waiting entries.
    pub participant: Duration,
}

/// Result of [`SessionStore::add_member`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddMember {
    Added,
    /// The room hash disappeared (reaped or expired) before the write.
    RoomMissing,
}

/// Result of [`SessionStore::remove_member`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoveOutcome {
    /// The user was a member and has been removed.
    pub removed: bool,
    /// Room metadata, present only for the single caller whose removal emptied
    /// the room and whose delete actually removed the room hash.
    pub reaped: Option<HashMap<String, String>>,
}

/// Result of [`SessionStore::enqueue_waiting`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    /// Queued; carries the queue length afterwards.
    Queued(usize),
    RoomMissing,
    AlreadyMember,
}

/// Ephemeral keyed storage with expiry.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Round-trip to the backend.
    async fn ping(&self) -> Result<(), StoreError>;

    // ---- primitives ----

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;
    /// Returns whether the key existed.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Returns whether the member was newly added.
    async fn add_to_set(&self, key: &str, member: &str) -> Result<bool, StoreError>;
    /// Returns whether the member was present.
    async fn remove_from_set(&self, key: &str, member: &str) -> Result<bool, StoreError>;
    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError>;
    async fn set_size(&self, key: &str) -> Result<usize, StoreError>;
    async fn is_member(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError>;
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;
    /// Returns whether the field existed.
    async fn hash_delete(&self, key: &str, field: &str) -> Result<bool, StoreError>;
    async fn hash_len(&self, key: &str) -> Result<usize, StoreError>;

    /// Write `value` only if the key currently holds `expected` (`None`:
    /// the key is absent). Returns whether the write happened.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    // ---- atomic compound operations ----

    /// Create the room hash and its settings record unless the room exists.
    /// Returns `true` for the single winning creator.
    async fn create_room_if_absent(
        &self,
        keys: &RoomKeys,
        fields: &[(String, String)],
        settings_json: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Add a member to an existing room: membership set, participant record,
    /// user index. Clears any waiting entry and admission for the same user,
    /// bumps `last_activity` and extends the room and settings TTLs.
    async fn add_member(
        &self,
        keys: &RoomKeys,
        user_id: &str,
        participant_json: &str,
        ttls: Ttls,
        now_ms: i64,
    ) -> Result<AddMember, StoreError>;

    /// Keep a live member's state from expiring: refresh the participant
    /// record (restoring it from `participant_json` if it already expired),
    /// the user index, and the room's hash, membership set and settings.
    /// Returns `false`, writing nothing, if the user is not a member.
    async fn touch_member(
        &self,
        keys: &RoomKeys,
        user_id: &str,
        participant_json: &str,
        ttls: Ttls,
        now_ms: i64,
    ) -> Result<bool, StoreError>;

    /// Remove a member; if that empties the room, delete all room keys.
    async fn remove_member(
        &self,
        keys: &RoomKeys,
        user_id: &str,
    ) -> Result<RemoveOutcome, StoreError>;

    /// Delete a room with no members whose `created_at` is before `cutoff_ms`.
    /// Returns the room metadata only to the caller whose delete succeeded.
    async fn reap_if_stale(
        &self,
        keys: &RoomKeys,
        cutoff_ms: i64,
    ) -> Result<Option<HashMap<String, String>>, StoreError>;

    /// Queue a user in the waiting room unless they are already a member.
    async fn enqueue_waiting(
        &self,
        keys: &RoomKeys,
        user_id: &str,
        entry_json: &str,
        ttl: Duration,
    ) -> Result<Enqueue, StoreError>;

    /// Remove a waiting entry, optionally recording an admission. Returns the
    /// removed entry, or `None` if the user was not waiting.
    async fn dequeue_waiting(
        &self,
        keys: &RoomKeys,
        user_id: &str,
        admit: bool,
        ttl: Duration,
    ) -> Result<Option<String>, StoreError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_room_keys() {
        let code = RoomCode::parse("abc-def-ghi").unwrap();
        let keys = RoomKeys::new(&code);

        assert_eq!(keys.room, "room:abc-def-ghi");
        assert_eq!(keys.participants, "room:abc-def-ghi:participants");
        assert_eq!(keys.settings, "room:abc-def-ghi:settings");
        assert_eq!(keys.waiting, "room:abc-def-ghi:waiting");
        assert_eq!(keys.admitted, "room:abc-def-ghi:admitted");
        assert_eq!(keys.participant("u1"), "room:abc-def-ghi:participant:u1");
        assert_eq!(user_rooms_key("u1"), "user:u1:rooms");
        assert_eq!(user_waiting_key("u1"), "user:u1:waiting");
    }
}
