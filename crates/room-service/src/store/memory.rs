//! In-process session store.
//!
//! Used when no Redis URL is configured and by tests. All keys live in one
//! map behind a mutex; every operation, including the compound membership
//! operations, runs under a single lock acquisition and never awaits while
//! holding it. Expiry is lazy: an expired key is dropped the next time it is
//! touched.
//!
//! Collection semantics follow Redis: a set or hash that becomes empty is
//! removed, and writing a string resets its expiry.

use super::{
    user_rooms_key, user_waiting_key, AddMember, Enqueue, RemoveOutcome, RoomKeys, SessionStore,
    Ttls,
};
use crate::errors::StoreError;
use async_trait::async_trait;
use common::clock::Clock;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Set(HashSet<String>),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<i64>,
}

/// Session store held in process memory.
#[derive(Debug)]
pub struct MemorySessionStore {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Number of live keys (test helper for leak checks).
    pub fn key_count(&self) -> Result<usize, StoreError> {
        self.with(|tx| {
            let now = tx.now;
            Ok(tx
                .map
                .values()
                .filter(|e| e.expires_at.map_or(true, |t| t > now))
                .count())
        })
    }

    fn with<T>(&self, f: impl FnOnce(&mut Tx<'_>) -> Result<T, StoreError>) -> Result<T, StoreError> {
        let now = self.clock.now_ms();
        let mut guard = self
            .entries
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))?;
        let mut tx = Tx {
            map: &mut *guard,
            now,
        };
        f(&mut tx)
    }
}

fn ttl_ms(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::Command(format!("WRONGTYPE operation against key {key}"))
}

/// One locked view of the map.
struct Tx<'a> {
    map: &'a mut HashMap<String, Entry>,
    now: i64,
}

impl Tx<'_> {
    fn purge_if_expired(&mut self, key: &str) {
        let now = self.now;
        if self
            .map
            .get(key)
            .is_some_and(|e| e.expires_at.is_some_and(|t| t <= now))
        {
            self.map.remove(key);
        }
    }

    fn entry(&mut self, key: &str) -> Option<&mut Entry> {
        self.purge_if_expired(key);
        self.map.get_mut(key)
    }

    fn exists(&mut self, key: &str) -> bool {
        self.entry(key).is_some()
    }

    fn del(&mut self, key: &str) -> bool {
        self.purge_if_expired(key);
        self.map.remove(key).is_some()
    }

    fn expire(&mut self, key: &str, ttl: Duration) -> bool {
        let deadline = self.now.saturating_add(ttl_ms(ttl));
        match self.entry(key) {
            Some(entry) => {
                entry.expires_at = Some(deadline);
                true
            }
            None => false,
        }
    }

    fn set_string(&mut self, key: &str, value: &str, ttl: Option<Duration>) {
        let expires_at = ttl.map(|t| self.now.saturating_add(ttl_ms(t)));
        self.map.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at,
            },
        );
    }

    fn get_string(&mut self, key: &str) -> Result<Option<String>, StoreError> {
        match self.entry(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn set_ref(&mut self, key: &str) -> Result<Option<&HashSet<String>>, StoreError> {
        match self.entry(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Set(s),
                ..
            }) => Ok(Some(&*s)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn set_mut(&mut self, key: &str) -> Result<&mut HashSet<String>, StoreError> {
        self.purge_if_expired(key);
        let entry = self.map.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Set(HashSet::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::Set(s) => Ok(s),
            _ => Err(wrong_type(key)),
        }
    }

    fn sadd(&mut self, key: &str, member: &str) -> Result<bool, StoreError> {
        Ok(self.set_mut(key)?.insert(member.to_string()))
    }

    fn srem(&mut self, key: &str, member: &str) -> Result<bool, StoreError> {
        let (removed, now_empty) = match self.entry(key) {
            None => return Ok(false),
            Some(Entry {
                value: Value::Set(s),
                ..
            }) => (s.remove(member), s.is_empty()),
            Some(_) => return Err(wrong_type(key)),
        };
        if now_empty {
            self.map.remove(key);
        }
        Ok(removed)
    }

    fn scard(&mut self, key: &str) -> Result<usize, StoreError> {
        Ok(self.set_ref(key)?.map_or(0, HashSet::len))
    }

    fn hash_ref(&mut self, key: &str) -> Result<Option<&HashMap<String, String>>, StoreError> {
        match self.entry(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Hash(h),
                ..
            }) => Ok(Some(&*h)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn hset(&mut self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        self.purge_if_expired(key);
        let entry = self.map.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Hash(HashMap::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::Hash(h) => {
                h.insert(field.to_string(), value.to_string());
                Ok(())
            }
            _ => Err(wrong_type(key)),
        }
    }

    fn hdel(&mut self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let (removed, now_empty) = match self.entry(key) {
            None => return Ok(None),
            Some(Entry {
                value: Value::Hash(h),
                ..
            }) => (h.remove(field), h.is_empty()),
            Some(_) => return Err(wrong_type(key)),
        };
        if now_empty {
            self.map.remove(key);
        }
        Ok(removed)
    }

    fn hgetall(&mut self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        Ok(self.hash_ref(key)?.cloned().unwrap_or_default())
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.with(|_| Ok(()))
    }

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.with(|tx| {
            tx.set_string(key, value, ttl);
            Ok(())
        })
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.with(|tx| tx.get_string(key))
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.with(|tx| Ok(tx.del(key)))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.with(|tx| Ok(tx.expire(key, ttl)))
    }

    async fn add_to_set(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        self.with(|tx| tx.sadd(key, member))
    }

    async fn remove_from_set(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        self.with(|tx| tx.srem(key, member))
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        self.with(|tx| {
            Ok(tx
                .set_ref(key)?
                .map(|s| s.iter().cloned().collect())
                .unwrap_or_default())
        })
    }

    async fn set_size(&self, key: &str) -> Result<usize, StoreError> {
        self.with(|tx| tx.scard(key))
    }

    async fn is_member(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        self.with(|tx| Ok(tx.set_ref(key)?.is_some_and(|s| s.contains(member))))
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        self.with(|tx| tx.hset(key, field, value))
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        self.with(|tx| Ok(tx.hash_ref(key)?.and_then(|h| h.get(field).cloned())))
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        self.with(|tx| tx.hgetall(key))
    }

    async fn hash_delete(&self, key: &str, field: &str) -> Result<bool, StoreError> {
        self.with(|tx| Ok(tx.hdel(key, field)?.is_some()))
    }

    async fn hash_len(&self, key: &str) -> Result<usize, StoreError> {
        self.with(|tx| Ok(tx.hash_ref(key)?.map_or(0, HashMap::len)))
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.with(|tx| {
            if tx.get_string(key)?.as_deref() != expected {
                return Ok(false);
            }
            tx.set_string(key, value, Some(ttl));
            Ok(true)
        })
    }

    async fn create_room_if_absent(
        &self,
        keys: &RoomKeys,
        fields: &[(String, String)],
        settings_json: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.with(|tx| {
            if tx.exists(&keys.room) {
                return Ok(false);
            }
            for (field, value) in fields {
                tx.hset(&keys.room, field, value)?;
            }
            tx.expire(&keys.room, ttl);
            tx.set_string(&keys.settings, settings_json, Some(ttl));
            Ok(true)
        })
    }

    async fn add_member(
        &self,
        keys: &RoomKeys,
        user_id: &str,
        participant_json: &str,
        ttls: Ttls,
        now_ms: i64,
    ) -> Result<AddMember, StoreError> {
        self.with(|tx| {
            if !tx.exists(&keys.room) {
                return Ok(AddMember::RoomMissing);
            }

            let user_rooms = user_rooms_key(user_id);
            tx.sadd(&keys.participants, user_id)?;
            tx.expire(&keys.participants, ttls.room);
            tx.set_string(
                &keys.participant(user_id),
                participant_json,
                Some(ttls.participant),
            );
            tx.sadd(&user_rooms, keys.code.as_str())?;
            tx.expire(&user_rooms, ttls.participant);

            tx.hdel(&keys.waiting, user_id)?;
            tx.srem(&user_waiting_key(user_id), keys.code.as_str())?;
            tx.srem(&keys.admitted, user_id)?;

            tx.hset(&keys.room, "last_activity", &now_ms.to_string())?;
            tx.expire(&keys.room, ttls.room);
            tx.expire(&keys.settings, ttls.room);
            Ok(AddMember::Added)
        })
    }

    async fn touch_member(
        &self,
        keys: &RoomKeys,
        user_id: &str,
        participant_json: &str,
        ttls: Ttls,
        now_ms: i64,
    ) -> Result<bool, StoreError> {
        self.with(|tx| {
            if !tx
                .set_ref(&keys.participants)?
                .is_some_and(|s| s.contains(user_id))
            {
                return Ok(false);
            }

            let record = keys.participant(user_id);
            if !tx.expire(&record, ttls.participant) {
                tx.set_string(&record, participant_json, Some(ttls.participant));
            }
            let user_rooms = user_rooms_key(user_id);
            tx.sadd(&user_rooms, keys.code.as_str())?;
            tx.expire(&user_rooms, ttls.participant);

            tx.expire(&keys.participants, ttls.room);
            tx.expire(&keys.settings, ttls.room);
            if tx.exists(&keys.room) {
                tx.hset(&keys.room, "last_activity", &now_ms.to_string())?;
                tx.expire(&keys.room, ttls.room);
            }
            Ok(true)
        })
    }

    async fn remove_member(
        &self,
        keys: &RoomKeys,
        user_id: &str,
    ) -> Result<RemoveOutcome, StoreError> {
        self.with(|tx| {
            let removed = tx.srem(&keys.participants, user_id)?;
            tx.del(&keys.participant(user_id));
            tx.srem(&user_rooms_key(user_id), keys.code.as_str())?;

            if !removed || tx.scard(&keys.participants)? > 0 {
                return Ok(RemoveOutcome {
                    removed,
                    reaped: None,
                });
            }

            let room = tx.hgetall(&keys.room)?;
            let deleted = tx.del(&keys.room);
            for key in [&keys.participants, &keys.settings, &keys.waiting, &keys.admitted] {
                tx.del(key);
            }

            Ok(RemoveOutcome {
                removed: true,
                reaped: deleted.then_some(room),
            })
        })
    }

    async fn reap_if_stale(
        &self,
        keys: &RoomKeys,
        cutoff_ms: i64,
    ) -> Result<Option<HashMap<String, String>>, StoreError> {
        self.with(|tx| {
            if !tx.exists(&keys.room) || tx.scard(&keys.participants)? > 0 {
                return Ok(None);
            }

            let room = tx.hgetall(&keys.room)?;
            let created_at = room.get("created_at").and_then(|v| v.parse::<i64>().ok());
            match created_at {
                Some(created) if created < cutoff_ms => {}
                _ => return Ok(None),
            }

            for key in [
                &keys.room,
                &keys.participants,
                &keys.settings,
                &keys.waiting,
                &keys.admitted,
            ] {
                tx.del(key);
            }
            Ok(Some(room))
        })
    }

    async fn enqueue_waiting(
        &self,
        keys: &RoomKeys,
        user_id: &str,
        entry_json: &str,
        ttl: Duration,
    ) -> Result<Enqueue, StoreError> {
        self.with(|tx| {
            if !tx.exists(&keys.room) {
                return Ok(Enqueue::RoomMissing);
            }
            if tx
                .set_ref(&keys.participants)?
                .is_some_and(|s| s.contains(user_id))
            {
                return Ok(Enqueue::AlreadyMember);
            }

            let user_waiting = user_waiting_key(user_id);
            tx.hset(&keys.waiting, user_id, entry_json)?;
            tx.expire(&keys.waiting, ttl);
            tx.sadd(&user_waiting, keys.code.as_str())?;
            tx.expire(&user_waiting, ttl);

            let len = tx.hash_ref(&keys.waiting)?.map_or(0, HashMap::len);
            Ok(Enqueue::Queued(len))
        })
    }

    async fn dequeue_waiting(
        &self,
        keys: &RoomKeys,
        user_id: &str,
        admit: bool,
        ttl: Duration,
    ) -> Result<Option<String>, StoreError> {
        self.with(|tx| {
            tx.srem(&user_waiting_key(user_id), keys.code.as_str())?;
            let Some(entry) = tx.hdel(&keys.waiting, user_id)? else {
                return Ok(None);
            };
            if admit {
                tx.sadd(&keys.admitted, user_id)?;
                tx.expire(&keys.admitted, ttl);
            }
            Ok(Some(entry))
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::clock::ManualClock;
    use common::types::RoomCode;

    const HOUR: Duration = Duration::from_secs(3_600);

    fn ttls() -> Ttls {
        Ttls {
            room: Duration::from_secs(86_400),
            participant: HOUR,
        }
    }

    fn store() -> (Arc<ManualClock>, MemorySessionStore) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let store = MemorySessionStore::new(clock.clone());
        (clock, store)
    }

    fn keys() -> RoomKeys {
        RoomKeys::new(&RoomCode::parse("abc-def-ghi").unwrap())
    }

    fn room_fields(created_at: i64) -> Vec<(String, String)> {
        vec![
            ("host_id".to_string(), "host".to_string()),
            ("created_at".to_string(), created_at.to_string()),
        ]
    }

    #[tokio::test]
    async fn test_put_get_and_expiry() {
        let (clock, store) = store();

        store.put("k", "v", Some(Duration::from_secs(10))).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        clock.advance(Duration::from_secs(11));
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_put_without_ttl_never_expires() {
        let (clock, store) = store();
        store.put("k", "v", None).await.unwrap();
        clock.advance(Duration::from_secs(365 * 86_400));
        assert!(store.get("k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_set_operations() {
        let (_, store) = store();

        assert!(store.add_to_set("s", "a").await.unwrap());
        assert!(!store.add_to_set("s", "a").await.unwrap());
        assert!(store.add_to_set("s", "b").await.unwrap());
        assert_eq!(store.set_size("s").await.unwrap(), 2);
        assert!(store.is_member("s", "b").await.unwrap());

        let mut members = store.set_members("s").await.unwrap();
        members.sort();
        assert_eq!(members, vec!["a", "b"]);

        assert!(store.remove_from_set("s", "a").await.unwrap());
        assert!(store.remove_from_set("s", "b").await.unwrap());
        // Empty sets disappear
        assert_eq!(store.key_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_hash_operations() {
        let (_, store) = store();

        store.hash_set("h", "f1", "v1").await.unwrap();
        store.hash_set("h", "f2", "v2").await.unwrap();
        assert_eq!(store.hash_len("h").await.unwrap(), 2);
        assert_eq!(store.hash_get("h", "f1").await.unwrap().as_deref(), Some("v1"));
        assert!(store.hash_delete("h", "f1").await.unwrap());
        assert!(!store.hash_delete("h", "f1").await.unwrap());
        assert_eq!(store.hash_get_all("h").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_wrong_type_is_an_error() {
        let (_, store) = store();
        store.put("k", "v", None).await.unwrap();
        assert!(matches!(
            store.add_to_set("k", "m").await,
            Err(StoreError::Command(_))
        ));
    }

    #[tokio::test]
    async fn test_create_room_if_absent_single_winner() {
        let (_, store) = store();
        let keys = keys();

        assert!(store
            .create_room_if_absent(&keys, &room_fields(1), "{}", HOUR)
            .await
            .unwrap());
        assert!(!store
            .create_room_if_absent(&keys, &room_fields(2), "{}", HOUR)
            .await
            .unwrap());

        let room = store.hash_get_all(&keys.room).await.unwrap();
        assert_eq!(room.get("created_at").map(String::as_str), Some("1"));
        assert!(store.get(&keys.settings).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_add_member_requires_room() {
        let (_, store) = store();
        let keys = keys();

        let result = store
            .add_member(&keys, "u1", "{}", ttls(), 5)
            .await
            .unwrap();
        assert_eq!(result, AddMember::RoomMissing);
        assert_eq!(store.set_size(&keys.participants).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_add_member_clears_waiting_state() {
        let (_, store) = store();
        let keys = keys();
        store
            .create_room_if_absent(&keys, &room_fields(1), "{}", HOUR)
            .await
            .unwrap();

        store
            .enqueue_waiting(&keys, "w", "{}", HOUR)
            .await
            .unwrap();
        store
            .dequeue_waiting(&keys, "w", true, HOUR)
            .await
            .unwrap();
        assert!(store.is_member(&keys.admitted, "w").await.unwrap());

        store
            .add_member(&keys, "w", "{}", ttls(), 42)
            .await
            .unwrap();

        assert!(store.is_member(&keys.participants, "w").await.unwrap());
        assert!(!store.is_member(&keys.admitted, "w").await.unwrap());
        assert_eq!(store.hash_len(&keys.waiting).await.unwrap(), 0);
        assert!(store
            .is_member(&user_rooms_key("w"), "abc-def-ghi")
            .await
            .unwrap());
        assert_eq!(
            store
                .hash_get(&keys.room, "last_activity")
                .await
                .unwrap()
                .as_deref(),
            Some("42")
        );
    }

    #[tokio::test]
    async fn test_compare_and_swap() {
        let (_, store) = store();

        assert!(store.compare_and_swap("k", None, "v1", HOUR).await.unwrap());
        assert!(!store.compare_and_swap("k", None, "v2", HOUR).await.unwrap());
        assert!(!store
            .compare_and_swap("k", Some("stale"), "v2", HOUR)
            .await
            .unwrap());
        assert!(store
            .compare_and_swap("k", Some("v1"), "v2", HOUR)
            .await
            .unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn test_add_member_extends_settings_ttl() {
        let (clock, store) = store();
        let keys = keys();
        store
            .create_room_if_absent(&keys, &room_fields(1), "{\"locked\":true}", HOUR)
            .await
            .unwrap();

        clock.advance(Duration::from_secs(50 * 60));
        store.add_member(&keys, "a", "{}", ttls(), 2).await.unwrap();
        clock.advance(Duration::from_secs(20 * 60));

        assert!(!store.hash_get_all(&keys.room).await.unwrap().is_empty());
        assert_eq!(
            store.get(&keys.settings).await.unwrap().as_deref(),
            Some("{\"locked\":true}")
        );
    }

    #[tokio::test]
    async fn test_touch_member_restores_expired_records() {
        let (clock, store) = store();
        let keys = keys();
        store
            .create_room_if_absent(&keys, &room_fields(1), "{}", HOUR)
            .await
            .unwrap();
        store.add_member(&keys, "a", "{\"v\":1}", ttls(), 2).await.unwrap();

        clock.advance(HOUR + Duration::from_secs(60));
        assert_eq!(store.get(&keys.participant("a")).await.unwrap(), None);
        assert!(store.set_members(&user_rooms_key("a")).await.unwrap().is_empty());

        assert!(store
            .touch_member(&keys, "a", "{\"v\":2}", ttls(), 99)
            .await
            .unwrap());
        assert_eq!(
            store.get(&keys.participant("a")).await.unwrap().as_deref(),
            Some("{\"v\":2}")
        );
        assert!(store
            .is_member(&user_rooms_key("a"), "abc-def-ghi")
            .await
            .unwrap());
        assert_eq!(
            store
                .hash_get(&keys.room, "last_activity")
                .await
                .unwrap()
                .as_deref(),
            Some("99")
        );

        // A live record is extended, not overwritten
        assert!(store
            .touch_member(&keys, "a", "{\"v\":3}", ttls(), 100)
            .await
            .unwrap());
        assert_eq!(
            store.get(&keys.participant("a")).await.unwrap().as_deref(),
            Some("{\"v\":2}")
        );
    }

    #[tokio::test]
    async fn test_touch_member_ignores_non_members() {
        let (_, store) = store();
        let keys = keys();
        store
            .create_room_if_absent(&keys, &room_fields(1), "{}", HOUR)
            .await
            .unwrap();
        let before = store.key_count().unwrap();

        assert!(!store
            .touch_member(&keys, "ghost", "{}", ttls(), 5)
            .await
            .unwrap());
        assert_eq!(store.key_count().unwrap(), before);
        assert!(store.set_members(&user_rooms_key("ghost")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_last_member_reaps_once() {
        let (_, store) = store();
        let keys = keys();
        store
            .create_room_if_absent(&keys, &room_fields(1), "{}", HOUR)
            .await
            .unwrap();
        store.add_member(&keys, "a", "{}", ttls(), 2).await.unwrap();
        store.add_member(&keys, "b", "{}", ttls(), 3).await.unwrap();

        let first = store.remove_member(&keys, "a").await.unwrap();
        assert!(first.removed);
        assert!(first.reaped.is_none());

        let second = store.remove_member(&keys, "b").await.unwrap();
        assert!(second.removed);
        let reaped = second.reaped.unwrap();
        assert_eq!(reaped.get("host_id").map(String::as_str), Some("host"));

        let again = store.remove_member(&keys, "b").await.unwrap();
        assert_eq!(again, RemoveOutcome::default());
        assert_eq!(store.key_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stray_leave_does_not_reap_fresh_room() {
        let (_, store) = store();
        let keys = keys();
        store
            .create_room_if_absent(&keys, &room_fields(1), "{}", HOUR)
            .await
            .unwrap();

        let outcome = store.remove_member(&keys, "nobody").await.unwrap();
        assert!(!outcome.removed);
        assert!(outcome.reaped.is_none());
        assert!(!store.hash_get_all(&keys.room).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_leaves_reap_exactly_once() {
        let (_, store) = store();
        let store = Arc::new(store);
        let keys = keys();
        store
            .create_room_if_absent(&keys, &room_fields(1), "{}", HOUR)
            .await
            .unwrap();
        store.add_member(&keys, "solo", "{}", ttls(), 2).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = Arc::clone(&store);
            let keys = keys.clone();
            handles.push(tokio::spawn(async move {
                store.remove_member(&keys, "solo").await.unwrap()
            }));
        }

        let mut reaps = 0;
        for handle in handles {
            if handle.await.unwrap().reaped.is_some() {
                reaps += 1;
            }
        }
        assert_eq!(reaps, 1);
    }

    #[tokio::test]
    async fn test_reap_if_stale_respects_cutoff_and_members() {
        let (_, store) = store();
        let keys = keys();
        store
            .create_room_if_absent(&keys, &room_fields(100), "{}", HOUR)
            .await
            .unwrap();

        // Not old enough
        assert!(store.reap_if_stale(&keys, 100).await.unwrap().is_none());

        store.add_member(&keys, "a", "{}", ttls(), 2).await.unwrap();
        // Occupied
        assert!(store.reap_if_stale(&keys, 1_000).await.unwrap().is_none());

        store.remove_from_set(&keys.participants, "a").await.unwrap();
        let reaped = store.reap_if_stale(&keys, 1_000).await.unwrap();
        assert!(reaped.is_some());
        assert!(store.reap_if_stale(&keys, 1_000).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_enqueue_rejects_members_and_missing_rooms() {
        let (_, store) = store();
        let keys = keys();

        assert_eq!(
            store.enqueue_waiting(&keys, "w", "{}", HOUR).await.unwrap(),
            Enqueue::RoomMissing
        );

        store
            .create_room_if_absent(&keys, &room_fields(1), "{}", HOUR)
            .await
            .unwrap();
        store.add_member(&keys, "m", "{}", ttls(), 2).await.unwrap();

        assert_eq!(
            store.enqueue_waiting(&keys, "m", "{}", HOUR).await.unwrap(),
            Enqueue::AlreadyMember
        );
        assert_eq!(
            store.enqueue_waiting(&keys, "w1", "{}", HOUR).await.unwrap(),
            Enqueue::Queued(1)
        );
        assert_eq!(
            store.enqueue_waiting(&keys, "w2", "{}", HOUR).await.unwrap(),
            Enqueue::Queued(2)
        );
        assert!(store
            .is_member(&user_waiting_key("w1"), "abc-def-ghi")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_dequeue_reject_does_not_admit() {
        let (_, store) = store();
        let keys = keys();
        store
            .create_room_if_absent(&keys, &room_fields(1), "{}", HOUR)
            .await
            .unwrap();
        store
            .enqueue_waiting(&keys, "w", "{\"userId\":\"w\"}", HOUR)
            .await
            .unwrap();

        let entry = store.dequeue_waiting(&keys, "w", false, HOUR).await.unwrap();
        assert_eq!(entry.as_deref(), Some("{\"userId\":\"w\"}"));
        assert!(!store.is_member(&keys.admitted, "w").await.unwrap());
        assert!(!store
            .is_member(&user_waiting_key("w"), "abc-def-ghi")
            .await
            .unwrap());

        assert!(store
            .dequeue_waiting(&keys, "w", false, HOUR)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_room_expires_with_ttl() {
        let (clock, store) = store();
        let keys = keys();
        store
            .create_room_if_absent(&keys, &room_fields(1), "{}", HOUR)
            .await
            .unwrap();

        clock.advance(HOUR + Duration::from_secs(1));
        assert!(store.hash_get_all(&keys.room).await.unwrap().is_empty());
        assert_eq!(
            store.add_member(&keys, "late", "{}", ttls(), 9).await.unwrap(),
            AddMember::RoomMissing
        );
    }
}
