//! Redis-backed session store.
//!
//! # Connection Pattern
//!
//! The redis-rs `MultiplexedConnection` is cheap to clone and safe to use
//! concurrently, so every operation clones it instead of locking.
//!
//! Compound membership operations are precompiled Lua scripts (see
//! [`super::lua_scripts`]) so Redis executes each atomically.

use super::lua_scripts;
use super::{
    user_rooms_key, user_waiting_key, AddMember, Enqueue, RemoveOutcome, RoomKeys, SessionStore,
    Ttls,
};
use crate::errors::StoreError;
use crate::observability::metrics;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, RedisError, Script};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, error, instrument, warn};

/// Session store backed by Redis.
#[derive(Clone)]
pub struct RedisSessionStore {
    connection: MultiplexedConnection,
    create_room_script: Script,
    add_member_script: Script,
    touch_member_script: Script,
    compare_and_swap_script: Script,
    remove_member_script: Script,
    reap_if_stale_script: Script,
    enqueue_waiting_script: Script,
    dequeue_waiting_script: Script,
}

impl RedisSessionStore {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the URL is invalid or the
    /// connection fails.
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = Client::open(redis_url).map_err(|e| {
            // Do NOT log redis_url, it may contain credentials
            error!(target: "room.store", error = %e, "Failed to open Redis client");
            StoreError::Unavailable(format!("Failed to open Redis client: {e}"))
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                error!(target: "room.store", error = %e, "Failed to connect to Redis");
                StoreError::Unavailable(format!("Failed to connect to Redis: {e}"))
            })?;

        Ok(Self {
            connection,
            create_room_script: Script::new(lua_scripts::CREATE_ROOM_IF_ABSENT),
            add_member_script: Script::new(lua_scripts::ADD_MEMBER),
            touch_member_script: Script::new(lua_scripts::TOUCH_MEMBER),
            compare_and_swap_script: Script::new(lua_scripts::COMPARE_AND_SWAP),
            remove_member_script: Script::new(lua_scripts::REMOVE_MEMBER),
            reap_if_stale_script: Script::new(lua_scripts::REAP_IF_STALE),
            enqueue_waiting_script: Script::new(lua_scripts::ENQUEUE_WAITING),
            dequeue_waiting_script: Script::new(lua_scripts::DEQUEUE_WAITING),
        })
    }

    fn conn(&self) -> MultiplexedConnection {
        self.connection.clone()
    }
}

fn store_error(operation: &'static str) -> impl Fn(RedisError) -> StoreError {
    move |e| {
        warn!(target: "room.store", error = %e, operation, "Redis operation failed");
        if e.is_connection_dropped() || e.is_connection_refusal() || e.is_io_error() {
            StoreError::Unavailable(format!("{operation}: {e}"))
        } else {
            StoreError::Command(format!("{operation}: {e}"))
        }
    }
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

/// Decode a flat `[field, value, ...]` array.
fn pairs_to_map(flat: Vec<String>) -> HashMap<String, String> {
    let mut map = HashMap::with_capacity(flat.len() / 2);
    let mut iter = flat.into_iter();
    while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
        map.insert(field, value);
    }
    map
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(store_error("ping"))?;
        Ok(())
    }

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let start = Instant::now();
        let mut conn = self.conn();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl_secs(ttl));
        }
        let _: () = cmd.query_async(&mut conn).await.map_err(store_error("put"))?;
        metrics::record_store_operation("put", start.elapsed());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let start = Instant::now();
        let mut conn = self.conn();
        let value: Option<String> = conn.get(key).await.map_err(store_error("get"))?;
        metrics::record_store_operation("get", start.elapsed());
        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        let deleted: i64 = conn.del(key).await.map_err(store_error("delete"))?;
        Ok(deleted > 0)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        let applied: i64 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl_secs(ttl))
            .query_async(&mut conn)
            .await
            .map_err(store_error("expire"))?;
        Ok(applied == 1)
    }

    async fn add_to_set(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        let added: i64 = conn.sadd(key, member).await.map_err(store_error("sadd"))?;
        Ok(added > 0)
    }

    async fn remove_from_set(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        let removed: i64 = conn.srem(key, member).await.map_err(store_error("srem"))?;
        Ok(removed > 0)
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let start = Instant::now();
        let mut conn = self.conn();
        let members: Vec<String> = conn.smembers(key).await.map_err(store_error("smembers"))?;
        metrics::record_store_operation("set_members", start.elapsed());
        Ok(members)
    }

    async fn set_size(&self, key: &str) -> Result<usize, StoreError> {
        let mut conn = self.conn();
        let size: usize = conn.scard(key).await.map_err(store_error("scard"))?;
        Ok(size)
    }

    async fn is_member(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        let present: bool = conn
            .sismember(key, member)
            .await
            .map_err(store_error("sismember"))?;
        Ok(present)
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let _: i64 = conn
            .hset(key, field, value)
            .await
            .map_err(store_error("hset"))?;
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn();
        let value: Option<String> = conn.hget(key, field).await.map_err(store_error("hget"))?;
        Ok(value)
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let start = Instant::now();
        let mut conn = self.conn();
        let map: HashMap<String, String> =
            conn.hgetall(key).await.map_err(store_error("hgetall"))?;
        metrics::record_store_operation("hash_get_all", start.elapsed());
        Ok(map)
    }

    async fn hash_delete(&self, key: &str, field: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        let removed: i64 = conn.hdel(key, field).await.map_err(store_error("hdel"))?;
        Ok(removed > 0)
    }

    async fn hash_len(&self, key: &str) -> Result<usize, StoreError> {
        let mut conn = self.conn();
        let len: usize = conn.hlen(key).await.map_err(store_error("hlen"))?;
        Ok(len)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let start = Instant::now();
        let mut conn = self.conn();

        let written: i64 = self
            .compare_and_swap_script
            .key(key)
            .arg(if expected.is_some() { "1" } else { "0" })
            .arg(expected.unwrap_or_default())
            .arg(value)
            .arg(ttl_secs(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(store_error("compare_and_swap"))?;

        metrics::record_store_operation("compare_and_swap", start.elapsed());
        Ok(written == 1)
    }

    #[instrument(skip_all, fields(room_code = %keys.code))]
    async fn create_room_if_absent(
        &self,
        keys: &RoomKeys,
        fields: &[(String, String)],
        settings_json: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let start = Instant::now();
        let mut conn = self.conn();

        let mut invocation = self.create_room_script.prepare_invoke();
        invocation
            .key(&keys.room)
            .key(&keys.settings)
            .arg(ttl_secs(ttl))
            .arg(settings_json);
        for (field, value) in fields {
            invocation.arg(field).arg(value);
        }

        let created: i64 = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(store_error("create_room_if_absent"))?;

        metrics::record_store_operation("create_room_if_absent", start.elapsed());
        debug!(target: "room.store", room_code = %keys.code, created = created == 1, "Create room if absent");
        Ok(created == 1)
    }

    #[instrument(skip_all, fields(room_code = %keys.code, user_id = %user_id))]
    async fn add_member(
        &self,
        keys: &RoomKeys,
        user_id: &str,
        participant_json: &str,
        ttls: Ttls,
        now_ms: i64,
    ) -> Result<AddMember, StoreError> {
        let start = Instant::now();
        let mut conn = self.conn();

        let result: i64 = self
            .add_member_script
            .key(&keys.room)
            .key(&keys.participants)
            .key(keys.participant(user_id))
            .key(user_rooms_key(user_id))
            .key(&keys.waiting)
            .key(user_waiting_key(user_id))
            .key(&keys.admitted)
            .key(&keys.settings)
            .arg(user_id)
            .arg(participant_json)
            .arg(ttl_secs(ttls.room))
            .arg(ttl_secs(ttls.participant))
            .arg(now_ms)
            .arg(keys.code.as_str())
            .invoke_async(&mut conn)
            .await
            .map_err(store_error("add_member"))?;

        metrics::record_store_operation("add_member", start.elapsed());

        Ok(if result == 1 {
            AddMember::Added
        } else {
            AddMember::RoomMissing
        })
    }

    #[instrument(skip_all, fields(room_code = %keys.code, user_id = %user_id))]
    async fn touch_member(
        &self,
        keys: &RoomKeys,
        user_id: &str,
        participant_json: &str,
        ttls: Ttls,
        now_ms: i64,
    ) -> Result<bool, StoreError> {
        let start = Instant::now();
        let mut conn = self.conn();

        let result: i64 = self
            .touch_member_script
            .key(&keys.room)
            .key(&keys.participants)
            .key(keys.participant(user_id))
            .key(user_rooms_key(user_id))
            .key(&keys.settings)
            .arg(user_id)
            .arg(participant_json)
            .arg(ttl_secs(ttls.room))
            .arg(ttl_secs(ttls.participant))
            .arg(now_ms)
            .arg(keys.code.as_str())
            .invoke_async(&mut conn)
            .await
            .map_err(store_error("touch_member"))?;

        metrics::record_store_operation("touch_member", start.elapsed());
        Ok(result == 1)
    }

    #[instrument(skip_all, fields(room_code = %keys.code, user_id = %user_id))]
    async fn remove_member(
        &self,
        keys: &RoomKeys,
        user_id: &str,
    ) -> Result<RemoveOutcome, StoreError> {
        let start = Instant::now();
        let mut conn = self.conn();

        let flat: Vec<String> = self
            .remove_member_script
            .key(&keys.room)
            .key(&keys.participants)
            .key(keys.participant(user_id))
            .key(user_rooms_key(user_id))
            .key(&keys.settings)
            .key(&keys.waiting)
            .key(&keys.admitted)
            .arg(user_id)
            .arg(keys.code.as_str())
            .invoke_async(&mut conn)
            .await
            .map_err(store_error("remove_member"))?;

        metrics::record_store_operation("remove_member", start.elapsed());

        let mut iter = flat.into_iter();
        let removed = iter.next().as_deref() == Some("1");
        let reaped = iter.next().as_deref() == Some("1");

        Ok(RemoveOutcome {
            removed,
            reaped: reaped.then(|| pairs_to_map(iter.collect())),
        })
    }

    #[instrument(skip_all, fields(room_code = %keys.code))]
    async fn reap_if_stale(
        &self,
        keys: &RoomKeys,
        cutoff_ms: i64,
    ) -> Result<Option<HashMap<String, String>>, StoreError> {
        let start = Instant::now();
        let mut conn = self.conn();

        let flat: Vec<String> = self
            .reap_if_stale_script
            .key(&keys.room)
            .key(&keys.participants)
            .key(&keys.settings)
            .key(&keys.waiting)
            .key(&keys.admitted)
            .arg(cutoff_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(store_error("reap_if_stale"))?;

        metrics::record_store_operation("reap_if_stale", start.elapsed());

        if flat.is_empty() {
            Ok(None)
        } else {
            Ok(Some(pairs_to_map(flat)))
        }
    }

    #[instrument(skip_all, fields(room_code = %keys.code, user_id = %user_id))]
    async fn enqueue_waiting(
        &self,
        keys: &RoomKeys,
        user_id: &str,
        entry_json: &str,
        ttl: Duration,
    ) -> Result<Enqueue, StoreError> {
        let mut conn = self.conn();

        let result: i64 = self
            .enqueue_waiting_script
            .key(&keys.room)
            .key(&keys.participants)
            .key(&keys.waiting)
            .key(user_waiting_key(user_id))
            .arg(user_id)
            .arg(entry_json)
            .arg(ttl_secs(ttl))
            .arg(keys.code.as_str())
            .invoke_async(&mut conn)
            .await
            .map_err(store_error("enqueue_waiting"))?;

        match result {
            -1 => Ok(Enqueue::RoomMissing),
            -2 => Ok(Enqueue::AlreadyMember),
            n if n > 0 => Ok(Enqueue::Queued(usize::try_from(n).unwrap_or(usize::MAX))),
            other => {
                error!(target: "room.store", result = other, "Unexpected enqueue result");
                Err(StoreError::Command(format!(
                    "enqueue_waiting: unexpected result {other}"
                )))
            }
        }
    }

    #[instrument(skip_all, fields(room_code = %keys.code, user_id = %user_id, admit = admit))]
    async fn dequeue_waiting(
        &self,
        keys: &RoomKeys,
        user_id: &str,
        admit: bool,
        ttl: Duration,
    ) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn();

        let entry: Option<String> = self
            .dequeue_waiting_script
            .key(&keys.waiting)
            .key(user_waiting_key(user_id))
            .key(&keys.admitted)
            .arg(user_id)
            .arg(keys.code.as_str())
            .arg(if admit { "1" } else { "0" })
            .arg(ttl_secs(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(store_error("dequeue_waiting"))?;

        Ok(entry)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::types::RoomCode;
    use std::sync::Arc;

    const HOUR: Duration = Duration::from_secs(3_600);

    fn ttls() -> Ttls {
        Ttls {
            room: Duration::from_secs(86_400),
            participant: HOUR,
        }
    }

    /// Connects to `REDIS_URL`; each test works on a freshly generated room
    /// code so runs do not interfere.
    async fn connect() -> (RedisSessionStore, RoomKeys) {
        let url = std::env::var("REDIS_URL").expect("REDIS_URL must be set");
        let store = RedisSessionStore::connect(&url).await.unwrap();
        let keys = RoomKeys::new(&RoomCode::generate().unwrap());
        (store, keys)
    }

    fn room_fields(created_at: i64) -> Vec<(String, String)> {
        vec![
            ("host_id".to_string(), "host".to_string()),
            ("created_at".to_string(), created_at.to_string()),
        ]
    }

    async fn create(store: &RedisSessionStore, keys: &RoomKeys, created_at: i64) {
        assert!(store
            .create_room_if_absent(keys, &room_fields(created_at), "{}", HOUR)
            .await
            .unwrap());
    }

    async fn ttl_of(store: &RedisSessionStore, key: &str) -> i64 {
        let mut conn = store.conn();
        redis::cmd("TTL").arg(key).query_async(&mut conn).await.unwrap()
    }

    #[test]
    fn test_pairs_to_map() {
        let map = pairs_to_map(vec![
            "host_id".to_string(),
            "u1".to_string(),
            "created_at".to_string(),
            "100".to_string(),
        ]);
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("host_id").map(String::as_str), Some("u1"));
        assert_eq!(map.get("created_at").map(String::as_str), Some("100"));
    }

    #[test]
    fn test_pairs_to_map_ignores_trailing_field() {
        let map = pairs_to_map(vec!["lonely".to_string()]);
        assert!(map.is_empty());
    }

    #[test]
    fn test_ttl_secs_never_zero() {
        assert_eq!(ttl_secs(Duration::from_millis(10)), 1);
        assert_eq!(ttl_secs(Duration::from_secs(3600)), 3600);
    }

    #[tokio::test]
    #[ignore = "requires REDIS_URL"]
    async fn test_create_room_if_absent_single_winner() {
        let (store, keys) = connect().await;

        create(&store, &keys, 1).await;
        assert!(!store
            .create_room_if_absent(&keys, &room_fields(2), "{}", HOUR)
            .await
            .unwrap());

        let room = store.hash_get_all(&keys.room).await.unwrap();
        assert_eq!(room.get("created_at").map(String::as_str), Some("1"));
        assert!(store.get(&keys.settings).await.unwrap().is_some());

        store.remove_member(&keys, "nobody").await.unwrap();
        assert!(store.reap_if_stale(&keys, i64::MAX).await.unwrap().is_some());
    }

    #[tokio::test]
    #[ignore = "requires REDIS_URL"]
    async fn test_add_member_clears_waiting_state_and_extends_ttls() {
        let (store, keys) = connect().await;
        create(&store, &keys, 1).await;

        assert_eq!(
            store.add_member(&keys, "u1", "{}", ttls(), 5).await.unwrap(),
            AddMember::Added
        );
        assert_eq!(
            store.enqueue_waiting(&keys, "w", "{}", HOUR).await.unwrap(),
            Enqueue::Queued(1)
        );
        assert!(store
            .dequeue_waiting(&keys, "w", true, HOUR)
            .await
            .unwrap()
            .is_some());
        assert!(store.is_member(&keys.admitted, "w").await.unwrap());

        store.add_member(&keys, "w", "{}", ttls(), 42).await.unwrap();

        assert!(!store.is_member(&keys.admitted, "w").await.unwrap());
        assert_eq!(store.hash_len(&keys.waiting).await.unwrap(), 0);
        assert!(store
            .is_member(&user_rooms_key("w"), keys.code.as_str())
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
        // Room and settings move from the creation TTL to the room TTL
        assert!(ttl_of(&store, &keys.room).await > 3_600);
        assert!(ttl_of(&store, &keys.settings).await > 3_600);

        store.remove_member(&keys, "u1").await.unwrap();
        let outcome = store.remove_member(&keys, "w").await.unwrap();
        assert!(outcome.reaped.is_some());
    }

    #[tokio::test]
    #[ignore = "requires REDIS_URL"]
    async fn test_add_member_requires_room() {
        let (store, keys) = connect().await;
        assert_eq!(
            store.add_member(&keys, "u1", "{}", ttls(), 5).await.unwrap(),
            AddMember::RoomMissing
        );
        assert_eq!(store.set_size(&keys.participants).await.unwrap(), 0);
    }

    #[tokio::test]
    #[ignore = "requires REDIS_URL"]
    async fn test_touch_member_restores_expired_record() {
        let (store, keys) = connect().await;
        create(&store, &keys, 1).await;
        store.add_member(&keys, "a", "{\"v\":1}", ttls(), 2).await.unwrap();

        // Simulate the participant TTL lapsing
        store.delete(&keys.participant("a")).await.unwrap();
        store.delete(&user_rooms_key("a")).await.unwrap();

        assert!(store
            .touch_member(&keys, "a", "{\"v\":2}", ttls(), 7)
            .await
            .unwrap());
        assert_eq!(
            store.get(&keys.participant("a")).await.unwrap().as_deref(),
            Some("{\"v\":2}")
        );
        assert!(store
            .is_member(&user_rooms_key("a"), keys.code.as_str())
            .await
            .unwrap());
        assert!(ttl_of(&store, &keys.participant("a")).await > 0);

        assert!(!store
            .touch_member(&keys, "ghost", "{}", ttls(), 8)
            .await
            .unwrap());
        assert_eq!(store.get(&keys.participant("ghost")).await.unwrap(), None);

        let outcome = store.remove_member(&keys, "a").await.unwrap();
        assert!(outcome.reaped.is_some());
    }

    #[tokio::test]
    #[ignore = "requires REDIS_URL"]
    async fn test_compare_and_swap() {
        let (store, keys) = connect().await;
        let key = keys.settings.clone();

        assert!(store.compare_and_swap(&key, None, "v1", HOUR).await.unwrap());
        assert!(!store.compare_and_swap(&key, None, "v2", HOUR).await.unwrap());
        assert!(!store
            .compare_and_swap(&key, Some("stale"), "v2", HOUR)
            .await
            .unwrap());
        assert!(store
            .compare_and_swap(&key, Some("v1"), "v2", HOUR)
            .await
            .unwrap());
        assert_eq!(store.get(&key).await.unwrap().as_deref(), Some("v2"));
        store.delete(&key).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires REDIS_URL"]
    async fn test_remove_last_member_reaps_once() {
        let (store, keys) = connect().await;
        create(&store, &keys, 1).await;
        store.add_member(&keys, "a", "{}", ttls(), 2).await.unwrap();
        store.add_member(&keys, "b", "{}", ttls(), 3).await.unwrap();

        let first = store.remove_member(&keys, "a").await.unwrap();
        assert!(first.removed);
        assert!(first.reaped.is_none());

        let second = store.remove_member(&keys, "b").await.unwrap();
        let reaped = second.reaped.unwrap();
        assert_eq!(reaped.get("host_id").map(String::as_str), Some("host"));

        assert_eq!(
            store.remove_member(&keys, "b").await.unwrap(),
            RemoveOutcome::default()
        );
        assert!(store.hash_get_all(&keys.room).await.unwrap().is_empty());
        assert_eq!(store.get(&keys.settings).await.unwrap(), None);
    }

    #[tokio::test]
    #[ignore = "requires REDIS_URL"]
    async fn test_stray_leave_does_not_reap_fresh_room() {
        let (store, keys) = connect().await;
        create(&store, &keys, 1).await;

        let outcome = store.remove_member(&keys, "nobody").await.unwrap();
        assert!(!outcome.removed);
        assert!(outcome.reaped.is_none());
        assert!(!store.hash_get_all(&keys.room).await.unwrap().is_empty());

        store.reap_if_stale(&keys, i64::MAX).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore = "requires REDIS_URL"]
    async fn test_concurrent_leaves_reap_exactly_once() {
        let (store, keys) = connect().await;
        let store = Arc::new(store);
        create(&store, &keys, 1).await;
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

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore = "requires REDIS_URL"]
    async fn test_concurrent_stale_reaps_exactly_once() {
        let (store, keys) = connect().await;
        let store = Arc::new(store);
        create(&store, &keys, 100).await;

        // Not old enough, then occupied
        assert!(store.reap_if_stale(&keys, 100).await.unwrap().is_none());
        store.add_member(&keys, "a", "{}", ttls(), 2).await.unwrap();
        assert!(store.reap_if_stale(&keys, 1_000).await.unwrap().is_none());
        store.remove_from_set(&keys.participants, "a").await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = Arc::clone(&store);
            let keys = keys.clone();
            handles.push(tokio::spawn(async move {
                store.reap_if_stale(&keys, 1_000).await.unwrap()
            }));
        }

        let mut reaps = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                reaps += 1;
            }
        }
        assert_eq!(reaps, 1);
        store.delete(&keys.participant("a")).await.unwrap();
        store.remove_from_set(&user_rooms_key("a"), keys.code.as_str()).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires REDIS_URL"]
    async fn test_waiting_queue() {
        let (store, keys) = connect().await;

        assert_eq!(
            store.enqueue_waiting(&keys, "w", "{}", HOUR).await.unwrap(),
            Enqueue::RoomMissing
        );
        create(&store, &keys, 1).await;
        store.add_member(&keys, "m", "{}", ttls(), 2).await.unwrap();

        assert_eq!(
            store.enqueue_waiting(&keys, "m", "{}", HOUR).await.unwrap(),
            Enqueue::AlreadyMember
        );
        assert_eq!(
            store
                .enqueue_waiting(&keys, "w1", "{\"userId\":\"w1\"}", HOUR)
                .await
                .unwrap(),
            Enqueue::Queued(1)
        );
        assert_eq!(
            store.enqueue_waiting(&keys, "w2", "{}", HOUR).await.unwrap(),
            Enqueue::Queued(2)
        );

        let entry = store.dequeue_waiting(&keys, "w1", false, HOUR).await.unwrap();
        assert_eq!(entry.as_deref(), Some("{\"userId\":\"w1\"}"));
        assert!(!store.is_member(&keys.admitted, "w1").await.unwrap());
        assert!(store
            .dequeue_waiting(&keys, "w1", false, HOUR)
            .await
            .unwrap()
            .is_none());
        store.dequeue_waiting(&keys, "w2", false, HOUR).await.unwrap();

        let outcome = store.remove_member(&keys, "m").await.unwrap();
        assert!(outcome.reaped.is_some());
    }
}
