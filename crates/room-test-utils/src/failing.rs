//! Failure-injecting wrappers.
//!
//! `FailingSessionStore` delegates to a real store until told to fail a
//! named operation (or all of them). It can also run a one-shot hook right
//! before the next call to an operation, which lets tests interleave a
//! competing writer at an exact point. `FailingHistoryLog` accepts creation
//! records and rejects every meeting-history write, counting attempts.

use async_trait::async_trait;
use futures::future::BoxFuture;
use room_service::errors::{HistoryError, StoreError};
use room_service::history::{HistoryLog, MeetingHistoryRecord, RoomRecord};
use room_service::store::{AddMember, Enqueue, RemoveOutcome, RoomKeys, SessionStore, Ttls};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Session store that fails on demand.
pub struct FailingSessionStore {
    inner: Arc<dyn SessionStore>,
    fail_all: AtomicBool,
    failing_ops: Mutex<HashSet<&'static str>>,
    hooks: Mutex<HashMap<&'static str, BoxFuture<'static, ()>>>,
}

impl FailingSessionStore {
    pub fn new(inner: Arc<dyn SessionStore>) -> Self {
        Self {
            inner,
            fail_all: AtomicBool::new(false),
            failing_ops: Mutex::new(HashSet::new()),
            hooks: Mutex::new(HashMap::new()),
        }
    }

    /// Fail every subsequent call to `op` (a `SessionStore` method name).
    pub fn fail(&self, op: &'static str) {
        self.failing_ops.lock().unwrap().insert(op);
    }

    /// Fail every operation.
    pub fn fail_everything(&self) {
        self.fail_all.store(true, Ordering::SeqCst);
    }

    /// Stop injecting failures.
    pub fn heal(&self) {
        self.fail_all.store(false, Ordering::SeqCst);
        self.failing_ops.lock().unwrap().clear();
    }

    /// Run `hook` to completion right before the next call to `op` reaches
    /// the inner store. Fires once.
    pub fn before_next(&self, op: &'static str, hook: BoxFuture<'static, ()>) {
        self.hooks.lock().unwrap().insert(op, hook);
    }

    async fn intercept(&self, op: &'static str) -> Result<(), StoreError> {
        let hook = self.hooks.lock().unwrap().remove(op);
        if let Some(hook) = hook {
            hook.await;
        }
        self.check(op)
    }

    fn check(&self, op: &'static str) -> Result<(), StoreError> {
        if self.fail_all.load(Ordering::SeqCst) || self.failing_ops.lock().unwrap().contains(op) {
            Err(StoreError::Unavailable(format!("injected failure in {op}")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SessionStore for FailingSessionStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.intercept("ping").await?;
        self.inner.ping().await
    }

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.intercept("put").await?;
        self.inner.put(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.intercept("get").await?;
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.intercept("delete").await?;
        self.inner.delete(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.intercept("expire").await?;
        self.inner.expire(key, ttl).await
    }

    async fn add_to_set(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        self.intercept("add_to_set").await?;
        self.inner.add_to_set(key, member).await
    }

    async fn remove_from_set(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        self.intercept("remove_from_set").await?;
        self.inner.remove_from_set(key, member).await
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        self.intercept("set_members").await?;
        self.inner.set_members(key).await
    }

    async fn set_size(&self, key: &str) -> Result<usize, StoreError> {
        self.intercept("set_size").await?;
        self.inner.set_size(key).await
    }

    async fn is_member(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        self.intercept("is_member").await?;
        self.inner.is_member(key, member).await
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        self.intercept("hash_set").await?;
        self.inner.hash_set(key, field, value).await
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        self.intercept("hash_get").await?;
        self.inner.hash_get(key, field).await
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        self.intercept("hash_get_all").await?;
        self.inner.hash_get_all(key).await
    }

    async fn hash_delete(&self, key: &str, field: &str) -> Result<bool, StoreError> {
        self.intercept("hash_delete").await?;
        self.inner.hash_delete(key, field).await
    }

    async fn hash_len(&self, key: &str) -> Result<usize, StoreError> {
        self.intercept("hash_len").await?;
        self.inner.hash_len(key).await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.intercept("compare_and_swap").await?;
        self.inner.compare_and_swap(key, expected, value, ttl).await
    }

    async fn create_room_if_absent(
        &self,
        keys: &RoomKeys,
        fields: &[(String, String)],
        settings_json: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.intercept("create_room_if_absent").await?;
        self.inner
            .create_room_if_absent(keys, fields, settings_json, ttl)
            .await
    }

    async fn add_member(
        &self,
        keys: &RoomKeys,
        user_id: &str,
        participant_json: &str,
        ttls: Ttls,
        now_ms: i64,
    ) -> Result<AddMember, StoreError> {
        self.intercept("add_member").await?;
        self.inner
            .add_member(keys, user_id, participant_json, ttls, now_ms)
            .await
    }

    async fn touch_member(
        &self,
        keys: &RoomKeys,
        user_id: &str,
        participant_json: &str,
        ttls: Ttls,
        now_ms: i64,
    ) -> Result<bool, StoreError> {
        self.intercept("touch_member").await?;
        self.inner
            .touch_member(keys, user_id, participant_json, ttls, now_ms)
            .await
    }

    async fn remove_member(
        &self,
        keys: &RoomKeys,
        user_id: &str,
    ) -> Result<RemoveOutcome, StoreError> {
        self.intercept("remove_member").await?;
        self.inner.remove_member(keys, user_id).await
    }

    async fn reap_if_stale(
        &self,
        keys: &RoomKeys,
        cutoff_ms: i64,
    ) -> Result<Option<HashMap<String, String>>, StoreError> {
        self.intercept("reap_if_stale").await?;
        self.inner.reap_if_stale(keys, cutoff_ms).await
    }

    async fn enqueue_waiting(
        &self,
        keys: &RoomKeys,
        user_id: &str,
        entry_json: &str,
        ttl: Duration,
    ) -> Result<Enqueue, StoreError> {
        self.intercept("enqueue_waiting").await?;
        self.inner
            .enqueue_waiting(keys, user_id, entry_json, ttl)
            .await
    }

    async fn dequeue_waiting(
        &self,
        keys: &RoomKeys,
        user_id: &str,
        admit: bool,
        ttl: Duration,
    ) -> Result<Option<String>, StoreError> {
        self.intercept("dequeue_waiting").await?;
        self.inner
            .dequeue_waiting(keys, user_id, admit, ttl)
            .await
    }
}

/// History log whose meeting-history writes always fail.
#[derive(Default)]
pub struct FailingHistoryLog {
    rooms: Mutex<Vec<RoomRecord>>,
    meeting_attempts: AtomicUsize,
}

impl FailingHistoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rejected meeting-history writes.
    pub fn meeting_attempts(&self) -> usize {
        self.meeting_attempts.load(Ordering::SeqCst)
    }

    pub fn rooms(&self) -> Vec<RoomRecord> {
        self.rooms.lock().unwrap().clone()
    }
}

#[async_trait]
impl HistoryLog for FailingHistoryLog {
    async fn record_room_created(&self, record: &RoomRecord) -> Result<(), HistoryError> {
        self.rooms.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn record_meeting_ended(
        &self,
        _record: &MeetingHistoryRecord,
    ) -> Result<(), HistoryError> {
        self.meeting_attempts.fetch_add(1, Ordering::SeqCst);
        Err(HistoryError::Database("injected failure".to_string()))
    }

    async fn history_for_room(
        &self,
        _room_code: &str,
    ) -> Result<Vec<MeetingHistoryRecord>, HistoryError> {
        Err(HistoryError::Database("injected failure".to_string()))
    }
}
