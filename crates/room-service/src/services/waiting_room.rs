//! Waiting Room Gate.
//!
//! Per (room, user): `NotWaiting -> Waiting -> {Admitted | Rejected | Disconnected}`.
//!
//! The queue is `room:{code}:waiting` (user -> entry JSON). Admission is
//! recorded in `room:{code}:admitted` and consumed by the next join. The
//! `user:{id}:waiting` index lets disconnect cleanup find a user's entries
//! without scanning rooms.

use crate::errors::{RoomError, StoreError};
use crate::store::{user_waiting_key, Enqueue, RoomKeys, SessionStore};
use common::clock::Clock;
use common::types::RoomCode;
use signaling_protocol::events::WaitingUser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Waiting room service.
pub struct WaitingRoomGate {
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    entry_ttl: Duration,
}

impl WaitingRoomGate {
    #[must_use]
    pub fn new(
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        entry_ttl: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            entry_ttl,
        }
    }

    /// Queue a user. Re-queuing replaces the previous entry.
    ///
    /// Returns the queue length afterwards.
    ///
    /// # Errors
    ///
    /// - `RoomError::RoomNotFound` - room does not exist
    /// - `RoomError::AlreadyInRoom` - user is already a member
    #[instrument(skip_all, fields(room_code = %code, user_id = %user_id))]
    pub async fn enqueue(
        &self,
        code: &RoomCode,
        user_id: &str,
        display_name: &str,
        avatar: Option<String>,
    ) -> Result<(WaitingUser, usize), RoomError> {
        let entry = WaitingUser {
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            joined_at: self.clock.now_ms(),
            avatar,
        };
        let json = serde_json::to_string(&entry)
            .map_err(|e| RoomError::Internal(format!("failed to encode waiting entry: {e}")))?;

        match self
            .store
            .enqueue_waiting(&RoomKeys::new(code), user_id, &json, self.entry_ttl)
            .await?
        {
            Enqueue::Queued(count) => {
                debug!(target: "room.waiting", room_code = %code, user_id = %user_id, waiting_count = count, "User queued");
                Ok((entry, count))
            }
            Enqueue::RoomMissing => Err(RoomError::RoomNotFound(code.to_string())),
            Enqueue::AlreadyMember => Err(RoomError::AlreadyInRoom),
        }
    }

    /// Admit a waiting user; the admission is consumed by their next join.
    ///
    /// # Errors
    ///
    /// Returns `RoomError::UserNotWaiting` if the user is not queued.
    #[instrument(skip_all, fields(room_code = %code, user_id = %user_id))]
    pub async fn admit(&self, code: &RoomCode, user_id: &str) -> Result<WaitingUser, RoomError> {
        self.dequeue(code, user_id, true).await
    }

    /// Reject a waiting user.
    ///
    /// # Errors
    ///
    /// Returns `RoomError::UserNotWaiting` if the user is not queued.
    #[instrument(skip_all, fields(room_code = %code, user_id = %user_id))]
    pub async fn reject(&self, code: &RoomCode, user_id: &str) -> Result<WaitingUser, RoomError> {
        self.dequeue(code, user_id, false).await
    }

    /// Queued users, oldest first.
    pub async fn waiting_users(&self, code: &RoomCode) -> Result<Vec<WaitingUser>, RoomError> {
        let entries = self
            .store
            .hash_get_all(&RoomKeys::new(code).waiting)
            .await?;

        let mut users = Vec::with_capacity(entries.len());
        for (user_id, json) in entries {
            match serde_json::from_str::<WaitingUser>(&json) {
                Ok(user) => users.push(user),
                Err(e) => {
                    warn!(target: "room.waiting", room_code = %code, user_id = %user_id, error = %e, "Skipping malformed waiting entry");
                }
            }
        }
        users.sort_by(|a, b| {
            a.joined_at
                .cmp(&b.joined_at)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        Ok(users)
    }

    pub async fn waiting_count(&self, code: &RoomCode) -> Result<usize, RoomError> {
        Ok(self.store.hash_len(&RoomKeys::new(code).waiting).await?)
    }

    pub async fn is_waiting(&self, code: &RoomCode, user_id: &str) -> Result<bool, RoomError> {
        Ok(self
            .store
            .hash_get(&RoomKeys::new(code).waiting, user_id)
            .await?
            .is_some())
    }

    /// Whether the host has admitted the user and they have not joined yet.
    pub async fn is_admitted(&self, code: &RoomCode, user_id: &str) -> Result<bool, RoomError> {
        Ok(self
            .store
            .is_member(&RoomKeys::new(code).admitted, user_id)
            .await?)
    }

    /// Drop every waiting entry held by a user. Returns the rooms whose queue
    /// changed.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn remove_user_everywhere(&self, user_id: &str) -> Result<Vec<RoomCode>, RoomError> {
        let index = user_waiting_key(user_id);
        let rooms = self.store.set_members(&index).await?;
        let mut changed = Vec::new();

        for raw in rooms {
            let Ok(code) = RoomCode::parse(&raw) else {
                self.store.remove_from_set(&index, &raw).await?;
                continue;
            };
            let removed = self
                .store
                .dequeue_waiting(&RoomKeys::new(&code), user_id, false, self.entry_ttl)
                .await?;
            if removed.is_some() {
                debug!(target: "room.waiting", room_code = %code, user_id = %user_id, "Removed waiting entry on disconnect");
                changed.push(code);
            }
        }

        Ok(changed)
    }

    async fn dequeue(
        &self,
        code: &RoomCode,
        user_id: &str,
        admit: bool,
    ) -> Result<WaitingUser, RoomError> {
        let entry = self
            .store
            .dequeue_waiting(&RoomKeys::new(code), user_id, admit, self.entry_ttl)
            .await?
            .ok_or_else(|| RoomError::UserNotWaiting(user_id.to_string()))?;

        debug!(target: "room.waiting", room_code = %code, user_id = %user_id, admitted = admit, "User dequeued");

        serde_json::from_str(&entry).map_err(|e| {
            RoomError::Store(StoreError::Corrupt(format!("waiting entry for {user_id}: {e}")))
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::history::MemoryHistoryLog;
    use crate::services::room_lifecycle::{CreateRoomOptions, JoinRequest, RoomLifecycle};
    use crate::store::{MemorySessionStore, Ttls};
    use common::clock::ManualClock;

    const HOUR: Duration = Duration::from_secs(3_600);

    struct Fixture {
        clock: Arc<ManualClock>,
        lifecycle: RoomLifecycle,
        gate: WaitingRoomGate,
    }

    async fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(5_000));
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new(clock.clone()));
        let lifecycle = RoomLifecycle::new(
            store.clone(),
            Arc::new(MemoryHistoryLog::new()),
            clock.clone(),
            Ttls {
                room: Duration::from_secs(86_400),
                participant: HOUR,
            },
            HOUR,
            50,
        );
        lifecycle
            .create_room(&code(), "host", CreateRoomOptions::default())
            .await
            .unwrap();
        let gate = WaitingRoomGate::new(store, clock.clone(), HOUR);
        Fixture {
            clock,
            lifecycle,
            gate,
        }
    }

    fn code() -> RoomCode {
        RoomCode::parse("abc-def-ghi").unwrap()
    }

    #[tokio::test]
    async fn test_enqueue_and_list_in_order() {
        let f = fixture().await;

        let (_, count) = f.gate.enqueue(&code(), "w1", "One", None).await.unwrap();
        assert_eq!(count, 1);
        f.clock.advance(Duration::from_secs(1));
        let (entry, count) = f
            .gate
            .enqueue(&code(), "w2", "Two", Some("a.png".to_string()))
            .await
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(entry.avatar.as_deref(), Some("a.png"));

        let users = f.gate.waiting_users(&code()).await.unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].user_id, "w1");
        assert_eq!(users[1].user_id, "w2");
    }

    #[tokio::test]
    async fn test_requeue_keeps_single_entry() {
        let f = fixture().await;
        f.gate.enqueue(&code(), "w", "W", None).await.unwrap();
        let (_, count) = f.gate.enqueue(&code(), "w", "W", None).await.unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_admit_records_admission_and_join_consumes_it() {
        let f = fixture().await;
        f.gate.enqueue(&code(), "w", "W", None).await.unwrap();

        let admitted = f.gate.admit(&code(), "w").await.unwrap();
        assert_eq!(admitted.user_id, "w");
        assert!(f.gate.is_admitted(&code(), "w").await.unwrap());
        assert_eq!(f.gate.waiting_count(&code()).await.unwrap(), 0);

        f.lifecycle
            .join_room(
                &code(),
                &JoinRequest {
                    user_id: "w".to_string(),
                    display_name: "W".to_string(),
                    audio_enabled: true,
                    video_enabled: true,
                },
            )
            .await
            .unwrap();
        assert!(!f.gate.is_admitted(&code(), "w").await.unwrap());
        assert!(!f.gate.is_waiting(&code(), "w").await.unwrap());
    }

    #[tokio::test]
    async fn test_admit_or_reject_unknown_user() {
        let f = fixture().await;
        assert!(matches!(
            f.gate.admit(&code(), "ghost").await,
            Err(RoomError::UserNotWaiting(_))
        ));

        f.gate.enqueue(&code(), "w", "W", None).await.unwrap();
        f.gate.reject(&code(), "w").await.unwrap();
        // Double-click
        assert!(matches!(
            f.gate.reject(&code(), "w").await,
            Err(RoomError::UserNotWaiting(_))
        ));
        assert!(!f.gate.is_admitted(&code(), "w").await.unwrap());
    }

    #[tokio::test]
    async fn test_enqueue_member_or_missing_room() {
        let f = fixture().await;
        f.lifecycle
            .join_room(
                &code(),
                &JoinRequest {
                    user_id: "m".to_string(),
                    display_name: "M".to_string(),
                    audio_enabled: true,
                    video_enabled: true,
                },
            )
            .await
            .unwrap();

        assert!(matches!(
            f.gate.enqueue(&code(), "m", "M", None).await,
            Err(RoomError::AlreadyInRoom)
        ));

        let other = RoomCode::parse("zzz-zzz-zzz").unwrap();
        assert!(matches!(
            f.gate.enqueue(&other, "w", "W", None).await,
            Err(RoomError::RoomNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_user_everywhere_uses_index() {
        let f = fixture().await;
        let second = RoomCode::parse("bbb-bbb-bbb").unwrap();
        f.lifecycle
            .create_room(&second, "host2", CreateRoomOptions::default())
            .await
            .unwrap();

        f.gate.enqueue(&code(), "w", "W", None).await.unwrap();
        f.gate.enqueue(&second, "w", "W", None).await.unwrap();
        f.gate.enqueue(&second, "x", "X", None).await.unwrap();

        let mut changed = f.gate.remove_user_everywhere("w").await.unwrap();
        changed.sort();
        assert_eq!(changed, vec![code(), second.clone()]);
        assert_eq!(f.gate.waiting_count(&code()).await.unwrap(), 0);
        assert_eq!(f.gate.waiting_count(&second).await.unwrap(), 1);

        assert!(f.gate.remove_user_everywhere("w").await.unwrap().is_empty());
    }
}
