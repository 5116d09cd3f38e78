//! Room Lifecycle Manager.
//!
//! Creates rooms, resolves host identity, reclaims abandoned rooms and tears
//! down empty ones. Every room lifetime ends with exactly one durable
//! meeting-history record.
//!
//! # Concurrency
//!
//! No in-process lock is held across store calls. Membership changes and the
//! "room became empty" transition are atomic in the session store; the
//! history write is performed only by the caller the store reports as the
//! reaper.

use crate::errors::RoomError;
use crate::history::{HistoryLog, MeetingHistoryRecord, ReapReason, RoomRecord};
use crate::models::room::ms_to_datetime;
use crate::models::{RoomMeta, RoomSettings};
use crate::observability::metrics;
use crate::store::{user_rooms_key, AddMember, RoomKeys, SessionStore, Ttls};
use chrono::{DateTime, Utc};
use common::clock::Clock;
use common::types::RoomCode;
use signaling_protocol::events::{Participant, ParticipantStatePatch};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Upper bound on create/reclaim/add retries within one join.
const MAX_JOIN_ATTEMPTS: usize = 5;

/// Optional attributes for a new room.
#[derive(Debug, Clone, Default)]
pub struct CreateRoomOptions {
    pub name: Option<String>,
    pub scheduled_time: Option<DateTime<Utc>>,
    /// Initial settings; defaults when absent.
    pub settings: Option<RoomSettings>,
}

/// A join request after policy checks have passed.
#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub user_id: String,
    pub display_name: String,
    pub audio_enabled: bool,
    pub video_enabled: bool,
}

/// Result of [`RoomLifecycle::join_room`].
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    /// The joiner's own record.
    pub participant: Participant,
    /// Every current member, the joiner included.
    pub participants: Vec<Participant>,
    /// This join created the room.
    pub created: bool,
}

/// Result of [`RoomLifecycle::leave_room`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LeaveOutcome {
    /// The user was a member.
    pub removed: bool,
    /// This leave emptied and deleted the room.
    pub reaped: bool,
}

/// Room lifecycle service.
pub struct RoomLifecycle {
    store: Arc<dyn SessionStore>,
    history: Arc<dyn HistoryLog>,
    clock: Arc<dyn Clock>,
    ttls: Ttls,
    stale_after: Duration,
    default_max_participants: u32,
}

impl RoomLifecycle {
    #[must_use]
    pub fn new(
        store: Arc<dyn SessionStore>,
        history: Arc<dyn HistoryLog>,
        clock: Arc<dyn Clock>,
        ttls: Ttls,
        stale_after: Duration,
        default_max_participants: u32,
    ) -> Self {
        Self {
            store,
            history,
            clock,
            ttls,
            stale_after,
            default_max_participants,
        }
    }

    /// Create a room unless one already exists under `code`.
    ///
    /// Returns `true` if this call created the room. The creation record is
    /// persisted on a background task; a failed write is logged and counted
    /// but does not undo the room.
    #[instrument(skip_all, fields(room_code = %code, host_id = %host_id))]
    pub async fn create_room(
        &self,
        code: &RoomCode,
        host_id: &str,
        opts: CreateRoomOptions,
    ) -> Result<bool, RoomError> {
        let now = self.clock.now_ms();
        let meta = RoomMeta {
            code: code.clone(),
            host_id: host_id.to_string(),
            created_at: now,
            last_activity: now,
            name: opts.name.clone(),
            scheduled_time: opts.scheduled_time.map(|t| t.timestamp_millis()),
        };
        let settings = opts
            .settings
            .unwrap_or_else(|| RoomSettings::defaults(self.default_max_participants, now));
        let settings_json = serde_json::to_string(&settings)
            .map_err(|e| RoomError::Internal(format!("failed to encode settings: {e}")))?;

        let keys = RoomKeys::new(code);
        let created = self
            .store
            .create_room_if_absent(&keys, &meta.to_fields(), &settings_json, self.ttls.room)
            .await?;

        if !created {
            debug!(target: "room.lifecycle", room_code = %code, "Room already exists");
            return Ok(false);
        }

        info!(target: "room.lifecycle", room_code = %code, host_id = %host_id, "Room created");

        let record = RoomRecord {
            room_code: code.to_string(),
            host_id: host_id.to_string(),
            name: opts.name,
            scheduled_time: opts.scheduled_time,
            created_at: ms_to_datetime(now),
        };
        let history = Arc::clone(&self.history);
        tokio::spawn(async move {
            if let Err(e) = history.record_room_created(&record).await {
                error!(
                    target: "room.history",
                    room_code = %record.room_code,
                    error = %e,
                    "Failed to persist room creation record"
                );
                metrics::record_history_write_failure();
            }
        });

        Ok(true)
    }

    /// Join a room, creating it with the joiner as host if it does not exist
    /// and reclaiming it first if it is stale.
    #[instrument(skip_all, fields(room_code = %code, user_id = %request.user_id))]
    pub async fn join_room(
        &self,
        code: &RoomCode,
        request: &JoinRequest,
    ) -> Result<JoinOutcome, RoomError> {
        let keys = RoomKeys::new(code);
        let mut created = false;

        for attempt in 0..MAX_JOIN_ATTEMPTS {
            let meta = match self.room(code).await? {
                Some(meta) => {
                    // Whoever wins the reclaim, the metadata read above is
                    // no longer current
                    if self.should_cleanup_room(&meta).await? {
                        self.reclaim_if_stale(code).await?;
                        continue;
                    }
                    meta
                }
                None => {
                    created |= self
                        .create_room(code, &request.user_id, CreateRoomOptions::default())
                        .await?;
                    continue;
                }
            };

            let now = self.clock.now_ms();
            let participant = Participant {
                user_id: request.user_id.clone(),
                display_name: request.display_name.clone(),
                audio_enabled: request.audio_enabled,
                video_enabled: request.video_enabled,
                is_host: meta.host_id == request.user_id,
                is_screen_sharing: false,
                joined_at: now,
                connection_quality: None,
            };
            let participant_json = encode_participant(&participant)?;

            match self
                .store
                .add_member(&keys, &request.user_id, &participant_json, self.ttls, now)
                .await?
            {
                AddMember::Added => {
                    let participants = self.participants(code).await?;
                    debug!(
                        target: "room.lifecycle",
                        room_code = %code,
                        user_id = %request.user_id,
                        is_host = participant.is_host,
                        member_count = participants.len(),
                        "Participant joined"
                    );
                    return Ok(JoinOutcome {
                        participant,
                        participants,
                        created,
                    });
                }
                AddMember::RoomMissing => {
                    debug!(
                        target: "room.lifecycle",
                        room_code = %code,
                        attempt,
                        "Room disappeared before membership write, retrying"
                    );
                }
            }
        }

        warn!(target: "room.lifecycle", room_code = %code, "Join exhausted retries");
        Err(RoomError::Internal(format!(
            "room {code} kept disappearing during join"
        )))
    }

    /// Remove a member. If that empties the room, the room is deleted and
    /// one meeting-history record is written.
    #[instrument(skip_all, fields(room_code = %code, user_id = %user_id))]
    pub async fn leave_room(&self, code: &RoomCode, user_id: &str) -> Result<LeaveOutcome, RoomError> {
        let outcome = self
            .store
            .remove_member(&RoomKeys::new(code), user_id)
            .await?;

        if outcome.removed {
            metrics::record_leave();
        }

        let reaped = match outcome.reaped {
            Some(fields) => {
                self.record_meeting_ended(code, &fields, ReapReason::Empty)
                    .await;
                true
            }
            None => false,
        };

        Ok(LeaveOutcome {
            removed: outcome.removed,
            reaped,
        })
    }

    /// Leave every room the user is a member of.
    ///
    /// Uses the `user:{id}:rooms` index plus `known_rooms`, the rooms the
    /// caller's connection joined, which still count if the index expired.
    /// A failure in one room is logged and does not stop the others.
    /// Returns the rooms actually left.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn handle_disconnect(
        &self,
        user_id: &str,
        known_rooms: &[RoomCode],
    ) -> Result<Vec<RoomCode>, RoomError> {
        let indexed = self.store.set_members(&user_rooms_key(user_id)).await?;
        let mut rooms: Vec<RoomCode> = known_rooms.to_vec();

        for raw in indexed {
            let Ok(code) = RoomCode::parse(&raw) else {
                warn!(target: "room.lifecycle", user_id = %user_id, "Malformed room code in user index");
                self.store
                    .remove_from_set(&user_rooms_key(user_id), &raw)
                    .await?;
                continue;
            };
            if !rooms.contains(&code) {
                rooms.push(code);
            }
        }

        let mut left = Vec::with_capacity(rooms.len());
        for code in rooms {
            match self.leave_room(&code, user_id).await {
                Ok(outcome) if outcome.removed => left.push(code),
                Ok(_) => {}
                Err(e) => {
                    error!(
                        target: "room.lifecycle",
                        room_code = %code,
                        user_id = %user_id,
                        error = %e,
                        "Disconnect cleanup failed for room"
                    );
                }
            }
        }

        Ok(left)
    }

    /// Refresh the TTLs that keep a connected member in the room, restoring
    /// `participant` as the record if it expired. Returns `false` if the
    /// user is no longer a member.
    pub async fn touch_member(
        &self,
        code: &RoomCode,
        participant: &Participant,
    ) -> Result<bool, RoomError> {
        let json = encode_participant(participant)?;
        Ok(self
            .store
            .touch_member(
                &RoomKeys::new(code),
                &participant.user_id,
                &json,
                self.ttls,
                self.clock.now_ms(),
            )
            .await?)
    }

    /// An empty room created more than the staleness window ago may be
    /// reclaimed before reuse.
    pub async fn should_cleanup_room(&self, meta: &RoomMeta) -> Result<bool, RoomError> {
        if meta.created_at >= self.stale_cutoff() {
            return Ok(false);
        }
        let members = self
            .store
            .set_size(&RoomKeys::new(&meta.code).participants)
            .await?;
        Ok(members == 0)
    }

    /// Atomically reclaim the room if it is still empty and stale.
    /// Returns `true` if this call reclaimed it.
    #[instrument(skip_all, fields(room_code = %code))]
    pub async fn reclaim_if_stale(&self, code: &RoomCode) -> Result<bool, RoomError> {
        let reaped = self
            .store
            .reap_if_stale(&RoomKeys::new(code), self.stale_cutoff())
            .await?;

        match reaped {
            Some(fields) => {
                info!(target: "room.lifecycle", room_code = %code, "Reclaimed stale room");
                self.record_meeting_ended(code, &fields, ReapReason::Stale)
                    .await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Room metadata, or `None` if the room does not exist.
    pub async fn room(&self, code: &RoomCode) -> Result<Option<RoomMeta>, RoomError> {
        let fields = self.store.hash_get_all(&RoomKeys::new(code).room).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(RoomMeta::from_fields(code, &fields)?))
    }

    /// Recorded host of the room.
    pub async fn host_id(&self, code: &RoomCode) -> Result<Option<String>, RoomError> {
        Ok(self
            .store
            .hash_get(&RoomKeys::new(code).room, "host_id")
            .await?)
    }

    pub async fn member_count(&self, code: &RoomCode) -> Result<usize, RoomError> {
        Ok(self
            .store
            .set_size(&RoomKeys::new(code).participants)
            .await?)
    }

    pub async fn is_member(&self, code: &RoomCode, user_id: &str) -> Result<bool, RoomError> {
        Ok(self
            .store
            .is_member(&RoomKeys::new(code).participants, user_id)
            .await?)
    }

    /// Current members ordered by join time.
    ///
    /// Members whose participant record has expired are omitted.
    pub async fn participants(&self, code: &RoomCode) -> Result<Vec<Participant>, RoomError> {
        let keys = RoomKeys::new(code);
        let members = self.store.set_members(&keys.participants).await?;

        let mut participants = Vec::with_capacity(members.len());
        for user_id in members {
            if let Some(json) = self.store.get(&keys.participant(&user_id)).await? {
                participants.push(decode_participant(&json)?);
            }
        }
        participants.sort_by(|a, b| {
            a.joined_at
                .cmp(&b.joined_at)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        Ok(participants)
    }

    pub async fn participant(
        &self,
        code: &RoomCode,
        user_id: &str,
    ) -> Result<Option<Participant>, RoomError> {
        let key = RoomKeys::new(code).participant(user_id);
        self.store
            .get(&key)
            .await?
            .map(|json| decode_participant(&json))
            .transpose()
    }

    /// Apply a state change to the caller's own participant record.
    ///
    /// Only the owning user writes this record, so the read-modify-write does
    /// not race with other members. Refreshes the record's TTL.
    pub async fn update_participant(
        &self,
        code: &RoomCode,
        user_id: &str,
        patch: &ParticipantStatePatch,
    ) -> Result<Participant, RoomError> {
        let keys = RoomKeys::new(code);
        let mut participant = self
            .participant(code, user_id)
            .await?
            .ok_or_else(|| RoomError::NotInRoom(code.to_string()))?;

        if let Some(audio) = patch.audio_enabled {
            participant.audio_enabled = audio;
        }
        if let Some(video) = patch.video_enabled {
            participant.video_enabled = video;
        }
        if let Some(sharing) = patch.is_screen_sharing {
            participant.is_screen_sharing = sharing;
        }
        if let Some(quality) = &patch.connection_quality {
            participant.connection_quality = Some(quality.clone());
        }

        let json = encode_participant(&participant)?;
        self.store
            .put(&keys.participant(user_id), &json, Some(self.ttls.participant))
            .await?;
        Ok(participant)
    }

    /// Completed sessions for a room code.
    pub async fn history(&self, code: &RoomCode) -> Result<Vec<MeetingHistoryRecord>, RoomError> {
        self.history
            .history_for_room(code.as_str())
            .await
            .map_err(|e| RoomError::Internal(e.to_string()))
    }

    fn stale_cutoff(&self) -> i64 {
        let window = i64::try_from(self.stale_after.as_millis()).unwrap_or(i64::MAX);
        self.clock.now_ms().saturating_sub(window)
    }

    /// Persist the end of a room lifetime. Never fails the caller: the
    /// session store change has already happened.
    async fn record_meeting_ended(
        &self,
        code: &RoomCode,
        fields: &HashMap<String, String>,
        reason: ReapReason,
    ) {
        metrics::record_room_reaped(reason.as_str());

        let now = self.clock.now_ms();
        let (host_id, started_at) = match RoomMeta::from_fields(code, fields) {
            Ok(meta) => (Some(meta.host_id), meta.created_at),
            Err(e) => {
                warn!(target: "room.lifecycle", room_code = %code, error = %e, "Reaped room had incomplete metadata");
                (fields.get("host_id").cloned(), now)
            }
        };

        let record = MeetingHistoryRecord {
            room_code: code.to_string(),
            host_id,
            started_at: ms_to_datetime(started_at),
            ended_at: ms_to_datetime(now),
            end_reason: reason,
        };

        match self.history.record_meeting_ended(&record).await {
            Ok(()) => {
                info!(
                    target: "room.lifecycle",
                    room_code = %code,
                    reason = %reason,
                    duration_ms = now.saturating_sub(started_at),
                    "Room ended"
                );
            }
            Err(e) => {
                error!(
                    target: "room.history",
                    room_code = %code,
                    reason = %reason,
                    error = %e,
                    "Failed to persist meeting history; room state already removed"
                );
                metrics::record_history_write_failure();
            }
        }
    }
}

fn encode_participant(participant: &Participant) -> Result<String, RoomError> {
    serde_json::to_string(participant)
        .map_err(|e| RoomError::Internal(format!("failed to encode participant: {e}")))
}

fn decode_participant(json: &str) -> Result<Participant, RoomError> {
    serde_json::from_str(json).map_err(|e| {
        RoomError::Store(crate::errors::StoreError::Corrupt(format!(
            "participant record: {e}"
        )))
    })
}
