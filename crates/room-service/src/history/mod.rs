//! Durable history log.
//!
//! Append-only records that outlive the session store: one creation record
//! per room lifetime and one meeting-history record when that lifetime ends.
//! Writes are never allowed to roll back session state that already changed.

pub mod memory;
pub mod postgres;

pub use self::memory::MemoryHistoryLog;
pub use self::postgres::PgHistoryLog;

use crate::errors::HistoryError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Why a room lifetime ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReapReason {
    /// The last member left.
    Empty,
    /// An empty room older than the staleness window was reclaimed.
    Stale,
}

impl ReapReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ReapReason::Empty => "empty",
            ReapReason::Stale => "stale",
        }
    }
}

impl fmt::Display for ReapReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReapReason {
    type Err = HistoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "empty" => Ok(ReapReason::Empty),
            "stale" => Ok(ReapReason::Stale),
            other => Err(HistoryError::Database(format!(
                "unknown end_reason '{other}'"
            ))),
        }
    }
}

/// Room creation record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomRecord {
    pub room_code: String,
    pub host_id: String,
    pub name: Option<String>,
    pub scheduled_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Completed room session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingHistoryRecord {
    pub room_code: String,
    pub host_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub end_reason: ReapReason,
}

/// Append-only durable log.
#[async_trait]
pub trait HistoryLog: Send + Sync {
    /// Persist a room creation record.
    async fn record_room_created(&self, record: &RoomRecord) -> Result<(), HistoryError>;

    /// Persist the end of a room lifetime.
    async fn record_meeting_ended(&self, record: &MeetingHistoryRecord)
        -> Result<(), HistoryError>;

    /// Completed sessions for a room code, most recent first.
    async fn history_for_room(
        &self,
        room_code: &str,
    ) -> Result<Vec<MeetingHistoryRecord>, HistoryError>;
}
