//! In-process history log for development and tests.

use super::{HistoryLog, MeetingHistoryRecord, RoomRecord};
use crate::errors::HistoryError;
use async_trait::async_trait;
use std::sync::Mutex;

/// History log held in memory.
#[derive(Debug, Default)]
pub struct MemoryHistoryLog {
    rooms: Mutex<Vec<RoomRecord>>,
    meetings: Mutex<Vec<MeetingHistoryRecord>>,
}

impl MemoryHistoryLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All creation records, in insertion order.
    pub fn rooms(&self) -> Result<Vec<RoomRecord>, HistoryError> {
        self.rooms
            .lock()
            .map(|r| r.clone())
            .map_err(|_| poisoned())
    }

    /// All meeting-history records, in insertion order.
    pub fn meetings(&self) -> Result<Vec<MeetingHistoryRecord>, HistoryError> {
        self.meetings
            .lock()
            .map(|m| m.clone())
            .map_err(|_| poisoned())
    }
}

fn poisoned() -> HistoryError {
    HistoryError::Database("memory history lock poisoned".to_string())
}

#[async_trait]
impl HistoryLog for MemoryHistoryLog {
    async fn record_room_created(&self, record: &RoomRecord) -> Result<(), HistoryError> {
        self.rooms
            .lock()
            .map_err(|_| poisoned())?
            .push(record.clone());
        Ok(())
    }

    async fn record_meeting_ended(
        &self,
        record: &MeetingHistoryRecord,
    ) -> Result<(), HistoryError> {
        self.meetings
            .lock()
            .map_err(|_| poisoned())?
            .push(record.clone());
        Ok(())
    }

    async fn history_for_room(
        &self,
        room_code: &str,
    ) -> Result<Vec<MeetingHistoryRecord>, HistoryError> {
        let meetings = self.meetings.lock().map_err(|_| poisoned())?;
        Ok(meetings
            .iter()
            .rev()
            .filter(|m| m.room_code == room_code)
            .cloned()
            .collect())
    }
}
