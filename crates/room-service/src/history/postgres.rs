//! PostgreSQL history log.
//!
//! All queries use parameterized statements.

use super::{HistoryLog, MeetingHistoryRecord, RoomRecord};
use crate::errors::HistoryError;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::{error, instrument};

/// History log stored in PostgreSQL.
#[derive(Clone)]
pub struct PgHistoryLog {
    pool: PgPool,
}

impl PgHistoryLog {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a pool with conservative limits.
    ///
    /// # Errors
    ///
    /// Returns `HistoryError::Database` if the connection fails.
    pub async fn connect(database_url: &str) -> Result<Self, HistoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| {
                // Do NOT log database_url, it may contain credentials
                error!(target: "room.history", error = %e, "Failed to connect to database");
                HistoryError::from(e)
            })?;
        Ok(Self::new(pool))
    }

    /// Apply pending migrations.
    ///
    /// # Errors
    ///
    /// Returns `HistoryError::Database` if a migration fails.
    pub async fn migrate(&self) -> Result<(), HistoryError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| HistoryError::Database(format!("migration failed: {e}")))
    }
}

#[async_trait]
impl HistoryLog for PgHistoryLog {
    #[instrument(skip_all, name = "room.history.record_room_created", fields(room_code = %record.room_code))]
    async fn record_room_created(&self, record: &RoomRecord) -> Result<(), HistoryError> {
        sqlx::query(
            r#"
            INSERT INTO rooms (room_code, host_id, name, scheduled_time, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&record.room_code) // $1
        .bind(&record.host_id) // $2
        .bind(record.name.as_deref()) // $3
        .bind(record.scheduled_time) // $4
        .bind(record.created_at) // $5
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip_all, name = "room.history.record_meeting_ended", fields(room_code = %record.room_code))]
    async fn record_meeting_ended(
        &self,
        record: &MeetingHistoryRecord,
    ) -> Result<(), HistoryError> {
        sqlx::query(
            r#"
            INSERT INTO meeting_history (room_code, host_id, started_at, ended_at, end_reason)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&record.room_code) // $1
        .bind(record.host_id.as_deref()) // $2
        .bind(record.started_at) // $3
        .bind(record.ended_at) // $4
        .bind(record.end_reason.as_str()) // $5
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip_all, name = "room.history.history_for_room")]
    async fn history_for_room(
        &self,
        room_code: &str,
    ) -> Result<Vec<MeetingHistoryRecord>, HistoryError> {
        let rows = sqlx::query(
            r#"
            SELECT room_code, host_id, started_at, ended_at, end_reason
            FROM meeting_history
            WHERE room_code = $1
            ORDER BY ended_at DESC, id DESC
            "#,
        )
        .bind(room_code)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let end_reason: String = row.try_get("end_reason")?;
                Ok(MeetingHistoryRecord {
                    room_code: row.try_get("room_code")?,
                    host_id: row.try_get("host_id")?,
                    started_at: row.try_get("started_at")?,
                    ended_at: row.try_get("ended_at")?,
                    end_reason: end_reason.parse()?,
                })
            })
            .collect()
    }
}
