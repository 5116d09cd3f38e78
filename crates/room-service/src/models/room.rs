//! Room metadata as held in the `room:{code}` hash.

use crate::errors::StoreError;
use chrono::{DateTime, TimeZone, Utc};
use common::types::RoomCode;
use std::collections::HashMap;

const FIELD_HOST_ID: &str = "host_id";
const FIELD_CREATED_AT: &str = "created_at";
const FIELD_LAST_ACTIVITY: &str = "last_activity";
const FIELD_NAME: &str = "name";
const FIELD_SCHEDULED_TIME: &str = "scheduled_time";

/// Live room metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomMeta {
    pub code: RoomCode,
    /// Fixed at creation, never reassigned.
    pub host_id: String,
    /// Epoch milliseconds.
    pub created_at: i64,
    /// Epoch milliseconds of the last join.
    pub last_activity: i64,
    pub name: Option<String>,
    /// Epoch milliseconds.
    pub scheduled_time: Option<i64>,
}

impl RoomMeta {
    /// Hash fields written on creation.
    #[must_use]
    pub fn to_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            (FIELD_HOST_ID.to_string(), self.host_id.clone()),
            (FIELD_CREATED_AT.to_string(), self.created_at.to_string()),
            (FIELD_LAST_ACTIVITY.to_string(), self.last_activity.to_string()),
        ];
        if let Some(name) = &self.name {
            fields.push((FIELD_NAME.to_string(), name.clone()));
        }
        if let Some(at) = self.scheduled_time {
            fields.push((FIELD_SCHEDULED_TIME.to_string(), at.to_string()));
        }
        fields
    }

    /// Decode a room hash.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Corrupt` if `host_id` or `created_at` is missing
    /// or malformed.
    pub fn from_fields(code: &RoomCode, fields: &HashMap<String, String>) -> Result<Self, StoreError> {
        let host_id = fields
            .get(FIELD_HOST_ID)
            .filter(|h| !h.is_empty())
            .cloned()
            .ok_or_else(|| StoreError::Corrupt(format!("room {code} has no host_id")))?;

        let created_at = parse_ms(fields, FIELD_CREATED_AT)?
            .ok_or_else(|| StoreError::Corrupt(format!("room {code} has no created_at")))?;
        let last_activity = parse_ms(fields, FIELD_LAST_ACTIVITY)?.unwrap_or(created_at);

        Ok(Self {
            code: code.clone(),
            host_id,
            created_at,
            last_activity,
            name: fields.get(FIELD_NAME).cloned(),
            scheduled_time: parse_ms(fields, FIELD_SCHEDULED_TIME)?,
        })
    }
}

fn parse_ms(fields: &HashMap<String, String>, name: &str) -> Result<Option<i64>, StoreError> {
    fields
        .get(name)
        .map(|v| {
            v.parse::<i64>()
                .map_err(|e| StoreError::Corrupt(format!("invalid {name} '{v}': {e}")))
        })
        .transpose()
}

/// Convert epoch milliseconds to a UTC timestamp.
#[must_use]
pub fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn code() -> RoomCode {
        RoomCode::parse("abc-def-ghi").unwrap()
    }

    #[test]
    fn test_fields_round_trip() {
        let meta = RoomMeta {
            code: code(),
            host_id: "host".to_string(),
            created_at: 10,
            last_activity: 20,
            name: Some("Standup".to_string()),
            scheduled_time: Some(30),
        };

        let map: HashMap<String, String> = meta.to_fields().into_iter().collect();
        assert_eq!(RoomMeta::from_fields(&code(), &map).unwrap(), meta);
    }

    #[test]
    fn test_missing_host_is_corrupt() {
        let map: HashMap<String, String> =
            [("created_at".to_string(), "1".to_string())].into_iter().collect();
        assert!(matches!(
            RoomMeta::from_fields(&code(), &map),
            Err(StoreError::Corrupt(_))
        ));
    }

    #[test]
    fn test_last_activity_defaults_to_created_at() {
        let map: HashMap<String, String> = [
            ("host_id".to_string(), "h".to_string()),
            ("created_at".to_string(), "77".to_string()),
        ]
        .into_iter()
        .collect();
        let meta = RoomMeta::from_fields(&code(), &map).unwrap();
        assert_eq!(meta.last_activity, 77);
        assert!(meta.name.is_none());
    }

    #[test]
    fn test_malformed_timestamp_is_corrupt() {
        let map: HashMap<String, String> = [
            ("host_id".to_string(), "h".to_string()),
            ("created_at".to_string(), "yesterday".to_string()),
        ]
        .into_iter()
        .collect();
        assert!(RoomMeta::from_fields(&code(), &map).is_err());
    }
}
