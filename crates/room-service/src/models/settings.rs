//! Stored room settings.
//!
//! The stored form carries the password hash; only [`RoomSettings::to_public`]
//! output is ever sent to clients.

use serde::{Deserialize, Serialize};
use signaling_protocol::events::{Permissions, PublicRoomSettings};
use std::fmt;

/// Room settings as persisted in `room:{code}:settings`.
///
/// Every field has a serde default so records written by older versions, or
/// with partial permission sets, decode to a complete value.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    #[serde(default)]
    pub require_password: bool,
    #[serde(default)]
    pub is_locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_max_participants")]
    pub max_participants: u32,
    #[serde(default)]
    pub permissions: Permissions,
    #[serde(default)]
    pub waiting_room_enabled: bool,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

fn default_max_participants() -> u32 {
    crate::config::DEFAULT_MAX_PARTICIPANTS
}

impl RoomSettings {
    /// Defaults for a new room.
    #[must_use]
    pub fn defaults(max_participants: u32, now_ms: i64) -> Self {
        Self {
            password_hash: None,
            require_password: false,
            is_locked: false,
            room_name: None,
            description: None,
            max_participants,
            permissions: Permissions::default(),
            waiting_room_enabled: false,
            created_at: now_ms,
            updated_at: now_ms,
        }
    }

    /// Wire view without the password hash.
    #[must_use]
    pub fn to_public(&self) -> PublicRoomSettings {
        PublicRoomSettings {
            require_password: self.require_password,
            is_locked: self.is_locked,
            room_name: self.room_name.clone(),
            description: self.description.clone(),
            max_participants: self.max_participants,
            permissions: self.permissions,
            waiting_room_enabled: self.waiting_room_enabled,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

impl fmt::Debug for RoomSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomSettings")
            .field(
                "password_hash",
                &self.password_hash.as_ref().map(|_| "[REDACTED]"),
            )
            .field("require_password", &self.require_password)
            .field("is_locked", &self.is_locked)
            .field("room_name", &self.room_name)
            .field("max_participants", &self.max_participants)
            .field("permissions", &self.permissions)
            .field("waiting_room_enabled", &self.waiting_room_enabled)
            .finish_non_exhaustive()
    }
}
