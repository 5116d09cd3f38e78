//! Room service models.
//!
//! HTTP request/response bodies live here; stored records live in the
//! submodules.

pub mod room;
pub mod settings;

pub use room::RoomMeta;
pub use settings::RoomSettings;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use signaling_protocol::events::{Password, PermissionsPatch, PublicRoomSettings};

/// Request body for `POST /rooms`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    pub host_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub scheduled_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub permissions: Option<PermissionsPatch>,
    #[serde(default)]
    pub waiting_room_enabled: Option<bool>,
    #[serde(default)]
    pub password: Option<Password>,
}

/// Response body for `POST /rooms`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomResponse {
    pub room_id: String,
    pub settings: PublicRoomSettings,
}

/// Response body for `GET /rooms/:id/check-access`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckAccessResponse {
    pub is_locked: bool,
    pub requires_password: bool,
    pub waiting_room_enabled: bool,
}

/// Response body for `GET /rooms/:id/host`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostResponse {
    pub host_id: String,
}

/// Request body for `POST /rooms/:id/validate-password`.
#[derive(Debug, Clone, Deserialize)]
pub struct ValidatePasswordRequest {
    pub password: Password,
}

/// Response body for `POST /rooms/:id/validate-password`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatePasswordResponse {
    pub valid: bool,
}

/// Readiness check response.
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_store: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
