//! Room handlers.
//!
//! - `POST /rooms` - Create a room
//! - `GET /rooms/{id}/settings` - Public settings
//! - `PUT /rooms/{id}/settings` - Update settings (host only)
//! - `POST /rooms/{id}/validate-password` - 200 if the password opens the room, 401 otherwise
//! - `GET /rooms/{id}/check-access` - Pre-join gate summary
//! - `GET /rooms/{id}/host` - Host identity
//! - `GET /rooms/{id}/history` - Completed sessions, newest first
//!
//! # Security
//!
//! - Caller identity for host-only endpoints comes from the `x-user-id`
//!   header set by the identity layer in front of this service
//! - Responses never include password hashes
//! - Request bodies are parsed by hand so malformed JSON yields 400

use crate::errors::RoomError;
use crate::history::MeetingHistoryRecord;
use crate::models::{
    CheckAccessResponse, CreateRoomRequest, CreateRoomResponse, HostResponse,
    ValidatePasswordRequest, ValidatePasswordResponse,
};
use crate::routes::AppState;
use crate::services::CreateRoomOptions;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use common::types::RoomCode;
use serde::de::DeserializeOwned;
use signaling_protocol::events::{PublicRoomSettings, SettingsPatch};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Header carrying the authenticated caller's user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Maximum attempts at finding an unused room code.
const MAX_CODE_COLLISION_RETRIES: usize = 3;

// ============================================================================
// Handler: POST /rooms
// ============================================================================

/// Create a room with the given host.
///
/// # Response
///
/// - 201 Created: `{roomId, settings}`
/// - 400 Bad Request: malformed body or empty `hostId`
/// - 500 Internal Server Error: no free room code found
#[instrument(skip_all, name = "room.http.create")]
pub async fn create_room(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<CreateRoomResponse>), RoomError> {
    let request: CreateRoomRequest = parse_body(&body)?;
    let host_id = request.host_id.trim();
    if host_id.is_empty() {
        return Err(RoomError::InvalidMessage("hostId is required".to_string()));
    }

    let settings = state
        .settings
        .initial_settings(
            request.permissions.as_ref(),
            request.waiting_room_enabled,
            request.password.as_ref(),
        )
        .await?;

    for attempt in 0..MAX_CODE_COLLISION_RETRIES {
        let code = RoomCode::generate()
            .map_err(|e| RoomError::Internal(format!("room code generation failed: {e}")))?;

        let created = state
            .lifecycle
            .create_room(
                &code,
                host_id,
                CreateRoomOptions {
                    name: request.name.clone(),
                    scheduled_time: request.scheduled_time,
                    settings: Some(settings.clone()),
                },
            )
            .await?;

        if created {
            info!(target: "room.http", room_code = %code, host_id = %host_id, "Room created via API");
            return Ok((
                StatusCode::CREATED,
                Json(CreateRoomResponse {
                    room_id: code.to_string(),
                    settings: settings.to_public(),
                }),
            ));
        }
        warn!(target: "room.http", attempt, "Room code collision");
    }

    Err(RoomError::Internal(
        "exhausted room code collision retries".to_string(),
    ))
}

// ============================================================================
// Handlers: /rooms/{id}/settings
// ============================================================================

/// Public settings of an existing room.
#[instrument(skip_all, name = "room.http.get_settings", fields(room_code = %id))]
pub async fn get_room_settings(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<PublicRoomSettings>, RoomError> {
    let code = existing_room(&state, &id).await?;
    Ok(Json(state.settings.get_public_settings(&code).await?))
}

/// Apply a partial settings update. Only the recorded host may do this.
///
/// Connected members receive `room:settings-changed`.
///
/// # Response
///
/// - 200 OK: updated public settings
/// - 400 Bad Request: malformed body or invalid values
/// - 403 Forbidden: caller is not the host or sent no identity
/// - 404 Not Found: no such room
#[instrument(skip_all, name = "room.http.update_settings", fields(room_code = %id))]
pub async fn update_room_settings(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<PublicRoomSettings>, RoomError> {
    let code = parse_code(&id)?;
    let caller = caller_id(&headers).ok_or(RoomError::NotHost)?;
    let host_id = state
        .lifecycle
        .host_id(&code)
        .await?
        .ok_or_else(|| RoomError::RoomNotFound(code.to_string()))?;
    if host_id != caller {
        debug!(target: "room.http", room_code = %code, "Settings update by non-host rejected");
        return Err(RoomError::NotHost);
    }

    let patch: SettingsPatch = parse_body(&body)?;
    let public = state
        .settings
        .update_settings(&code, &patch)
        .await?
        .to_public();
    state.broker.announce_settings(&code, public.clone(), &caller);
    Ok(Json(public))
}

// ============================================================================
// Handlers: access checks
// ============================================================================

/// Check a room password without joining.
///
/// # Response
///
/// - 200 OK: `{valid: true}` (also when the room needs no password)
/// - 401 Unauthorized: `{valid: false}`
/// - 404 Not Found: no such room
#[instrument(skip_all, name = "room.http.validate_password", fields(room_code = %id))]
pub async fn validate_password(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<ValidatePasswordResponse>), RoomError> {
    let request: ValidatePasswordRequest = parse_body(&body)?;
    let code = existing_room(&state, &id).await?;

    let valid = state
        .settings
        .validate_password(&code, &request.password)
        .await?;
    let status = if valid {
        StatusCode::OK
    } else {
        StatusCode::UNAUTHORIZED
    };
    Ok((status, Json(ValidatePasswordResponse { valid })))
}

/// Which join gates apply to a room.
#[instrument(skip_all, name = "room.http.check_access", fields(room_code = %id))]
pub async fn check_access(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CheckAccessResponse>, RoomError> {
    let code = existing_room(&state, &id).await?;
    let settings = state.settings.get_settings(&code).await?;
    Ok(Json(CheckAccessResponse {
        is_locked: settings.is_locked,
        requires_password: settings.require_password,
        waiting_room_enabled: settings.waiting_room_enabled,
    }))
}

/// The room's host.
#[instrument(skip_all, name = "room.http.get_host", fields(room_code = %id))]
pub async fn get_host(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<HostResponse>, RoomError> {
    let code = parse_code(&id)?;
    let host_id = state
        .lifecycle
        .host_id(&code)
        .await?
        .ok_or_else(|| RoomError::RoomNotFound(code.to_string()))?;
    Ok(Json(HostResponse { host_id }))
}

/// Completed sessions under this room code. Works after the room is gone.
#[instrument(skip_all, name = "room.http.get_history", fields(room_code = %id))]
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<MeetingHistoryRecord>>, RoomError> {
    let code = parse_code(&id)?;
    Ok(Json(state.lifecycle.history(&code).await?))
}

// ============================================================================
// Helpers
// ============================================================================

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, RoomError> {
    serde_json::from_slice(body).map_err(|e| {
        debug!(target: "room.http", error = %e, "Invalid request body");
        RoomError::InvalidMessage("Invalid request body".to_string())
    })
}

fn parse_code(id: &str) -> Result<RoomCode, RoomError> {
    RoomCode::parse(id).map_err(|_| RoomError::InvalidMessage("Malformed room code".to_string()))
}

async fn existing_room(state: &AppState, id: &str) -> Result<RoomCode, RoomError> {
    let code = parse_code(id)?;
    match state.lifecycle.room(&code).await? {
        Some(_) => Ok(code),
        None => Err(RoomError::RoomNotFound(code.to_string())),
    }
}

fn caller_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
