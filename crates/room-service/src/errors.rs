//! Room service error types.
//!
//! `RoomError` maps to the wire `ErrorCode` sent to a single connection and to
//! an HTTP status via `IntoResponse`. Infrastructure details are logged
//! server-side and replaced with a generic message for clients.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use signaling_protocol::ErrorCode;
use thiserror::Error;

/// Session store failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A command or script failed.
    #[error("Store command failed: {0}")]
    Command(String),

    /// A stored value could not be decoded.
    #[error("Corrupt store value: {0}")]
    Corrupt(String),
}

/// Durable history log failure.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("Database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for HistoryError {
    fn from(err: sqlx::Error) -> Self {
        HistoryError::Database(err.to_string())
    }
}

/// Room service error type.
///
/// Maps to wire error codes and HTTP statuses:
/// - Policy rejections (`PasswordRequired`, `InvalidPassword`, `RoomLocked`,
///   `NotHost`, `PermissionDenied`, `WaitingRoomRequired`): 401/403/423
/// - Precondition violations (`RoomNotFound`, `UserNotWaiting`, `NotInRoom`,
///   `AlreadyInRoom`, `RoomFull`): 404/409
/// - `InvalidMessage`: 400
/// - `Store`, `Internal`: 503/500 with a generic message
#[derive(Debug, Error)]
pub enum RoomError {
    #[error("Password required")]
    PasswordRequired,

    #[error("Invalid password")]
    InvalidPassword,

    #[error("Room is locked")]
    RoomLocked,

    #[error("Not the room host")]
    NotHost,

    #[error("Room not found: {0}")]
    RoomNotFound(String),

    #[error("Room is full (max {0})")]
    RoomFull(u32),

    #[error("User not waiting: {0}")]
    UserNotWaiting(String),

    #[error("Waiting room admission required")]
    WaitingRoomRequired,

    #[error("Already in room")]
    AlreadyInRoom,

    #[error("Permission denied: {0}")]
    PermissionDenied(&'static str),

    #[error("Not in room: {0}")]
    NotInRoom(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RoomError {
    /// Returns the wire `ErrorCode` for this error.
    #[must_use]
    pub fn error_code(&self) -> ErrorCode {
        match self {
            RoomError::PasswordRequired => ErrorCode::PasswordRequired,
            RoomError::InvalidPassword => ErrorCode::InvalidPassword,
            RoomError::RoomLocked => ErrorCode::RoomLocked,
            RoomError::NotHost => ErrorCode::NotHost,
            RoomError::RoomNotFound(_) => ErrorCode::RoomNotFound,
            RoomError::RoomFull(_) => ErrorCode::RoomFull,
            RoomError::UserNotWaiting(_) => ErrorCode::UserNotWaiting,
            RoomError::WaitingRoomRequired => ErrorCode::WaitingRoomRequired,
            RoomError::AlreadyInRoom => ErrorCode::AlreadyInRoom,
            RoomError::PermissionDenied(_) => ErrorCode::PermissionDenied,
            RoomError::NotInRoom(_) => ErrorCode::NotInRoom,
            RoomError::InvalidMessage(_) => ErrorCode::InvalidMessage,
            RoomError::Store(_) | RoomError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            RoomError::PasswordRequired => "This room requires a password".to_string(),
            RoomError::InvalidPassword => "Incorrect room password".to_string(),
            RoomError::RoomLocked => "This room is locked".to_string(),
            RoomError::NotHost => "Only the host can do that".to_string(),
            RoomError::RoomNotFound(_) => "Room not found".to_string(),
            RoomError::RoomFull(max) => format!("Room is full (maximum {max} participants)"),
            RoomError::UserNotWaiting(_) => "User is not in the waiting room".to_string(),
            RoomError::WaitingRoomRequired => {
                "Please wait for the host to admit you".to_string()
            }
            RoomError::AlreadyInRoom => "You are already in this room".to_string(),
            RoomError::PermissionDenied(capability) => {
                format!("The host has disabled {capability} for participants")
            }
            RoomError::NotInRoom(_) => "You are not in this room".to_string(),
            RoomError::InvalidMessage(reason) => reason.clone(),
            RoomError::Store(_) | RoomError::Internal(_) => {
                "An internal error occurred".to_string()
            }
        }
    }

    /// HTTP status for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            RoomError::PasswordRequired | RoomError::InvalidPassword => StatusCode::UNAUTHORIZED,
            RoomError::NotHost | RoomError::PermissionDenied(_) | RoomError::WaitingRoomRequired => {
                StatusCode::FORBIDDEN
            }
            RoomError::RoomLocked => StatusCode::LOCKED,
            RoomError::RoomNotFound(_) | RoomError::UserNotWaiting(_) => StatusCode::NOT_FOUND,
            RoomError::AlreadyInRoom | RoomError::RoomFull(_) | RoomError::NotInRoom(_) => {
                StatusCode::CONFLICT
            }
            RoomError::InvalidMessage(_) => StatusCode::BAD_REQUEST,
            RoomError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            RoomError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl IntoResponse for RoomError {
    fn into_response(self) -> Response {
        match &self {
            RoomError::Store(err) => {
                tracing::error!(target: "room.http", error = %err, "Session store operation failed");
            }
            RoomError::Internal(err) => {
                tracing::error!(target: "room.http", error = %err, "Internal error");
            }
            _ => {}
        }

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().as_str(),
                message: self.client_message(),
            },
        };

        (self.status_code(), Json(body)).into_response()
    }
}
