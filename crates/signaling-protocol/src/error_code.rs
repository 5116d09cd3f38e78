//! Error codes carried by the `error` server event.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Typed error code sent to the single connection whose request failed.
///
/// Serialized as `SCREAMING_SNAKE_CASE` strings, e.g. `"ROOM_LOCKED"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The room requires a password and none was supplied.
    PasswordRequired,
    /// The supplied password does not match.
    InvalidPassword,
    /// The room is locked against new joins.
    RoomLocked,
    /// A host-only operation was attempted by someone else.
    NotHost,
    /// No room exists under the given code.
    RoomNotFound,
    /// The room has reached its participant limit.
    RoomFull,
    /// Admit/reject targeted a user who is not in the waiting queue.
    UserNotWaiting,
    /// The room is gated and the user has not been admitted.
    WaitingRoomRequired,
    /// The user is already a participant of the room.
    AlreadyInRoom,
    /// The room's permissions do not allow this capability.
    PermissionDenied,
    /// The connection has not joined the room it is addressing.
    NotInRoom,
    /// The frame could not be parsed or failed validation.
    InvalidMessage,
    /// Infrastructure failure; details are logged server-side only.
    InternalError,
}

impl ErrorCode {
    /// Wire representation, also used as a bounded metrics label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::PasswordRequired => "PASSWORD_REQUIRED",
            ErrorCode::InvalidPassword => "INVALID_PASSWORD",
            ErrorCode::RoomLocked => "ROOM_LOCKED",
            ErrorCode::NotHost => "NOT_HOST",
            ErrorCode::RoomNotFound => "ROOM_NOT_FOUND",
            ErrorCode::RoomFull => "ROOM_FULL",
            ErrorCode::UserNotWaiting => "USER_NOT_WAITING",
            ErrorCode::WaitingRoomRequired => "WAITING_ROOM_REQUIRED",
            ErrorCode::AlreadyInRoom => "ALREADY_IN_ROOM",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::NotInRoom => "NOT_IN_ROOM",
            ErrorCode::InvalidMessage => "INVALID_MESSAGE",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_serialized_form_matches_as_str() {
        for code in [
            ErrorCode::PasswordRequired,
            ErrorCode::InvalidPassword,
            ErrorCode::RoomLocked,
            ErrorCode::NotHost,
            ErrorCode::RoomNotFound,
            ErrorCode::RoomFull,
            ErrorCode::UserNotWaiting,
            ErrorCode::WaitingRoomRequired,
            ErrorCode::AlreadyInRoom,
            ErrorCode::PermissionDenied,
            ErrorCode::NotInRoom,
            ErrorCode::InvalidMessage,
            ErrorCode::InternalError,
        ] {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
        }
    }

    #[test]
    fn test_deserialize() {
        let code: ErrorCode = serde_json::from_str("\"NOT_HOST\"").unwrap();
        assert_eq!(code, ErrorCode::NotHost);
    }
}
