//! Client and server event definitions.
//!
//! # Envelope
//!
//! ```json
//! {"event": "join-room", "data": {"roomCode": "abc-def-ghi", "userId": "u1", "displayName": "Ada"}}
//! ```

use crate::error_code::ErrorCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

// ============================================================================
// Shared wire types
// ============================================================================

/// Room password as typed by a user. Never printed by `Debug`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Password(String);

impl Password {
    /// Wrap a plaintext password.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the plaintext for hashing or verification.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password([REDACTED])")
    }
}

/// A room member as seen by other members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: String,
    pub display_name: String,
    pub audio_enabled: bool,
    pub video_enabled: bool,
    pub is_host: bool,
    #[serde(default)]
    pub is_screen_sharing: bool,
    /// Epoch milliseconds.
    pub joined_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_quality: Option<String>,
}

/// A user queued in a room's waiting room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitingUser {
    pub user_id: String,
    pub display_name: String,
    /// Epoch milliseconds when the user was enqueued.
    pub joined_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

fn enabled() -> bool {
    true
}

/// Capabilities granted to non-host participants.
///
/// Every field defaults to `true` when absent, so records written before a
/// capability existed still read back structurally complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permissions {
    #[serde(default = "enabled")]
    pub chat: bool,
    #[serde(default = "enabled")]
    pub screen_share: bool,
    #[serde(default = "enabled")]
    pub microphone: bool,
    #[serde(default = "enabled")]
    pub camera: bool,
}

impl Default for Permissions {
    fn default() -> Self {
        Self {
            chat: true,
            screen_share: true,
            microphone: true,
            camera: true,
        }
    }
}

/// Partial permission update; `None` fields are left unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen_share: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub microphone: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera: Option<bool>,
}

impl Permissions {
    /// Apply a partial update.
    #[must_use]
    pub fn merged(self, patch: &PermissionsPatch) -> Self {
        Self {
            chat: patch.chat.unwrap_or(self.chat),
            screen_share: patch.screen_share.unwrap_or(self.screen_share),
            microphone: patch.microphone.unwrap_or(self.microphone),
            camera: patch.camera.unwrap_or(self.camera),
        }
    }
}

/// Room settings as exposed on the wire. Has no password field at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicRoomSettings {
    pub require_password: bool,
    pub is_locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub max_participants: u32,
    pub permissions: Permissions,
    pub waiting_room_enabled: bool,
    /// Epoch milliseconds.
    pub created_at: i64,
    /// Epoch milliseconds.
    pub updated_at: i64,
}

/// Host-supplied partial settings update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    /// New password. An empty string clears the stored password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<Password>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_password: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_locked: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_participants: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<PermissionsPatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waiting_room_enabled: Option<bool>,
}

/// Partial participant state; only present fields changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantStatePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_screen_sharing: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_quality: Option<String>,
}

impl ParticipantStatePatch {
    /// True if no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.audio_enabled.is_none()
            && self.video_enabled.is_none()
            && self.is_screen_sharing.is_none()
            && self.connection_quality.is_none()
    }
}

// ============================================================================
// Client -> server payloads
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoom {
    pub room_code: String,
    pub user_id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<Password>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_enabled: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRef {
    pub room_code: String,
}

/// Outgoing offer/answer/candidate addressed to one peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalTo<T> {
    pub to: String,
    #[serde(flatten)]
    pub payload: T,
}

/// Relayed offer/answer/candidate tagged with its sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalFrom<T> {
    pub from: String,
    #[serde(flatten)]
    pub payload: T,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferBody {
    pub offer: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerBody {
    pub answer: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateBody {
    pub candidate: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleMedia {
    pub room_code: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantState {
    pub room_code: String,
    pub state: ParticipantStatePatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendChat {
    pub room_code: String,
    pub content: String,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinWaitingRoom {
    pub room_code: String,
    pub user_id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitingDecision {
    pub room_code: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSettings {
    pub room_code: String,
    pub settings: SettingsPatch,
}

/// Events sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "join-room")]
    JoinRoom(JoinRoom),
    #[serde(rename = "leave-room")]
    LeaveRoom(RoomRef),
    #[serde(rename = "offer")]
    Offer(SignalTo<OfferBody>),
    #[serde(rename = "answer")]
    Answer(SignalTo<AnswerBody>),
    #[serde(rename = "ice-candidate")]
    IceCandidate(SignalTo<CandidateBody>),
    #[serde(rename = "toggle-audio")]
    ToggleAudio(ToggleMedia),
    #[serde(rename = "toggle-video")]
    ToggleVideo(ToggleMedia),
    #[serde(rename = "participant:state")]
    ParticipantState(ParticipantState),
    #[serde(rename = "chat-message")]
    ChatMessage(SendChat),
    #[serde(rename = "join-waiting-room")]
    JoinWaitingRoom(JoinWaitingRoom),
    #[serde(rename = "admit-user")]
    AdmitUser(WaitingDecision),
    #[serde(rename = "reject-user")]
    RejectUser(WaitingDecision),
    #[serde(rename = "room:settings")]
    UpdateSettings(UpdateSettings),
    #[serde(rename = "room:get-settings")]
    GetSettings(RoomRef),
}

impl ClientEvent {
    /// Wire event name, used for logging and metrics labels.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinRoom(_) => "join-room",
            ClientEvent::LeaveRoom(_) => "leave-room",
            ClientEvent::Offer(_) => "offer",
            ClientEvent::Answer(_) => "answer",
            ClientEvent::IceCandidate(_) => "ice-candidate",
            ClientEvent::ToggleAudio(_) => "toggle-audio",
            ClientEvent::ToggleVideo(_) => "toggle-video",
            ClientEvent::ParticipantState(_) => "participant:state",
            ClientEvent::ChatMessage(_) => "chat-message",
            ClientEvent::JoinWaitingRoom(_) => "join-waiting-room",
            ClientEvent::AdmitUser(_) => "admit-user",
            ClientEvent::RejectUser(_) => "reject-user",
            ClientEvent::UpdateSettings(_) => "room:settings",
            ClientEvent::GetSettings(_) => "room:get-settings",
        }
    }
}

// ============================================================================
// Server -> client payloads
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomJoined {
    pub room_code: String,
    pub participants: Vec<Participant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserJoined {
    pub participant: Participant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserLeft {
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaChanged {
    pub user_id: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChanged {
    pub user_id: String,
    pub state: ParticipantStatePatch,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub is_private: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitingRoomJoined {
    pub room_code: String,
    /// 1-based position in the queue at enqueue time.
    pub position: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserWaiting {
    pub room_code: String,
    pub user: WaitingUser,
    pub waiting_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitingCountUpdated {
    pub room_code: String,
    pub waiting_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitingUsersList {
    pub room_code: String,
    pub users: Vec<WaitingUser>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionNotice {
    pub room_code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsChanged {
    pub room_code: String,
    pub settings: PublicRoomSettings,
    pub changed_by: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsSync {
    pub room_code: String,
    pub settings: PublicRoomSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
}

/// Events sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "room-joined")]
    RoomJoined(RoomJoined),
    #[serde(rename = "user-joined")]
    UserJoined(UserJoined),
    #[serde(rename = "user-left")]
    UserLeft(UserLeft),
    #[serde(rename = "offer")]
    Offer(SignalFrom<OfferBody>),
    #[serde(rename = "answer")]
    Answer(SignalFrom<AnswerBody>),
    #[serde(rename = "ice-candidate")]
    IceCandidate(SignalFrom<CandidateBody>),
    #[serde(rename = "audio-changed")]
    AudioChanged(MediaChanged),
    #[serde(rename = "video-changed")]
    VideoChanged(MediaChanged),
    #[serde(rename = "participant:state-changed")]
    StateChanged(StateChanged),
    #[serde(rename = "chat-message")]
    ChatMessage(ChatMessage),
    #[serde(rename = "waiting-room-joined")]
    WaitingRoomJoined(WaitingRoomJoined),
    #[serde(rename = "user-waiting")]
    UserWaiting(UserWaiting),
    #[serde(rename = "waiting-count-updated")]
    WaitingCountUpdated(WaitingCountUpdated),
    #[serde(rename = "waiting-users-list")]
    WaitingUsersList(WaitingUsersList),
    #[serde(rename = "admitted")]
    Admitted(AdmissionNotice),
    #[serde(rename = "rejected")]
    Rejected(AdmissionNotice),
    #[serde(rename = "room:settings-changed")]
    SettingsChanged(SettingsChanged),
    #[serde(rename = "room:settings-sync")]
    SettingsSync(SettingsSync),
    #[serde(rename = "error")]
    Error(ErrorPayload),
}

impl ServerEvent {
    /// Wire event name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::RoomJoined(_) => "room-joined",
            ServerEvent::UserJoined(_) => "user-joined",
            ServerEvent::UserLeft(_) => "user-left",
            ServerEvent::Offer(_) => "offer",
            ServerEvent::Answer(_) => "answer",
            ServerEvent::IceCandidate(_) => "ice-candidate",
            ServerEvent::AudioChanged(_) => "audio-changed",
            ServerEvent::VideoChanged(_) => "video-changed",
            ServerEvent::StateChanged(_) => "participant:state-changed",
            ServerEvent::ChatMessage(_) => "chat-message",
            ServerEvent::WaitingRoomJoined(_) => "waiting-room-joined",
            ServerEvent::UserWaiting(_) => "user-waiting",
            ServerEvent::WaitingCountUpdated(_) => "waiting-count-updated",
            ServerEvent::WaitingUsersList(_) => "waiting-users-list",
            ServerEvent::Admitted(_) => "admitted",
            ServerEvent::Rejected(_) => "rejected",
            ServerEvent::SettingsChanged(_) => "room:settings-changed",
            ServerEvent::SettingsSync(_) => "room:settings-sync",
            ServerEvent::Error(_) => "error",
        }
    }

    /// Build an `error` event.
    #[must_use]
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerEvent::Error(ErrorPayload {
            code,
            message: message.into(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_join_room_parses_camel_case() {
        let frame = json!({
            "event": "join-room",
            "data": {
                "roomCode": "abc-def-ghi",
                "userId": "u1",
                "displayName": "Ada",
                "password": "s3cret",
                "audioEnabled": false
            }
        });

        let event: ClientEvent = serde_json::from_value(frame).unwrap();
        let ClientEvent::JoinRoom(join) = event else {
            panic!("expected join-room");
        };
        assert_eq!(join.room_code, "abc-def-ghi");
        assert_eq!(join.password.as_ref().map(Password::expose), Some("s3cret"));
        assert_eq!(join.audio_enabled, Some(false));
        assert_eq!(join.video_enabled, None);
    }

    #[test]
    fn test_password_debug_is_redacted() {
        let join = JoinRoom {
            room_code: "abc-def-ghi".to_string(),
            user_id: "u1".to_string(),
            display_name: "Ada".to_string(),
            password: Some(Password::new("s3cret")),
            audio_enabled: None,
            video_enabled: None,
        };
        assert!(!format!("{join:?}").contains("s3cret"));
    }

    #[test]
    fn test_offer_payload_is_opaque() {
        let frame = json!({
            "event": "offer",
            "data": {"to": "u2", "offer": {"type": "offer", "sdp": "v=0\r\n"}}
        });
        let event: ClientEvent = serde_json::from_value(frame).unwrap();
        let ClientEvent::Offer(signal) = event else {
            panic!("expected offer");
        };
        assert_eq!(signal.to, "u2");
        assert_eq!(signal.payload.offer["sdp"], "v=0\r\n");

        let relayed = ServerEvent::Offer(SignalFrom {
            from: "u1".to_string(),
            payload: signal.payload,
        });
        let out = serde_json::to_value(&relayed).unwrap();
        assert_eq!(out["event"], "offer");
        assert_eq!(out["data"]["from"], "u1");
        assert_eq!(out["data"]["offer"]["type"], "offer");
        assert!(out["data"].get("to").is_none());
    }

    #[test]
    fn test_chat_defaults_to_public() {
        let frame = json!({
            "event": "chat-message",
            "data": {"roomCode": "abc-def-ghi", "content": "hi"}
        });
        let event: ClientEvent = serde_json::from_value(frame).unwrap();
        let ClientEvent::ChatMessage(chat) = event else {
            panic!("expected chat-message");
        };
        assert!(!chat.is_private);
        assert!(chat.recipient_id.is_none());
    }

    #[test]
    fn test_permissions_missing_fields_default_to_enabled() {
        let perms: Permissions = serde_json::from_value(json!({"chat": false})).unwrap();
        assert!(!perms.chat);
        assert!(perms.screen_share);
        assert!(perms.microphone);
        assert!(perms.camera);
    }

    #[test]
    fn test_permissions_merge() {
        let merged = Permissions::default().merged(&PermissionsPatch {
            camera: Some(false),
            ..PermissionsPatch::default()
        });
        assert!(!merged.camera);
        assert!(merged.chat);
    }

    #[test]
    fn test_public_settings_has_no_password_field() {
        let settings = PublicRoomSettings {
            require_password: true,
            is_locked: false,
            room_name: Some("Standup".to_string()),
            description: None,
            max_participants: 50,
            permissions: Permissions::default(),
            waiting_room_enabled: false,
            created_at: 1,
            updated_at: 2,
        };
        let value = serde_json::to_value(&settings).unwrap();
        assert!(value.get("password").is_none());
        assert!(value.get("passwordHash").is_none());
        assert_eq!(value["requirePassword"], true);
    }

    #[test]
    fn test_state_changed_omits_absent_fields() {
        let event = ServerEvent::StateChanged(StateChanged {
            user_id: "u1".to_string(),
            state: ParticipantStatePatch {
                audio_enabled: Some(false),
                ..ParticipantStatePatch::default()
            },
            timestamp: 10,
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "participant:state-changed");
        assert_eq!(value["data"]["state"], json!({"audioEnabled": false}));
    }

    #[test]
    fn test_error_event_shape() {
        let value = serde_json::to_value(ServerEvent::error(ErrorCode::RoomLocked, "Room is locked"))
            .unwrap();
        assert_eq!(
            value,
            json!({"event": "error", "data": {"code": "ROOM_LOCKED", "message": "Room is locked"}})
        );
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        let frame = json!({"event": "format-hard-drive", "data": {}});
        assert!(serde_json::from_value::<ClientEvent>(frame).is_err());
    }

    #[test]
    fn test_names_match_serde_tags() {
        let event = ClientEvent::GetSettings(RoomRef {
            room_code: "abc-def-ghi".to_string(),
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], event.name());
    }
}
