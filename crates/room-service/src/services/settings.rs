//! Room Settings & Permission Engine.
//!
//! Settings live in `room:{code}:settings` as JSON. Reads always return a
//! structurally complete record (defaults merged in). Updates replace the
//! record with a compare-and-swap. Only the public view
//! produced by [`RoomSettings::to_public`] leaves the service.
//!
//! # Security
//!
//! - Passwords are hashed with bcrypt on a blocking thread
//! - Verification uses `bcrypt::verify` (constant-time comparison)
//! - Hashes and plaintexts are never logged

use crate::errors::{RoomError, StoreError};
use crate::models::RoomSettings;
use crate::store::{RoomKeys, SessionStore};
use common::clock::Clock;
use common::types::RoomCode;
use signaling_protocol::events::{Password, PermissionsPatch, PublicRoomSettings, SettingsPatch};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

/// Compare-and-swap rounds before an update gives up.
const MAX_UPDATE_ATTEMPTS: u32 = 5;

/// A capability the host can withhold from participants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Chat,
    ScreenShare,
    Microphone,
    Camera,
}

impl Capability {
    /// Human-readable name used in error messages.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Capability::Chat => "chat",
            Capability::ScreenShare => "screen sharing",
            Capability::Microphone => "microphones",
            Capability::Camera => "cameras",
        }
    }
}

/// Settings service.
pub struct SettingsEngine {
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    room_ttl: Duration,
    bcrypt_cost: u32,
    default_max_participants: u32,
}

impl SettingsEngine {
    #[must_use]
    pub fn new(
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        room_ttl: Duration,
        bcrypt_cost: u32,
        default_max_participants: u32,
    ) -> Self {
        Self {
            store,
            clock,
            room_ttl,
            bcrypt_cost,
            default_max_participants,
        }
    }

    /// Default settings stamped with the current time.
    #[must_use]
    pub fn defaults(&self) -> RoomSettings {
        RoomSettings::defaults(self.default_max_participants, self.clock.now_ms())
    }

    /// Settings for a room created through the HTTP API.
    ///
    /// # Errors
    ///
    /// Returns `RoomError::Internal` if password hashing fails.
    pub async fn initial_settings(
        &self,
        permissions: Option<&PermissionsPatch>,
        waiting_room_enabled: Option<bool>,
        password: Option<&Password>,
    ) -> Result<RoomSettings, RoomError> {
        let mut settings = self.defaults();
        if let Some(patch) = permissions {
            settings.permissions = settings.permissions.merged(patch);
        }
        if let Some(enabled) = waiting_room_enabled {
            settings.waiting_room_enabled = enabled;
        }
        if let Some(password) = password.filter(|p| !p.expose().is_empty()) {
            settings.password_hash = Some(self.hash_password(password).await?);
            settings.require_password = true;
        }
        Ok(settings)
    }

    /// Full stored settings, defaults merged.
    ///
    /// A code with no room reads as defaults. A live room whose settings
    /// record is missing is corrupt and fails closed, so its password and
    /// lock are never silently dropped.
    pub async fn get_settings(&self, code: &RoomCode) -> Result<RoomSettings, RoomError> {
        Ok(self.load(code).await?.1)
    }

    /// Settings without the password hash.
    pub async fn get_public_settings(
        &self,
        code: &RoomCode,
    ) -> Result<PublicRoomSettings, RoomError> {
        Ok(self.get_settings(code).await?.to_public())
    }

    /// Merge a partial update into the stored settings.
    ///
    /// Callers must have verified the host. The password is re-hashed only
    /// when a new one is supplied; an empty password clears it. The write is
    /// a compare-and-swap against the record the patch was applied to, so
    /// concurrent updates from the socket and HTTP API never drop each
    /// other's fields. The TTL is refreshed on every update.
    ///
    /// # Errors
    ///
    /// - `RoomError::InvalidMessage` - password required without a password,
    ///   or `maxParticipants` of zero
    /// - `RoomError::Store` - store failure or a corrupt record
    /// - `RoomError::Internal` - the record kept changing under every retry
    #[instrument(skip_all, fields(room_code = %code))]
    pub async fn update_settings(
        &self,
        code: &RoomCode,
        patch: &SettingsPatch,
    ) -> Result<RoomSettings, RoomError> {
        let password = match &patch.password {
            None => PasswordChange::Keep,
            Some(p) if p.expose().is_empty() => PasswordChange::Clear,
            Some(p) => PasswordChange::Set(self.hash_password(p).await?),
        };
        let key = RoomKeys::new(code).settings;

        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let (current, mut settings) = self.load(code).await?;
            apply_patch(&mut settings, patch, &password)?;
            settings.updated_at = self.clock.now_ms();

            let json = serde_json::to_string(&settings)
                .map_err(|e| RoomError::Internal(format!("failed to encode settings: {e}")))?;
            if self
                .store
                .compare_and_swap(&key, current.as_deref(), &json, self.room_ttl)
                .await?
            {
                debug!(
                    target: "room.settings",
                    room_code = %code,
                    is_locked = settings.is_locked,
                    require_password = settings.require_password,
                    waiting_room_enabled = settings.waiting_room_enabled,
                    "Settings updated"
                );
                return Ok(settings);
            }
            debug!(target: "room.settings", room_code = %code, attempt, "Settings changed concurrently, retrying");
        }

        warn!(target: "room.settings", room_code = %code, "Settings update gave up after repeated conflicts");
        Err(RoomError::Internal(format!(
            "settings for {code} kept changing during update"
        )))
    }

    /// `true` if the room does not require a password or `password` matches.
    pub async fn validate_password(
        &self,
        code: &RoomCode,
        password: &Password,
    ) -> Result<bool, RoomError> {
        let settings = self.get_settings(code).await?;
        match self.check_password(&settings, Some(password)).await {
            Ok(()) => Ok(true),
            Err(RoomError::PasswordRequired | RoomError::InvalidPassword) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Enforce the password gate for a join.
    ///
    /// A room that requires a password but has no stored hash admits nobody.
    ///
    /// # Errors
    ///
    /// - `RoomError::PasswordRequired` - none supplied
    /// - `RoomError::InvalidPassword` - mismatch
    pub async fn check_password(
        &self,
        settings: &RoomSettings,
        supplied: Option<&Password>,
    ) -> Result<(), RoomError> {
        if !settings.require_password {
            return Ok(());
        }
        let Some(supplied) = supplied.filter(|p| !p.expose().is_empty()) else {
            return Err(RoomError::PasswordRequired);
        };
        let Some(hash) = settings.password_hash.clone() else {
            return Err(RoomError::InvalidPassword);
        };

        let plaintext = supplied.expose().to_string();
        let matches = tokio::task::spawn_blocking(move || bcrypt::verify(plaintext, &hash))
            .await
            .map_err(|e| RoomError::Internal(format!("password verification task failed: {e}")))?
            .unwrap_or(false);

        if matches {
            Ok(())
        } else {
            Err(RoomError::InvalidPassword)
        }
    }

    async fn hash_password(&self, password: &Password) -> Result<String, RoomError> {
        let plaintext = password.expose().to_string();
        let cost = self.bcrypt_cost;
        tokio::task::spawn_blocking(move || bcrypt::hash(plaintext, cost))
            .await
            .map_err(|e| RoomError::Internal(format!("password hashing task failed: {e}")))?
            .map_err(|e| RoomError::Internal(format!("password hashing failed: {e}")))
    }

    /// Raw stored record alongside its decoded form.
    async fn load(&self, code: &RoomCode) -> Result<(Option<String>, RoomSettings), RoomError> {
        let keys = RoomKeys::new(code);
        match self.store.get(&keys.settings).await? {
            Some(json) => {
                let settings = serde_json::from_str(&json).map_err(|e| {
                    RoomError::Store(StoreError::Corrupt(format!("settings for {code}: {e}")))
                })?;
                Ok((Some(json), settings))
            }
            None if self.store.hash_len(&keys.room).await? > 0 => {
                error!(target: "room.settings", room_code = %code, "Live room has no settings record");
                Err(RoomError::Store(StoreError::Corrupt(format!(
                    "room {code} has no settings"
                ))))
            }
            None => Ok((None, self.defaults())),
        }
    }
}

/// How an update treats the stored password hash.
enum PasswordChange {
    Keep,
    Clear,
    Set(String),
}

fn apply_patch(
    settings: &mut RoomSettings,
    patch: &SettingsPatch,
    password: &PasswordChange,
) -> Result<(), RoomError> {
    match password {
        PasswordChange::Keep => {}
        PasswordChange::Clear => {
            settings.password_hash = None;
            settings.require_password = false;
        }
        PasswordChange::Set(hash) => {
            settings.password_hash = Some(hash.clone());
            settings.require_password = true;
        }
    }
    if let Some(require) = patch.require_password {
        settings.require_password = require;
    }
    if settings.require_password && settings.password_hash.is_none() {
        return Err(RoomError::InvalidMessage(
            "A password must be set before requiring one".to_string(),
        ));
    }

    if let Some(locked) = patch.is_locked {
        settings.is_locked = locked;
    }
    if let Some(name) = &patch.room_name {
        settings.room_name = Some(name.clone()).filter(|n| !n.trim().is_empty());
    }
    if let Some(description) = &patch.description {
        settings.description = Some(description.clone()).filter(|d| !d.trim().is_empty());
    }
    if let Some(max) = patch.max_participants {
        if max == 0 {
            return Err(RoomError::InvalidMessage(
                "maxParticipants must be at least 1".to_string(),
            ));
        }
        settings.max_participants = max;
    }
    if let Some(permissions) = &patch.permissions {
        settings.permissions = settings.permissions.merged(permissions);
    }
    if let Some(enabled) = patch.waiting_room_enabled {
        settings.waiting_room_enabled = enabled;
    }
    Ok(())
}

/// Enforce a capability for a non-host. Hosts always pass.
///
/// # Errors
///
/// Returns `RoomError::PermissionDenied` if the capability is withheld.
pub fn check_permission(
    settings: &RoomSettings,
    is_host: bool,
    capability: Capability,
) -> Result<(), RoomError> {
    if is_host {
        return Ok(());
    }
    let allowed = match capability {
        Capability::Chat => settings.permissions.chat,
        Capability::ScreenShare => settings.permissions.screen_share,
        Capability::Microphone => settings.permissions.microphone,
        Capability::Camera => settings.permissions.camera,
    };
    if allowed {
        Ok(())
    } else {
        Err(RoomError::PermissionDenied(capability.label()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::MemorySessionStore;
    use common::clock::ManualClock;

    fn engine() -> (Arc<ManualClock>, SettingsEngine) {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = Arc::new(MemorySessionStore::new(clock.clone()));
        let engine = SettingsEngine::new(store, clock.clone(), Duration::from_secs(86_400), 4, 50);
        (clock, engine)
    }

    fn code() -> RoomCode {
        RoomCode::parse("abc-def-ghi").unwrap()
    }

    fn password_patch(pw: &str) -> SettingsPatch {
        SettingsPatch {
            password: Some(Password::new(pw)),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_missing_settings_read_as_defaults() {
        let (_, engine) = engine();
        let settings = engine.get_settings(&code()).await.unwrap();
        assert!(!settings.require_password);
        assert!(!settings.is_locked);
        assert!(settings.permissions.chat);
        assert_eq!(settings.max_participants, 50);
    }

    #[tokio::test]
    async fn test_live_room_without_settings_fails_closed() {
        let (_, engine) = engine();
        let keys = RoomKeys::new(&code());
        engine
            .store
            .hash_set(&keys.room, "host_id", "host")
            .await
            .unwrap();

        assert!(matches!(
            engine.get_settings(&code()).await,
            Err(RoomError::Store(StoreError::Corrupt(_)))
        ));
        assert!(engine
            .validate_password(&code(), &Password::new("anything"))
            .await
            .is_err());
        assert!(engine
            .update_settings(&code(), &password_patch("pw"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_password_round_trip() {
        let (_, engine) = engine();
        engine
            .update_settings(&code(), &password_patch("s3cret"))
            .await
            .unwrap();

        assert!(engine
            .validate_password(&code(), &Password::new("s3cret"))
            .await
            .unwrap());
        assert!(!engine
            .validate_password(&code(), &Password::new("wrong"))
            .await
            .unwrap());

        let public = serde_json::to_string(&engine.get_public_settings(&code()).await.unwrap())
            .unwrap();
        assert!(!public.contains("$2"));
        assert!(!public.contains("passwordHash"));
        assert!(public.contains("\"requirePassword\":true"));
    }

    #[tokio::test]
    async fn test_no_password_required_always_validates() {
        let (_, engine) = engine();
        assert!(engine
            .validate_password(&code(), &Password::new("anything"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_check_password_distinguishes_missing_and_wrong() {
        let (_, engine) = engine();
        let settings = engine
            .update_settings(&code(), &password_patch("pw"))
            .await
            .unwrap();

        assert!(matches!(
            engine.check_password(&settings, None).await,
            Err(RoomError::PasswordRequired)
        ));
        assert!(matches!(
            engine
                .check_password(&settings, Some(&Password::new("nope")))
                .await,
            Err(RoomError::InvalidPassword)
        ));
        assert!(engine
            .check_password(&settings, Some(&Password::new("pw")))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_empty_password_clears_requirement() {
        let (_, engine) = engine();
        engine
            .update_settings(&code(), &password_patch("pw"))
            .await
            .unwrap();
        let cleared = engine
            .update_settings(&code(), &password_patch(""))
            .await
            .unwrap();
        assert!(!cleared.require_password);
        assert!(cleared.password_hash.is_none());
    }

    #[tokio::test]
    async fn test_require_password_without_password_rejected() {
        let (_, engine) = engine();
        let patch = SettingsPatch {
            require_password: Some(true),
            ..Default::default()
        };
        assert!(matches!(
            engine.update_settings(&code(), &patch).await,
            Err(RoomError::InvalidMessage(_))
        ));
    }

    #[tokio::test]
    async fn test_partial_update_keeps_other_fields_and_hash() {
        let (clock, engine) = engine();
        let first = engine
            .update_settings(&code(), &password_patch("pw"))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(5));
        let patch = SettingsPatch {
            is_locked: Some(true),
            permissions: Some(PermissionsPatch {
                chat: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        };
        let second = engine.update_settings(&code(), &patch).await.unwrap();

        assert!(second.is_locked);
        assert!(!second.permissions.chat);
        assert!(second.permissions.camera);
        assert_eq!(second.password_hash, first.password_hash);
        assert!(second.updated_at > first.updated_at);
    }

    #[tokio::test]
    async fn test_zero_max_participants_rejected() {
        let (_, engine) = engine();
        let patch = SettingsPatch {
            max_participants: Some(0),
            ..Default::default()
        };
        assert!(engine.update_settings(&code(), &patch).await.is_err());
    }

    #[test]
    fn test_check_permission() {
        let mut settings = RoomSettings::defaults(10, 0);
        settings.permissions.screen_share = false;

        assert!(check_permission(&settings, false, Capability::Chat).is_ok());
        assert!(matches!(
            check_permission(&settings, false, Capability::ScreenShare),
            Err(RoomError::PermissionDenied("screen sharing"))
        ));
        assert!(check_permission(&settings, true, Capability::ScreenShare).is_ok());
    }

    #[tokio::test]
    async fn test_initial_settings() {
        let (_, engine) = engine();
        let settings = engine
            .initial_settings(
                Some(&PermissionsPatch {
                    camera: Some(false),
                    ..Default::default()
                }),
                Some(true),
                Some(&Password::new("pw")),
            )
            .await
            .unwrap();

        assert!(!settings.permissions.camera);
        assert!(settings.waiting_room_enabled);
        assert!(settings.require_password);
        assert!(settings.password_hash.is_some());
    }
}
