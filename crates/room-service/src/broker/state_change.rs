//! Participant state changes and their listeners.
//!
//! A toggle or unified state update produces one [`StateChange`]. Each
//! registered listener turns it into at most one outbound event, so the
//! unified `participant:state-changed` event and the legacy
//! `audio-changed`/`video-changed` events come from one code path.

use common::types::RoomCode;
use signaling_protocol::events::{MediaChanged, ParticipantStatePatch, StateChanged};
use signaling_protocol::ServerEvent;

/// A change to one participant's media/presentation state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub room_code: RoomCode,
    pub user_id: String,
    pub patch: ParticipantStatePatch,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

/// Maps a state change to an outbound room event.
pub trait StateChangeListener: Send + Sync {
    fn on_change(&self, change: &StateChange) -> Option<ServerEvent>;
}

/// Emits `participant:state-changed` for every change.
#[derive(Debug, Default)]
pub struct UnifiedStateListener;

impl StateChangeListener for UnifiedStateListener {
    fn on_change(&self, change: &StateChange) -> Option<ServerEvent> {
        Some(ServerEvent::StateChanged(StateChanged {
            user_id: change.user_id.clone(),
            state: change.patch.clone(),
            timestamp: change.timestamp,
        }))
    }
}

/// Emits legacy `audio-changed` when audio changed.
#[derive(Debug, Default)]
pub struct LegacyAudioListener;

impl StateChangeListener for LegacyAudioListener {
    fn on_change(&self, change: &StateChange) -> Option<ServerEvent> {
        change.patch.audio_enabled.map(|enabled| {
            ServerEvent::AudioChanged(MediaChanged {
                user_id: change.user_id.clone(),
                enabled,
            })
        })
    }
}

/// Emits legacy `video-changed` when video changed.
#[derive(Debug, Default)]
pub struct LegacyVideoListener;

impl StateChangeListener for LegacyVideoListener {
    fn on_change(&self, change: &StateChange) -> Option<ServerEvent> {
        change.patch.video_enabled.map(|enabled| {
            ServerEvent::VideoChanged(MediaChanged {
                user_id: change.user_id.clone(),
                enabled,
            })
        })
    }
}

/// Listeners registered on every broker.
#[must_use]
pub fn default_listeners() -> Vec<Box<dyn StateChangeListener>> {
    vec![
        Box::new(UnifiedStateListener),
        Box::new(LegacyAudioListener),
        Box::new(LegacyVideoListener),
    ]
}
