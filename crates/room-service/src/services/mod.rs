//! Room service business logic.
//!
//! - [`room_lifecycle`] - room creation, membership, teardown, history
//! - [`waiting_room`] - admission queue
//! - [`settings`] - settings, password gate, capability permissions

pub mod room_lifecycle;
pub mod settings;
pub mod waiting_room;

pub use room_lifecycle::{CreateRoomOptions, JoinOutcome, JoinRequest, LeaveOutcome, RoomLifecycle};
pub use settings::{check_permission, Capability, SettingsEngine};
pub use waiting_room::WaitingRoomGate;
