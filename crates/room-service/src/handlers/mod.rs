//! HTTP request handlers for the room service.

pub mod health;
pub mod metrics;
pub mod rooms;

pub use health::{health_check, readiness_check};
pub use metrics::metrics_handler;
pub use rooms::{
    check_access, create_room, get_history, get_host, get_room_settings, update_room_settings,
    validate_password,
};
