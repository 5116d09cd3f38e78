//! Common utilities and types shared across Huddle components.

#![warn(clippy::pedantic)]

/// Module for wall-clock abstraction (system and manually driven clocks)
pub mod clock;

/// Module for common data types
pub mod types;

/// Module for secret types that prevent accidental logging
pub mod secret;
