//! Wire protocol for Huddle room signaling.
//!
//! Clients and the room service exchange JSON text frames over a persistent
//! connection. Each frame is an envelope `{"event": "<name>", "data": {...}}`
//! where payload fields are camelCase. SDP offers/answers and ICE candidates
//! are carried as opaque JSON values and never interpreted by the server.
//!
//! The [`negotiation`] module holds the client-side peer-connection contract
//! (glare resolution and ICE candidate queueing) that the message design
//! depends on.

#![warn(clippy::pedantic)]

pub mod error_code;
pub mod events;
pub mod negotiation;

pub use error_code::ErrorCode;
pub use events::{ClientEvent, ServerEvent};
