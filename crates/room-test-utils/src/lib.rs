//! # Room Test Utilities
//!
//! Shared test utilities for the room service.
//!
//! - `fixtures` - In-memory service wiring on a manual clock
//! - `test_client` - Scripted broker connection that records server events
//! - `failing` - Session store and history log wrappers that inject failures
//! - `server_harness` - Real HTTP server on a random port
//!
//! ## Usage
//!
//! ```rust,ignore
//! use room_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let env = TestEnv::new();
//!     let mut alice = env.client();
//!     alice.join("abc-def-ghi", "alice", "Alice").await;
//!     alice.expect("room-joined").await;
//! }
//! ```

pub mod failing;
pub mod fixtures;
pub mod server_harness;
pub mod test_client;

pub use failing::*;
pub use fixtures::*;
pub use server_harness::*;
pub use test_client::*;
