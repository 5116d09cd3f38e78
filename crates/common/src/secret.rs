//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports [`secrecy`] types. Room passwords, password hashes and store
//! connection URLs are carried as `SecretString` so that deriving `Debug` on a
//! request or config struct never prints them.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct JoinAttempt {
//!     room_code: String,
//!     password: SecretString,
//! }
//!
//! let attempt = JoinAttempt {
//!     room_code: "abc-def-ghi".to_string(),
//!     password: SecretString::from("hunter2"),
//! };
//!
//! assert!(!format!("{attempt:?}").contains("hunter2"));
//! assert_eq!(attempt.password.expose_secret(), "hunter2");
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretString::from("hunter2");
        let debug_str = format!("{secret:?}");

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("hunter2"));
    }

    #[test]
    fn test_deserialized_password_is_redacted() {
        #[allow(dead_code)]
        #[derive(Debug, Deserialize)]
        struct PasswordCheck {
            password: SecretString,
        }

        let json = r#"{"password": "open-sesame"}"#;
        let check: PasswordCheck = serde_json::from_str(json).expect("deserialize");

        assert_eq!(check.password.expose_secret(), "open-sesame");
        assert!(!format!("{check:?}").contains("open-sesame"));
    }
}
