//! Common data types for Huddle components.

use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Alphabet for room code characters.
const ROOM_CODE_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

/// Number of dash-separated groups in a room code.
const ROOM_CODE_GROUPS: usize = 3;

/// Characters per group.
const ROOM_CODE_GROUP_LEN: usize = 3;

/// Largest multiple of the alphabet size that fits in a byte. Random bytes at
/// or above this value are rejected so every letter is equally likely.
const ROOM_CODE_REJECTION_BOUND: u8 = 234;

/// Errors produced when generating or parsing a room code.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoomCodeError {
    /// The input does not match the `abc-def-ghi` shape.
    #[error("Malformed room code")]
    Malformed,

    /// The system CSPRNG failed.
    #[error("Random number generator failure")]
    Rng,
}

/// Human-shareable room identifier: three lowercase letter triplets joined by
/// dashes, e.g. `kfp-zqa-mtd`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomCode(String);

impl RoomCode {
    /// Generate a fresh random room code using the system CSPRNG.
    ///
    /// # Errors
    ///
    /// Returns [`RoomCodeError::Rng`] if the CSPRNG cannot produce bytes.
    pub fn generate() -> Result<Self, RoomCodeError> {
        let rng = SystemRandom::new();
        let needed = ROOM_CODE_GROUPS * ROOM_CODE_GROUP_LEN;
        let mut letters = Vec::with_capacity(needed);
        let mut buf = [0u8; 16];

        while letters.len() < needed {
            rng.fill(&mut buf).map_err(|_| RoomCodeError::Rng)?;
            for &b in &buf {
                if b >= ROOM_CODE_REJECTION_BOUND {
                    continue;
                }
                let idx = usize::from(b) % ROOM_CODE_ALPHABET.len();
                if let Some(&ch) = ROOM_CODE_ALPHABET.get(idx) {
                    letters.push(char::from(ch));
                }
                if letters.len() == needed {
                    break;
                }
            }
        }

        let code = letters
            .chunks(ROOM_CODE_GROUP_LEN)
            .map(|group| group.iter().collect::<String>())
            .collect::<Vec<_>>()
            .join("-");

        Ok(Self(code))
    }

    /// Parse a client-supplied room code.
    ///
    /// Surrounding whitespace is trimmed and letters are lowercased. Codes
    /// created by older clients without dashes (`abcdefghi`) are accepted and
    /// normalized to the dashed form.
    ///
    /// # Errors
    ///
    /// Returns [`RoomCodeError::Malformed`] if the input is not nine ASCII
    /// letters, optionally grouped by dashes into triplets.
    pub fn parse(input: &str) -> Result<Self, RoomCodeError> {
        let normalized = input.trim().to_ascii_lowercase();
        let letters: String = normalized.chars().filter(|c| *c != '-').collect();

        if letters.len() != ROOM_CODE_GROUPS * ROOM_CODE_GROUP_LEN
            || !letters.chars().all(|c| c.is_ascii_lowercase())
        {
            return Err(RoomCodeError::Malformed);
        }

        let dashes = normalized.chars().filter(|c| *c == '-').count();
        if dashes != 0 && dashes != ROOM_CODE_GROUPS - 1 {
            return Err(RoomCodeError::Malformed);
        }
        if dashes != 0
            && normalized
                .split('-')
                .any(|group| group.len() != ROOM_CODE_GROUP_LEN)
        {
            return Err(RoomCodeError::Malformed);
        }

        let chars: Vec<char> = letters.chars().collect();
        let code = chars
            .chunks(ROOM_CODE_GROUP_LEN)
            .map(|group| group.iter().collect::<String>())
            .collect::<Vec<_>>()
            .join("-");

        Ok(Self(code))
    }

    /// Borrow the code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RoomCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
