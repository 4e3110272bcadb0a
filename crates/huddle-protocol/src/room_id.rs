//! Room identifiers.
//!
//! A room is addressed by a short lowercase alphanumeric code (`ch4t`, `k9x2qa`).
//! Untrusted input is first normalized, then validated; only a validated
//! identifier can become a [`RoomId`].

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Minimum room identifier length.
pub const MIN_ROOM_ID_LENGTH: usize = 4;

/// Maximum room identifier length.
pub const MAX_ROOM_ID_LENGTH: usize = 6;

/// Characters a room identifier is drawn from.
pub const ROOM_ID_ALPHABET: &[u8; 36] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Rejected room identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid room id: {0:?}")]
pub struct InvalidRoomId(pub String);

/// Normalize untrusted input into room identifier form.
///
/// Strips everything outside `[a-z0-9]` and truncates to [`MAX_ROOM_ID_LENGTH`]
/// characters. Uppercase letters are dropped, not folded, so `"ABCDEFG"`
/// normalizes to an empty, invalid identifier.
#[must_use]
pub fn normalize(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .take(MAX_ROOM_ID_LENGTH)
        .collect()
}

/// Check whether `id` is exactly 4 to 6 characters of `[a-z0-9]`.
#[must_use]
pub fn is_valid(id: &str) -> bool {
    (MIN_ROOM_ID_LENGTH..=MAX_ROOM_ID_LENGTH).contains(&id.len())
        && id
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}

/// A normalized, validated room identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    /// Normalize and validate untrusted input.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidRoomId`] if the normalized form is not 4 to 6 characters long.
    pub fn parse(input: &str) -> Result<Self, InvalidRoomId> {
        let id = normalize(input);
        if is_valid(&id) {
            Ok(Self(id))
        } else {
            Err(InvalidRoomId(input.to_string()))
        }
    }

    /// Generate a random identifier.
    ///
    /// Length is uniform over {4, 5, 6}; each character is uniform over [`ROOM_ID_ALPHABET`].
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let len = rng.random_range(MIN_ROOM_ID_LENGTH..=MAX_ROOM_ID_LENGTH);
        let id = (0..len)
            .map(|_| ROOM_ID_ALPHABET[rng.random_range(0..ROOM_ID_ALPHABET.len())] as char)
            .collect();
        Self(id)
    }

    /// Get the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RoomId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RoomId {
    type Error = InvalidRoomId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RoomId> for String {
    fn from(id: RoomId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("ch4t"), "ch4t");
        assert_eq!(normalize("CH4T"), "4");
        assert_eq!(normalize(" c-h_4 t!"), "ch4t");
        assert_eq!(normalize("abcdefghij"), "abcdef");
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("äbcd"), "bcd");
    }

    #[test]
    fn test_is_valid() {
        assert!(is_valid("ch4t"));
        assert!(is_valid("abc123"));
        assert!(!is_valid("ab"));
        assert!(!is_valid("abc"));
        assert!(!is_valid("abcdefg"));
        assert!(!is_valid("ABCD"));
        assert!(!is_valid("a b"));
        assert!(!is_valid(""));
    }

    #[test]
    fn test_rejected_ids() {
        for input in ["ab", "ABCDEFG", "a b", "", "Ch4t"] {
            assert!(RoomId::parse(input).is_err(), "{input:?} should be rejected");
        }
        // Separators are stripped and long input truncated before validating.
        assert_eq!(RoomId::parse("ch-4t").unwrap().as_str(), "ch4t");
        assert_eq!(RoomId::parse("abcdefgh").unwrap().as_str(), "abcdef");
    }

    #[test]
    fn test_generate_is_valid() {
        for _ in 0..500 {
            let id = RoomId::generate();
            assert!(is_valid(id.as_str()), "generated {id}");
        }
    }

    #[test]
    fn test_generate_covers_all_lengths() {
        let mut seen = [false; 3];
        for _ in 0..1000 {
            seen[RoomId::generate().as_str().len() - MIN_ROOM_ID_LENGTH] = true;
        }
        assert_eq!(seen, [true, true, true]);
    }

    #[test]
    fn test_serde_validates() {
        let id: RoomId = serde_json::from_str("\"ch4t\"").unwrap();
        assert_eq!(id.as_str(), "ch4t");
        assert!(serde_json::from_str::<RoomId>("\"ab\"").is_err());
    }

    mod proptests {
        use super::super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn normalize_is_idempotent(input in ".*") {
                let once = normalize(&input);
                prop_assert_eq!(normalize(&once), once);
            }

            #[test]
            fn normalize_output_shape(input in ".*") {
                let out = normalize(&input);
                prop_assert!(out.len() <= MAX_ROOM_ID_LENGTH);
                prop_assert!(out.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()));
            }

            #[test]
            fn valid_matches_pattern(input in "[a-zA-Z0-9 _-]{0,9}") {
                let expected = (4..=6).contains(&input.len())
                    && input.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit());
                prop_assert_eq!(is_valid(&input), expected);
            }
        }
    }
}
