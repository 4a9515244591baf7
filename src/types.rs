//! Basic type definitions for the chat server
//!
//! Provides newtype wrappers for type safety:
//! - `UserId`, `ConversationId`: UUID identifiers owned by the relational store
//! - `MessageId`: store-assigned integer id of a committed message
//! - `ConnectionId`, `InstanceId`: per-socket and per-process identifiers
//! - `ShortCode`: 8-character shareable contact handle derived from a `UserId`
//! - `TempId`: client-visible correlation id of a provisional message

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Length of a short code in characters
pub const SHORT_CODE_LEN: usize = 8;

macro_rules! uuid_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new random id
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_newtype!(
    /// User identifier issued by the external identity provider
    UserId
);
uuid_newtype!(
    /// 1:1 conversation identifier
    ConversationId
);
uuid_newtype!(
    /// Unique identifier of one live WebSocket connection
    ConnectionId
);
uuid_newtype!(
    /// Identifier of one server process sharing the fanout bus
    InstanceId
);

/// Store-assigned message id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Short public code of a user
///
/// The first eight characters of the hyphenated user id. Truncation can collide;
/// lookups detect more than one match rather than picking one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShortCode(String);

impl ShortCode {
    /// Derive the code of a user
    pub fn of(user_id: &UserId) -> Self {
        let full = user_id.0.hyphenated().to_string();
        Self(full[..SHORT_CODE_LEN].to_string())
    }

    /// Normalise user input into a code
    ///
    /// Trims whitespace and lowercases. Returns None unless the result is exactly
    /// eight hex digits.
    pub fn parse(input: &str) -> Option<Self> {
        let code = input.trim().to_lowercase();
        if code.len() == SHORT_CODE_LEN && code.chars().all(|c| c.is_ascii_hexdigit()) {
            Some(Self(code))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShortCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Temporary id of a provisional message
///
/// Format: `tmp_<unix millis>_<9 random lowercase alphanumerics>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TempId(pub String);

impl TempId {
    /// Generate a fresh temporary id
    pub fn generate() -> Self {
        let suffix: String = rand::thread_rng()
            .sample_iter(&rand::distributions::Alphanumeric)
            .take(9)
            .map(char::from)
            .collect::<String>()
            .to_lowercase();
        Self(format!(
            "tmp_{}_{}",
            chrono::Utc::now().timestamp_millis(),
            suffix
        ))
    }
}

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_short_code_is_id_prefix() {
        let user = UserId(Uuid::parse_str("abc12345-0000-4000-8000-000000000001").unwrap());
        assert_eq!(ShortCode::of(&user).as_str(), "abc12345");
    }

    #[test]
    fn test_short_code_parse_normalises() {
        let code = ShortCode::parse("  ABC12345 ").unwrap();
        assert_eq!(code.as_str(), "abc12345");
    }

    #[test]
    fn test_short_code_parse_rejects_bad_input() {
        assert!(ShortCode::parse("abc").is_none());
        assert!(ShortCode::parse("abc123456").is_none());
        assert!(ShortCode::parse("zzzzzzzz").is_none());
    }

    #[test]
    fn test_temp_id_unique_and_prefixed() {
        let a = TempId::generate();
        let b = TempId::generate();
        assert_ne!(a, b);
        assert!(a.0.starts_with("tmp_"));
    }
}
