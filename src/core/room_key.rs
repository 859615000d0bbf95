//! Room key resolution
//!
//! A room is addressed either by a 64-hex private id handed out by
//! `POST /api/room`, or by a short public name. Public names are hashed into
//! the same 64-hex id space so the rest of the system only sees [`RoomId`].

use rand::Rng;
use sha2::{Digest, Sha256};
use std::fmt;

use crate::constants::{MAX_ROOM_NAME_LENGTH, ROOM_ID_LENGTH};
use crate::error::{ChatError, Result};

/// Canonical identifier of a room actor
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomId(String);

impl RoomId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A parsed room token from the request path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomKey {
    Private(String),
    Public(String),
}

impl RoomKey {
    /// Parse a token from the URL.
    ///
    /// Hex ids are accepted in either case. Anything else must be at most 32
    /// characters; it is reduced to `[a-z0-9_-]` and must not end up empty.
    pub fn parse(token: &str) -> Result<Self> {
        if is_private_id(token) {
            return Ok(RoomKey::Private(token.to_ascii_lowercase()));
        }

        if token.chars().count() > MAX_ROOM_NAME_LENGTH {
            return Err(ChatError::InvalidRoomKey("Name too long".to_string()));
        }

        let name: String = token
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
            .collect::<String>()
            .to_ascii_lowercase();

        if name.is_empty() {
            return Err(ChatError::InvalidRoomKey("Name is empty".to_string()));
        }

        Ok(RoomKey::Public(name))
    }

    /// Mint a fresh private room
    pub fn new_private() -> Self {
        let bytes: [u8; 32] = rand::thread_rng().gen();
        RoomKey::Private(bytes.iter().map(|b| format!("{:02x}", b)).collect())
    }

    pub fn room_id(&self) -> RoomId {
        match self {
            RoomKey::Private(id) => RoomId(id.clone()),
            RoomKey::Public(name) => {
                let digest = Sha256::digest(format!("public:{}", name).as_bytes());
                RoomId(format!("{:x}", digest))
            }
        }
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomKey::Private(id) => f.write_str(id),
            RoomKey::Public(name) => f.write_str(name),
        }
    }
}

fn is_private_id(token: &str) -> bool {
    token.len() == ROOM_ID_LENGTH && token.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_names_are_sanitized() {
        assert_eq!(
            RoomKey::parse("General!").unwrap(),
            RoomKey::Public("general".to_string())
        );
        assert_eq!(
            RoomKey::parse("rust_lang-2024").unwrap(),
            RoomKey::Public("rust_lang-2024".to_string())
        );
    }

    #[test]
    fn test_public_names_are_case_insensitive() {
        let a = RoomKey::parse("General").unwrap().room_id();
        let b = RoomKey::parse("general").unwrap().room_id();
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), ROOM_ID_LENGTH);
    }

    #[test]
    fn test_private_ids_pass_through() {
        let token = "AB".repeat(32);
        let key = RoomKey::parse(&token).unwrap();
        assert_eq!(key, RoomKey::Private("ab".repeat(32)));
        assert_eq!(key.room_id().as_str(), "ab".repeat(32));
    }

    #[test]
    fn test_long_tokens_rejected() {
        assert!(RoomKey::parse(&"a".repeat(33)).is_err());
        // 64 chars but not hex
        assert!(RoomKey::parse(&"z".repeat(64)).is_err());
        assert!(RoomKey::parse(&"a".repeat(32)).is_ok());
    }

    #[test]
    fn test_empty_after_sanitizing_rejected() {
        assert!(RoomKey::parse("!!!").is_err());
        assert!(RoomKey::parse("").is_err());
    }

    #[test]
    fn test_new_private_rooms_are_unique_hex() {
        let a = RoomKey::new_private();
        let b = RoomKey::new_private();
        assert_ne!(a, b);
        assert!(is_private_id(&a.to_string()));
        assert_eq!(RoomKey::parse(&a.to_string()).unwrap(), a);
    }
}
