use std::error::Error;
use std::fmt;

use crate::constants::{MAX_MESSAGE_LENGTH, MAX_NAME_LENGTH};

/// Every failure the chat subsystem can produce.
///
/// The `Display` text doubles as the body of `{error}` frames sent back to
/// clients, so keep it readable.
#[derive(Debug)]
pub enum ChatError {
    // Storage errors
    StorageError(String),

    // Protocol errors
    MessageParseError(String),
    MessageTooLong(usize),
    NameTooLong(usize),
    NameRequired,
    NameAlreadySet,

    // Admission errors
    RateLimited,
    LimiterUnavailable(String),

    // Room errors
    RoomUnavailable(String),
    InvalidRoomKey(String),

    // Configuration errors
    ConfigError(String),
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StorageError(msg) => write!(f, "Storage error: {}", msg),
            Self::MessageParseError(msg) => write!(f, "Malformed frame: {}", msg),
            Self::MessageTooLong(len) => write!(
                f,
                "Message too long: {} characters (max {})",
                len, MAX_MESSAGE_LENGTH
            ),
            Self::NameTooLong(len) => write!(
                f,
                "Name too long: {} characters (max {})",
                len, MAX_NAME_LENGTH
            ),
            Self::NameRequired => write!(f, "Please choose a name before sending messages"),
            Self::NameAlreadySet => write!(f, "Name is already set for this connection"),
            Self::RateLimited => {
                write!(f, "Your IP is being rate-limited, please try again later.")
            }
            Self::LimiterUnavailable(msg) => write!(f, "Rate limiter unavailable: {}", msg),
            Self::RoomUnavailable(msg) => write!(f, "Room unavailable: {}", msg),
            Self::InvalidRoomKey(msg) => write!(f, "Invalid room key: {}", msg),
            Self::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl Error for ChatError {}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::MessageParseError(err.to_string())
    }
}

impl From<std::io::Error> for ChatError {
    fn from(err: std::io::Error) -> Self {
        ChatError::StorageError(err.to_string())
    }
}

// Generic result type for the chat subsystem
pub type Result<T> = std::result::Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_facing_messages() {
        assert_eq!(
            ChatError::RateLimited.to_string(),
            "Your IP is being rate-limited, please try again later."
        );
        assert!(ChatError::MessageTooLong(300).to_string().contains("300"));
        assert!(ChatError::NameTooLong(33).to_string().contains("max 32"));
    }

    #[test]
    fn test_json_errors_become_parse_errors() {
        let err: ChatError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, ChatError::MessageParseError(_)));
    }
}
