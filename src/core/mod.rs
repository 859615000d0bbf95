//! Core functionality for the chat server

pub mod ip_extractor;
pub mod limiter_client;
pub mod message;
pub mod rate_limiter;
pub mod room;
pub mod room_key;
pub mod session;

// Re-export main components for convenience
pub use limiter_client::RateLimiterClient;
pub use message::{ChatMessage, ClientFrame, ServerFrame};
pub use rate_limiter::{RateLimiterDirectory, RateLimiterHandle, RateLimiterState};
pub use room::{LogicalClock, RoomActor, RoomDirectory, RoomHandle, RoomStats};
pub use room_key::{RoomId, RoomKey};
pub use session::{Session, SessionId, SessionState};
