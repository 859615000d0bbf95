//! roomcast - room-scoped WebSocket chat built on actors
//!
//! Every room is a single task owning its sessions, ordering and history;
//! every client identity gets its own rate limiter task. This library holds
//! those actors, the wire protocol and a thin warp front end.

pub mod config;
pub mod constants;
pub mod core;
pub mod error;
pub mod handlers;
pub mod storage;

// Re-export main components
pub use config::*;
pub use constants::*;
