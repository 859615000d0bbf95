// Fundamental configuration constants
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8787;

// Room actor lifetime
pub const DEFAULT_ROOM_IDLE_SECS: u64 = 300;
pub const DEFAULT_LIMITER_IDLE_SECS: u64 = 60;

// Protocol limits
pub const MAX_NAME_LENGTH: usize = 32;
/// Name given to sessions that send an empty or falsy name
pub const ANONYMOUS_NAME: &str = "anonymous";
pub const MAX_MESSAGE_LENGTH: usize = 256;
pub const BACKLOG_LIMIT: usize = 100;

// Room keys
pub const MAX_ROOM_NAME_LENGTH: usize = 32;
pub const ROOM_ID_LENGTH: usize = 64;

// Cooldown accounting, in seconds
pub const COOLDOWN_INCREMENT_SECS: f64 = 5.0;
pub const COOLDOWN_GRACE_SECS: f64 = 20.0;

// WebSocket close codes
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;
