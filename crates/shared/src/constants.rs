pub const APP_NAME: &str = "Murmur";

// Limits
pub const MAX_MESSAGE_LENGTH: usize = 4000;
pub const MAX_GROUP_NAME_LENGTH: usize = 100;
pub const MAX_HANDLE_LENGTH: usize = 32;
pub const MIN_HANDLE_LENGTH: usize = 2;
pub const MIN_PASSWORD_LENGTH: usize = 8;
pub const MAX_EMOJI_LENGTH: usize = 32;

/// Derived group names are cut to this many characters.
pub const DERIVED_GROUP_NAME_LENGTH: usize = 50;

pub const MESSAGE_PAGE_SIZE: i64 = 50;
pub const MAX_MESSAGE_PAGE_SIZE: i64 = 100;
pub const MAX_BATCH_STATUS_IDS: usize = 500;

// WebSocket
pub const WS_HEARTBEAT_INTERVAL_MS: u64 = 30_000;
pub const WS_SEND_QUEUE_CAPACITY: usize = 256;
