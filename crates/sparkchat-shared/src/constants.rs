/// Heartbeat keep-alive interval in seconds
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Base reconnect backoff delay in milliseconds
pub const BACKOFF_BASE_MS: u64 = 1_000;

/// Reconnect backoff cap in milliseconds
pub const BACKOFF_MAX_MS: u64 = 30_000;

/// Failed connection cycles tolerated before giving up
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Ingestion queue flush threshold (buffered events)
pub const FLUSH_THRESHOLD: usize = 10;

/// Ingestion queue idle flush timeout in milliseconds
pub const FLUSH_IDLE_MS: u64 = 100;

/// Maximum message content length in characters
pub const MAX_MESSAGE_LEN: usize = 4096;

/// Window within which a member counts as online, in seconds
pub const PRESENCE_WINDOW_SECS: i64 = 300;

/// Default page size for message history queries
pub const DEFAULT_HISTORY_LIMIT: u32 = 50;

/// Topic prefix for per-channel change feeds
pub const CHANNEL_TOPIC_PREFIX: &str = "channel:";
