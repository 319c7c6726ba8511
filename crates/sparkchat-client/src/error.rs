use thiserror::Error;

use sparkchat_feed::FeedError;
use sparkchat_store::StoreError;

/// Errors surfaced by the messaging core.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Input rejected before any store or feed call was attempted.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The acting user is not a member of the channel.
    #[error("Not a member of this channel")]
    NotAMember,

    /// The acting user may not perform this operation.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Tagged failure from the data store.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Failure from the realtime feed.
    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    /// The session actor is no longer running.
    #[error("Session is gone")]
    SessionClosed,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ClientError>;
