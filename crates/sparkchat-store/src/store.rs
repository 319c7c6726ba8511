//! The data-store contract consumed by the messaging core.
//!
//! Implementations are synchronous; async callers that must not block run
//! store calls on a blocking task.  The core does not retry failed calls --
//! errors surface to the caller as tagged [`StoreError`](crate::StoreError)
//! values and retry is a caller decision.

use chrono::{DateTime, Utc};

use sparkchat_shared::{ChannelId, MessageId, UserId};

use crate::error::Result;
use crate::models::{
    Channel, ChannelMember, Message, NewChannel, NewMessage, Reactions,
};

// ---------------------------------------------------------------------------
// Query / patch types
// ---------------------------------------------------------------------------

/// Sort direction for message queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// Filter and ordering for message queries.
#[derive(Debug, Clone, Default)]
pub struct MessageQuery {
    /// Restrict to one channel.
    pub channel_id: Option<ChannelId>,
    /// Only messages created strictly before this timestamp (cursor
    /// pagination).
    pub before: Option<DateTime<Utc>>,
    /// Substring match on content.
    pub contains: Option<String>,
    /// Maximum number of rows.
    pub limit: Option<u32>,
    /// Sort by creation timestamp.
    pub order: SortOrder,
}

impl MessageQuery {
    /// All messages of one channel, oldest first.
    pub fn channel(channel_id: ChannelId) -> Self {
        Self {
            channel_id: Some(channel_id),
            ..Self::default()
        }
    }
}

/// Partial update applied to an existing message.  `None` fields are left
/// untouched.
#[derive(Debug, Clone, Default)]
pub struct MessagePatch {
    pub content: Option<String>,
    pub edited_at: Option<DateTime<Utc>>,
    pub is_deleted: Option<bool>,
    pub reactions: Option<Reactions>,
}

// ---------------------------------------------------------------------------
// Change listener
// ---------------------------------------------------------------------------

/// Observer notified after every successful message mutation.
///
/// This is the seam the realtime feed hangs off: a store wired with a
/// listener behaves like a hosted backend with row-level change
/// notifications.  Listener calls happen after the write committed, so an
/// observer never sees a change that did not land.
pub trait ChangeListener: Send + Sync {
    fn message_inserted(&self, message: &Message);
    fn message_updated(&self, message: &Message);
    fn message_deleted(&self, channel_id: ChannelId, id: MessageId);
}

// ---------------------------------------------------------------------------
// DataStore
// ---------------------------------------------------------------------------

/// Generic CRUD surface over named record collections.
///
/// Uniqueness rules every implementation enforces:
/// - channel names are unique (`Conflict` on duplicates),
/// - at most one membership row per `(channel_id, user_id)` pair,
/// - message ids are assigned by the store, never by callers.
///
/// Deleting a channel cascades to its messages, memberships, and presence
/// rows.
pub trait DataStore: Send + Sync {
    // -- channels ----------------------------------------------------------

    fn insert_channel(&self, new: NewChannel) -> Result<Channel>;

    fn channel(&self, id: ChannelId) -> Result<Channel>;

    fn channel_by_name(&self, name: &str) -> Result<Option<Channel>>;

    /// All channels, newest first.
    fn list_channels(&self) -> Result<Vec<Channel>>;

    /// Returns `true` if a row was deleted.
    fn delete_channel(&self, id: ChannelId) -> Result<bool>;

    // -- membership --------------------------------------------------------

    fn insert_member(&self, member: ChannelMember) -> Result<()>;

    fn member(&self, channel_id: ChannelId, user_id: UserId) -> Result<Option<ChannelMember>>;

    fn members(&self, channel_id: ChannelId) -> Result<Vec<ChannelMember>>;

    fn member_count(&self, channel_id: ChannelId) -> Result<usize>;

    /// All memberships of one user.
    fn memberships(&self, user_id: UserId) -> Result<Vec<ChannelMember>>;

    /// Returns `true` if a row was deleted.
    fn remove_member(&self, channel_id: ChannelId, user_id: UserId) -> Result<bool>;

    // -- messages ----------------------------------------------------------

    /// Insert a message; the returned record carries the server-assigned id
    /// and timestamp.
    fn insert_message(&self, new: NewMessage) -> Result<Message>;

    fn message(&self, id: MessageId) -> Result<Option<Message>>;

    /// Apply a partial update.  `NotFound` if the id does not exist.
    fn update_message(&self, id: MessageId, patch: MessagePatch) -> Result<Message>;

    /// Hard delete.  Returns `true` if a row was deleted.
    fn delete_message(&self, id: MessageId) -> Result<bool>;

    fn query_messages(&self, query: &MessageQuery) -> Result<Vec<Message>>;

    // -- presence ----------------------------------------------------------

    /// Stamp a user as active at `at`.
    fn touch_presence(&self, user_id: UserId, at: DateTime<Utc>) -> Result<()>;

    fn last_active(&self, user_id: UserId) -> Result<Option<DateTime<Utc>>>;
}
