//! Typed change events delivered on a subscription.
//!
//! Payloads arrive as a tagged variant so consumers match exhaustively
//! instead of probing dynamic shapes.

use sparkchat_shared::MessageId;
use sparkchat_store::Message;

/// Lifecycle signal of one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    /// The subscription is live; change events will follow.
    Subscribed,
    /// The feed reported an error on this topic.
    ChannelError,
    /// The subscription attempt or the feed connection timed out.
    TimedOut,
    /// The subscription was closed.
    Closed,
}

/// One event delivered on a subscription.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// Subscription lifecycle change.
    Status(SubscriptionStatus),
    /// A new row matching the topic.
    Insert(Message),
    /// The full new state of an existing row.
    Update(Message),
    /// A row was removed.
    Delete(MessageId),
}
