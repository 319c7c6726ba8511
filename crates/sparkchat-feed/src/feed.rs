//! The feed contract: subscribe to a topic, receive a stream of
//! [`FeedEvent`]s, send keep-alives, unsubscribe.

use thiserror::Error;
use tokio::sync::mpsc;

use crate::events::FeedEvent;

/// Errors produced by the feed layer.
#[derive(Error, Debug)]
pub enum FeedError {
    /// The feed cannot be reached right now.
    #[error("Feed unavailable: {0}")]
    Unavailable(String),

    /// The handle does not name a live subscription.
    #[error("Unknown subscription")]
    UnknownSubscription,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FeedError>;

/// Identifies one live subscription on a feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    pub id: u64,
    pub topic: String,
}

/// A live subscription: the handle plus the event stream.
///
/// Dropping the receiver also ends delivery, but callers should
/// [`unsubscribe`](EventFeed::unsubscribe) explicitly so the feed can
/// release its side promptly.
pub struct Subscription {
    pub handle: SubscriptionHandle,
    pub events: mpsc::Receiver<FeedEvent>,
}

/// A realtime change feed.
///
/// Topics encode the row filter (`channel:<uuid>` scopes events to one
/// channel), so one subscription sees exactly the changes of the channel it
/// names.
pub trait EventFeed: Send + Sync {
    /// Open a subscription.  The first event on the stream is a
    /// [`Status`](crate::FeedEvent::Status) signal reporting whether the
    /// subscription went live.
    fn subscribe(&self, topic: &str) -> Result<Subscription>;

    /// Tear down a subscription.  Safe to call with an already-dead handle.
    fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<()>;

    /// Emit a lightweight keep-alive on the subscription.  An error means
    /// the feed connection is silently dead.
    fn keepalive(&self, handle: &SubscriptionHandle) -> Result<()>;
}
