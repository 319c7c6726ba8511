//! # sparkchat-feed
//!
//! The realtime event feed consumed by the messaging core: a
//! `subscribe(topic) -> stream of change events` primitive with typed
//! payloads, plus [`LocalFeed`], an in-process hub that turns store change
//! notifications into per-topic event streams.

pub mod events;
pub mod feed;
pub mod local;

pub use events::{FeedEvent, SubscriptionStatus};
pub use feed::{EventFeed, FeedError, Subscription, SubscriptionHandle};
pub use local::LocalFeed;
