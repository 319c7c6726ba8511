//! In-process feed hub.
//!
//! [`LocalFeed`] fans store change notifications out to per-topic
//! subscribers over bounded mpsc channels.  It stands in for the hosted
//! backend's change feed: wire it into a store as its
//! [`ChangeListener`] and every committed message mutation shows up on the
//! matching `channel:<uuid>` topic.
//!
//! For tests the hub can be marked down (keep-alives fail, publishes are
//! lost) and arbitrary status signals can be injected per topic.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use sparkchat_shared::{ChannelId, MessageId};
use sparkchat_store::{ChangeListener, Message};

use crate::events::{FeedEvent, SubscriptionStatus};
use crate::feed::{EventFeed, FeedError, Result, Subscription, SubscriptionHandle};

/// Per-subscription event buffer size.
const EVENT_BUFFER: usize = 256;

struct Subscriber {
    topic: String,
    tx: mpsc::Sender<FeedEvent>,
}

#[derive(Default)]
struct FeedInner {
    next_id: u64,
    subscribers: HashMap<u64, Subscriber>,
    down: bool,
}

/// Thread-safe in-process feed.  Clones share the same hub.
#[derive(Clone, Default)]
pub struct LocalFeed {
    inner: Arc<Mutex<FeedInner>>,
}

impl LocalFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing the feed connection.  While down, keep-alives fail
    /// and published changes are lost (a later history reload reconciles).
    pub fn set_down(&self, down: bool) {
        self.lock().down = down;
    }

    /// Deliver a status signal to every subscriber of `topic`, regardless
    /// of the down flag.  Test hook for driving the reconnect machine.
    pub fn inject_status(&self, topic: &str, status: SubscriptionStatus) {
        let mut inner = self.lock();
        deliver(&mut inner, topic, FeedEvent::Status(status));
    }

    /// Number of live subscriptions, for test assertions.
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    fn publish(&self, topic: &str, event: FeedEvent) {
        let mut inner = self.lock();
        if inner.down {
            debug!(topic, "feed down, dropping change event");
            return;
        }
        deliver(&mut inner, topic, event);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FeedInner> {
        self.inner.lock().expect("feed lock poisoned")
    }
}

/// Push `event` to every subscriber of `topic`, pruning dead receivers.
fn deliver(inner: &mut FeedInner, topic: &str, event: FeedEvent) {
    let mut dead = Vec::new();

    for (id, sub) in inner.subscribers.iter() {
        if sub.topic != topic {
            continue;
        }
        match sub.tx.try_send(event.clone()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(topic, subscriber = id, "subscriber lagging, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                dead.push(*id);
            }
        }
    }

    for id in dead {
        debug!(subscriber = id, "pruning closed subscription");
        inner.subscribers.remove(&id);
    }
}

impl EventFeed for LocalFeed {
    fn subscribe(&self, topic: &str) -> Result<Subscription> {
        let (tx, events) = mpsc::channel(EVENT_BUFFER);

        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;

        // First event tells the subscriber whether it went live.
        let initial = if inner.down {
            SubscriptionStatus::TimedOut
        } else {
            SubscriptionStatus::Subscribed
        };
        let _ = tx.try_send(FeedEvent::Status(initial));

        inner.subscribers.insert(
            id,
            Subscriber {
                topic: topic.to_string(),
                tx,
            },
        );

        debug!(topic, subscriber = id, "subscription opened");
        Ok(Subscription {
            handle: SubscriptionHandle {
                id,
                topic: topic.to_string(),
            },
            events,
        })
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<()> {
        let mut inner = self.lock();
        if let Some(sub) = inner.subscribers.remove(&handle.id) {
            let _ = sub.tx.try_send(FeedEvent::Status(SubscriptionStatus::Closed));
            debug!(topic = %handle.topic, subscriber = handle.id, "subscription closed");
        }
        Ok(())
    }

    fn keepalive(&self, handle: &SubscriptionHandle) -> Result<()> {
        let inner = self.lock();
        if inner.down {
            return Err(FeedError::Unavailable("feed marked down".into()));
        }
        if !inner.subscribers.contains_key(&handle.id) {
            return Err(FeedError::UnknownSubscription);
        }
        Ok(())
    }
}

impl ChangeListener for LocalFeed {
    fn message_inserted(&self, message: &Message) {
        self.publish(
            &message.channel_id.to_topic(),
            FeedEvent::Insert(message.clone()),
        );
    }

    fn message_updated(&self, message: &Message) {
        self.publish(
            &message.channel_id.to_topic(),
            FeedEvent::Update(message.clone()),
        );
    }

    fn message_deleted(&self, channel_id: ChannelId, id: MessageId) {
        self.publish(&channel_id.to_topic(), FeedEvent::Delete(id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel_topic() -> String {
        ChannelId::new().to_topic()
    }

    #[tokio::test]
    async fn subscribe_reports_live_status_first() {
        let feed = LocalFeed::new();
        let mut sub = feed.subscribe(&channel_topic()).unwrap();

        let first = sub.events.recv().await.unwrap();
        assert!(matches!(
            first,
            FeedEvent::Status(SubscriptionStatus::Subscribed)
        ));
    }

    #[tokio::test]
    async fn subscribe_while_down_times_out() {
        let feed = LocalFeed::new();
        feed.set_down(true);
        let mut sub = feed.subscribe(&channel_topic()).unwrap();

        let first = sub.events.recv().await.unwrap();
        assert!(matches!(
            first,
            FeedEvent::Status(SubscriptionStatus::TimedOut)
        ));
    }

    #[tokio::test]
    async fn status_injection_reaches_matching_topic_only() {
        let feed = LocalFeed::new();
        let topic_a = channel_topic();
        let topic_b = channel_topic();
        let mut sub_a = feed.subscribe(&topic_a).unwrap();
        let mut sub_b = feed.subscribe(&topic_b).unwrap();

        // Drain the initial Subscribed signals.
        sub_a.events.recv().await.unwrap();
        sub_b.events.recv().await.unwrap();

        feed.inject_status(&topic_a, SubscriptionStatus::ChannelError);

        let got = sub_a.events.recv().await.unwrap();
        assert!(matches!(
            got,
            FeedEvent::Status(SubscriptionStatus::ChannelError)
        ));
        assert!(sub_b.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn keepalive_fails_while_down() {
        let feed = LocalFeed::new();
        let sub = feed.subscribe(&channel_topic()).unwrap();

        assert!(feed.keepalive(&sub.handle).is_ok());
        feed.set_down(true);
        assert!(matches!(
            feed.keepalive(&sub.handle),
            Err(FeedError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn unsubscribe_prunes_the_hub() {
        let feed = LocalFeed::new();
        let sub = feed.subscribe(&channel_topic()).unwrap();
        assert_eq!(feed.subscriber_count(), 1);

        feed.unsubscribe(sub.handle.clone()).unwrap();
        assert_eq!(feed.subscriber_count(), 0);

        // Unsubscribing a dead handle is a no-op.
        feed.unsubscribe(sub.handle).unwrap();
    }
}
