//! End-to-end session tests over the in-memory store and feed.
//!
//! Tokio time starts paused, so heartbeat, backoff, and flush timers run
//! instantly and deterministically.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use sparkchat_client::{
    spawn_session, ChatService, SessionConfig, SessionEvent, SessionHandle,
};
use sparkchat_feed::{LocalFeed, SubscriptionStatus};
use sparkchat_shared::{ChannelId, ConnectionStatus, UserId};
use sparkchat_store::{
    Channel, ChannelType, DataStore, MemberRole, MemoryStore, Message, MessageType, NewChannel,
    NewMessage,
};

/// Generous bound for every await; paused time makes the actual wait tiny.
const WAIT: Duration = Duration::from_secs(600);

struct Harness {
    store: MemoryStore,
    feed: LocalFeed,
    service: ChatService,
    user: UserId,
    channel: Channel,
    handle: SessionHandle,
    events: mpsc::Receiver<SessionEvent>,
}

fn harness() -> Harness {
    let store = MemoryStore::new();
    let feed = LocalFeed::new();
    store.set_listener(Arc::new(feed.clone()));

    let service = ChatService::new(Arc::new(store.clone()));
    let user = UserId::new();
    let channel = service
        .create_channel(NewChannel {
            name: "general".into(),
            description: None,
            channel_type: ChannelType::Public,
            created_by: user,
        })
        .expect("create channel");

    let (handle, events) = spawn_session(
        user,
        Arc::new(store.clone()),
        Arc::new(feed.clone()),
        SessionConfig::default(),
    );

    Harness {
        store,
        feed,
        service,
        user,
        channel,
        handle,
        events,
    }
}

async fn next_event(events: &mut mpsc::Receiver<SessionEvent>) -> SessionEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for a session event")
        .expect("session event stream ended")
}

async fn next_status(events: &mut mpsc::Receiver<SessionEvent>) -> ConnectionStatus {
    loop {
        if let SessionEvent::StatusChanged(status) = next_event(events).await {
            return status;
        }
    }
}

async fn wait_for_status(events: &mut mpsc::Receiver<SessionEvent>, want: ConnectionStatus) {
    loop {
        if next_status(events).await == want {
            return;
        }
    }
}

/// Poll the actor's snapshot until `pred` holds.
async fn wait_for_log(
    handle: &SessionHandle,
    pred: impl Fn(&[Message]) -> bool,
) -> Vec<Message> {
    timeout(WAIT, async {
        loop {
            let snapshot = handle.snapshot().await.expect("session alive");
            if pred(&snapshot) {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("timed out waiting for log state")
}

fn store_insert(store: &MemoryStore, channel_id: ChannelId, content: &str) -> Message {
    store
        .insert_message(NewMessage {
            channel_id,
            sender_id: UserId::new(),
            content: content.into(),
            message_type: MessageType::Text,
            reply_to_id: None,
            forwarded_from_id: None,
        })
        .expect("insert message")
}

#[tokio::test(start_paused = true)]
async fn open_connects_and_receives_live_messages() {
    let mut h = harness();

    h.handle.open(h.channel.id).await.unwrap();
    wait_for_status(&mut h.events, ConnectionStatus::Connected).await;

    store_insert(&h.store, h.channel.id, "hello from the feed");

    let log = wait_for_log(&h.handle, |log| log.len() == 1).await;
    assert_eq!(log[0].content, "hello from the feed");
}

#[tokio::test(start_paused = true)]
async fn history_is_loaded_on_connect() {
    let mut h = harness();
    store_insert(&h.store, h.channel.id, "before anyone was watching");

    h.handle.open(h.channel.id).await.unwrap();
    wait_for_status(&mut h.events, ConnectionStatus::Connected).await;

    let log = wait_for_log(&h.handle, |log| log.len() == 1).await;
    assert_eq!(log[0].content, "before anyone was watching");
}

#[tokio::test(start_paused = true)]
async fn optimistic_send_reconciles_to_the_store_record() {
    let mut h = harness();
    h.handle.open(h.channel.id).await.unwrap();
    wait_for_status(&mut h.events, ConnectionStatus::Connected).await;

    h.handle
        .send_message("optimism", MessageType::Text, None)
        .await
        .unwrap();

    // The log converges to exactly one entry whose id is the
    // store-assigned one, regardless of whether the feed insert or the
    // confirmation lands first.
    let stored = wait_for_log(&h.handle, |log| {
        let canonical = h
            .store
            .query_messages(&sparkchat_store::MessageQuery::channel(h.channel.id))
            .unwrap();
        log.len() == 1 && canonical.len() == 1 && log[0].id == canonical[0].id
    })
    .await;
    assert_eq!(stored[0].content, "optimism");
    assert_eq!(stored[0].sender_id, h.user);
}

#[tokio::test(start_paused = true)]
async fn failed_send_restores_the_compose_text() {
    let mut h = harness();
    h.handle.open(h.channel.id).await.unwrap();
    wait_for_status(&mut h.events, ConnectionStatus::Connected).await;

    h.store.set_offline(true);
    h.handle
        .send_message("do not lose me", MessageType::Text, None)
        .await
        .unwrap();

    let restored = loop {
        if let SessionEvent::SendFailed { content, .. } = next_event(&mut h.events).await {
            break content;
        }
    };
    assert_eq!(restored, "do not lose me");

    let log = wait_for_log(&h.handle, |log| log.is_empty()).await;
    assert!(log.is_empty());
}

#[tokio::test(start_paused = true)]
async fn send_to_announcement_channel_is_rejected_for_members() {
    let mut h = harness();
    let member = UserId::new();
    let announcements = h
        .service
        .create_channel(NewChannel {
            name: "announcements".into(),
            description: None,
            channel_type: ChannelType::Announcement,
            created_by: h.user,
        })
        .unwrap();
    h.service
        .join_channel(announcements.id, member, MemberRole::Member)
        .unwrap();

    let (member_handle, mut member_events) = spawn_session(
        member,
        Arc::new(h.store.clone()),
        Arc::new(h.feed.clone()),
        SessionConfig::default(),
    );
    member_handle.open(announcements.id).await.unwrap();
    wait_for_status(&mut member_events, ConnectionStatus::Connected).await;

    member_handle
        .send_message("not allowed", MessageType::Text, None)
        .await
        .unwrap();

    loop {
        if let SessionEvent::SendFailed { content, .. } = next_event(&mut member_events).await {
            assert_eq!(content, "not allowed");
            break;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn repeated_channel_errors_end_disconnected_with_no_extra_attempt() {
    let mut h = harness();
    h.handle.open(h.channel.id).await.unwrap();
    wait_for_status(&mut h.events, ConnectionStatus::Connected).await;

    // Kill the feed, then report an error on the live subscription.  Every
    // reconnect attempt times out, so the machine walks its whole backoff
    // budget.
    h.feed.set_down(true);
    h.feed
        .inject_status(&h.channel.id.to_topic(), SubscriptionStatus::ChannelError);

    let mut connecting_attempts = 0;
    loop {
        match next_status(&mut h.events).await {
            ConnectionStatus::Connecting => connecting_attempts += 1,
            ConnectionStatus::Disconnected => break,
            _ => {}
        }
    }

    // Four scheduled reconnects after the initial failure, then it gives
    // up for good.
    assert_eq!(connecting_attempts, 4);
    assert_eq!(h.handle.status().await.unwrap(), ConnectionStatus::Disconnected);

    // No further attempt fires no matter how long we wait.
    assert!(timeout(Duration::from_secs(300), h.events.recv()).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn offline_disconnects_and_online_reconnects_exactly_once() {
    let mut h = harness();
    h.handle.open(h.channel.id).await.unwrap();
    wait_for_status(&mut h.events, ConnectionStatus::Connected).await;

    h.handle.network_offline().await.unwrap();
    wait_for_status(&mut h.events, ConnectionStatus::Disconnected).await;

    // Past several heartbeat intervals: the cancelled timer must not fire.
    assert!(timeout(Duration::from_secs(120), h.events.recv()).await.is_err());

    h.handle.network_online().await.unwrap();
    assert_eq!(next_status(&mut h.events).await, ConnectionStatus::Connecting);
    assert_eq!(next_status(&mut h.events).await, ConnectionStatus::Connected);
}

#[tokio::test(start_paused = true)]
async fn close_tears_down_timers_and_the_subscription() {
    let mut h = harness();
    h.handle.open(h.channel.id).await.unwrap();
    wait_for_status(&mut h.events, ConnectionStatus::Connected).await;
    assert_eq!(h.feed.subscriber_count(), 1);

    h.handle.close().await.unwrap();
    wait_for_status(&mut h.events, ConnectionStatus::Disconnected).await;
    assert_eq!(h.feed.subscriber_count(), 0);

    // Advancing far past the heartbeat interval produces nothing: the
    // teardown cancelled every timer.
    assert!(timeout(Duration::from_secs(600), h.events.recv()).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn switching_channels_replaces_the_log() {
    let mut h = harness();
    let second = h
        .service
        .create_channel(NewChannel {
            name: "projects".into(),
            description: None,
            channel_type: ChannelType::Public,
            created_by: h.user,
        })
        .unwrap();

    h.handle.open(h.channel.id).await.unwrap();
    wait_for_status(&mut h.events, ConnectionStatus::Connected).await;
    store_insert(&h.store, h.channel.id, "only in general");
    wait_for_log(&h.handle, |log| log.len() == 1).await;

    h.handle.open(second.id).await.unwrap();
    wait_for_status(&mut h.events, ConnectionStatus::Connected).await;

    let log = wait_for_log(&h.handle, |log| log.is_empty()).await;
    assert!(log.is_empty());

    // Old-channel traffic no longer reaches the session.
    store_insert(&h.store, h.channel.id, "still only in general");
    store_insert(&h.store, second.id, "in projects");
    let log = wait_for_log(&h.handle, |log| log.len() == 1).await;
    assert_eq!(log[0].content, "in projects");
}

#[tokio::test(start_paused = true)]
async fn reaction_toggles_are_optimistic_and_persisted() {
    let mut h = harness();
    h.handle.open(h.channel.id).await.unwrap();
    wait_for_status(&mut h.events, ConnectionStatus::Connected).await;

    let message = store_insert(&h.store, h.channel.id, "react to me");
    wait_for_log(&h.handle, |log| log.len() == 1).await;

    h.handle.toggle_reaction(message.id, "star").await.unwrap();
    let log = wait_for_log(&h.handle, |log| {
        log.first().is_some_and(|m| m.reactions.contains_key("star"))
    })
    .await;
    assert!(log[0].reactions["star"].contains(&h.user));

    // The store eventually holds the same state.
    let user = h.user;
    timeout(WAIT, async {
        loop {
            let stored = h.store.message(message.id).unwrap().unwrap();
            if stored.reactions.get("star").is_some_and(|s| s.contains(&user)) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("reaction never persisted");
}

#[tokio::test(start_paused = true)]
async fn deletes_and_edits_flow_through_the_feed() {
    let mut h = harness();
    h.handle.open(h.channel.id).await.unwrap();
    wait_for_status(&mut h.events, ConnectionStatus::Connected).await;

    let keep = store_insert(&h.store, h.channel.id, "keep me");
    let drop = store_insert(&h.store, h.channel.id, "drop me");
    wait_for_log(&h.handle, |log| log.len() == 2).await;

    h.store.delete_message(drop.id).unwrap();
    let log = wait_for_log(&h.handle, |log| log.len() == 1).await;
    assert_eq!(log[0].id, keep.id);

    h.service.edit_message(keep.id, keep.sender_id, "kept and edited").unwrap();
    let log = wait_for_log(&h.handle, |log| {
        log.first().is_some_and(|m| m.content == "kept and edited")
    })
    .await;
    assert!(log[0].edited_at.is_some());
}
