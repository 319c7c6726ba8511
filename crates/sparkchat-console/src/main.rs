//! # sparkchat-console
//!
//! Small scripted demo of the messaging core: wires the in-memory store
//! and feed together, opens a session, and walks through live delivery,
//! an optimistic send, a reaction toggle, and an offline/online cycle.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sparkchat_client::{spawn_session, ChatService, SessionConfig, SessionEvent};
use sparkchat_feed::LocalFeed;
use sparkchat_shared::UserId;
use sparkchat_store::{
    ChannelType, MemberRole, MemoryStore, Message, MessageType, NewChannel, NewMessage,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,sparkchat_client=debug")),
        )
        .init();

    info!("Starting sparkchat console v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Wire the store and the feed together
    // -----------------------------------------------------------------------
    let store = MemoryStore::new();
    let feed = LocalFeed::new();
    store.set_listener(Arc::new(feed.clone()));

    let service = ChatService::new(Arc::new(store.clone()));

    // -----------------------------------------------------------------------
    // 3. Seed a channel with two members
    // -----------------------------------------------------------------------
    let teacher = UserId::new();
    let student = UserId::new();

    let general = service
        .create_channel(NewChannel {
            name: "general".into(),
            description: Some("Questions and answers".into()),
            channel_type: ChannelType::Public,
            created_by: teacher,
        })
        .context("creating the demo channel")?;
    service.join_channel(general.id, student, MemberRole::Member)?;
    service.touch_presence(teacher)?;
    service.touch_presence(student)?;

    // -----------------------------------------------------------------------
    // 4. Open a session as the student
    // -----------------------------------------------------------------------
    let (session, mut events) = spawn_session(
        student,
        Arc::new(store.clone()),
        Arc::new(feed.clone()),
        SessionConfig::default(),
    );
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::StatusChanged(status) => info!(%status, "status"),
                SessionEvent::LogChanged(log) => info!(messages = log.len(), "log updated"),
                SessionEvent::SendFailed { reason, .. } => info!(%reason, "send failed"),
            }
        }
    });

    session.open(general.id).await?;
    tokio::time::sleep(Duration::from_millis(300)).await;

    // -----------------------------------------------------------------------
    // 5. Live delivery, an optimistic send, a reaction
    // -----------------------------------------------------------------------
    let question = service.send_message(NewMessage {
        channel_id: general.id,
        sender_id: teacher,
        content: "Who can explain backoff timers?".into(),
        message_type: MessageType::Text,
        reply_to_id: None,
        forwarded_from_id: None,
    })?;

    tokio::time::sleep(Duration::from_millis(300)).await;
    session
        .send_message("I can give it a try!", MessageType::Text, Some(question.id))
        .await?;
    tokio::time::sleep(Duration::from_millis(300)).await;
    session.toggle_reaction(question.id, "star").await?;
    tokio::time::sleep(Duration::from_millis(300)).await;

    print_log(&session.snapshot().await?);
    info!(
        online = service.online_members(general.id)?.len(),
        "members online"
    );

    // -----------------------------------------------------------------------
    // 6. Offline / online cycle
    // -----------------------------------------------------------------------
    session.network_offline().await?;
    tokio::time::sleep(Duration::from_millis(200)).await;
    session.network_online().await?;
    tokio::time::sleep(Duration::from_millis(500)).await;

    info!(status = %session.status().await?, "after the offline/online cycle");
    session.shutdown().await?;
    Ok(())
}

fn print_log(log: &[Message]) {
    for message in log {
        let reactions = if message.reactions.is_empty() {
            String::new()
        } else {
            let mut symbols: Vec<String> = message
                .reactions
                .iter()
                .map(|(symbol, users)| format!("{symbol} x{}", users.len()))
                .collect();
            symbols.sort();
            format!("  [{}]", symbols.join(", "))
        };
        println!(
            "{} {}: {}{}",
            message.created_at.format("%H:%M:%S"),
            message.sender_id.short(),
            message.content,
            reactions
        );
    }
}
