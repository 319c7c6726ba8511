//! The per-viewing-context actor.
//!
//! One session = one user viewing one channel at a time.  The actor owns
//! the connection state machine, the ingestion queue, and the live
//! subscription; UI commands, feed events, timer fires, and store
//! confirmations all arrive as messages on its loop, so every mutation is
//! single-writer and callback re-entrancy cannot corrupt state.
//!
//! Communication follows the command/notification channel pattern:
//! [`spawn_session`] returns a [`SessionHandle`] for commands and an mpsc
//! receiver of [`SessionEvent`]s for the rendering layer.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use sparkchat_feed::{EventFeed, FeedEvent, FeedError, SubscriptionHandle, SubscriptionStatus};
use sparkchat_shared::constants::{FLUSH_IDLE_MS, FLUSH_THRESHOLD};
use sparkchat_shared::{ChannelId, ClientToken, ConnectionStatus, MessageId, UserId};
use sparkchat_store::{
    Channel, DataStore, MemberRole, Message, MessagePatch, MessageQuery, MessageType, NewMessage,
    Reactions, StoreError,
};

use crate::connection::{ConnectionConfig, ConnectionManager, Effect, FailureKind};
use crate::error::{ClientError, Result};
use crate::ingest::{IngestEvent, IngestQueue};
use crate::policy;

/// Commands accepted by a running session.
#[derive(Debug)]
pub enum SessionCommand {
    /// Select a channel for viewing; tears down any previous subscription.
    Open(ChannelId),
    /// Stop viewing; cancels timers and clears internal buffers.
    Close,
    /// Optimistically send a message to the open channel.
    Send {
        content: String,
        message_type: MessageType,
        reply_to: Option<MessageId>,
    },
    /// Toggle the session user's reaction on a message in the log.
    ToggleReaction {
        message_id: MessageId,
        symbol: String,
    },
    /// The host environment regained network connectivity.
    NetworkOnline,
    /// The host environment lost network connectivity.
    NetworkOffline,
    /// Read the current ordered log.
    Snapshot(oneshot::Sender<Vec<Message>>),
    /// Read the current connection status.
    Status(oneshot::Sender<ConnectionStatus>),
    /// Terminate the actor.
    Shutdown,
}

/// Notifications emitted to the rendering layer.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StatusChanged(ConnectionStatus),
    /// The ordered log changed; carries the full new sequence.
    LogChanged(Vec<Message>),
    /// A send failed; `content` restores the compose input so the user can
    /// retry without retyping.
    SendFailed { content: String, reason: String },
}

/// Tunables for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub connection: ConnectionConfig,
    /// Flush the ingestion buffer at this size.
    pub flush_threshold: usize,
    /// Flush after this long with no new events.
    pub flush_idle: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            flush_threshold: FLUSH_THRESHOLD,
            flush_idle: Duration::from_millis(FLUSH_IDLE_MS),
        }
    }
}

/// Cloneable command handle for a running session.
#[derive(Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub async fn open(&self, channel: ChannelId) -> Result<()> {
        self.send(SessionCommand::Open(channel)).await
    }

    pub async fn close(&self) -> Result<()> {
        self.send(SessionCommand::Close).await
    }

    pub async fn send_message(
        &self,
        content: impl Into<String>,
        message_type: MessageType,
        reply_to: Option<MessageId>,
    ) -> Result<()> {
        self.send(SessionCommand::Send {
            content: content.into(),
            message_type,
            reply_to,
        })
        .await
    }

    pub async fn toggle_reaction(
        &self,
        message_id: MessageId,
        symbol: impl Into<String>,
    ) -> Result<()> {
        self.send(SessionCommand::ToggleReaction {
            message_id,
            symbol: symbol.into(),
        })
        .await
    }

    pub async fn network_online(&self) -> Result<()> {
        self.send(SessionCommand::NetworkOnline).await
    }

    pub async fn network_offline(&self) -> Result<()> {
        self.send(SessionCommand::NetworkOffline).await
    }

    /// Current ordered log, as of the moment the actor processes this.
    pub async fn snapshot(&self) -> Result<Vec<Message>> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Snapshot(tx)).await?;
        rx.await.map_err(|_| ClientError::SessionClosed)
    }

    pub async fn status(&self) -> Result<ConnectionStatus> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Status(tx)).await?;
        rx.await.map_err(|_| ClientError::SessionClosed)
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(SessionCommand::Shutdown).await
    }

    async fn send(&self, cmd: SessionCommand) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| ClientError::SessionClosed)
    }
}

/// Spawn the session actor for `user`.
///
/// Returns the command handle and the notification stream.
pub fn spawn_session(
    user: UserId,
    store: Arc<dyn DataStore>,
    feed: Arc<dyn EventFeed>,
    config: SessionConfig,
) -> (SessionHandle, mpsc::Receiver<SessionEvent>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let (event_tx, event_rx) = mpsc::channel(256);
    let (ingest_tx, ingest_rx) = mpsc::channel(256);

    let actor = SessionActor {
        user,
        store,
        feed,
        manager: ConnectionManager::new(config.connection.clone()),
        queue: IngestQueue::new(config.flush_threshold),
        config,
        sub_handle: None,
        channel_info: None,
        heartbeat_at: None,
        backoff_at: None,
        flush_at: None,
        event_tx,
        ingest_tx,
    };

    tokio::spawn(actor.run(cmd_rx, ingest_rx));
    (SessionHandle { cmd_tx }, event_rx)
}

/// What woke the actor loop.
enum Wake {
    Command(Option<SessionCommand>),
    Feed(Option<FeedEvent>),
    Ingest(IngestEvent),
    HeartbeatFired(u64),
    BackoffFired(u64),
    FlushDue,
}

struct SessionActor {
    user: UserId,
    store: Arc<dyn DataStore>,
    feed: Arc<dyn EventFeed>,
    config: SessionConfig,
    manager: ConnectionManager,
    queue: IngestQueue,
    sub_handle: Option<SubscriptionHandle>,
    /// Channel metadata and the session user's role, loaded on open.
    channel_info: Option<(Channel, Option<MemberRole>)>,
    heartbeat_at: Option<(u64, Instant)>,
    backoff_at: Option<(u64, Instant)>,
    flush_at: Option<Instant>,
    event_tx: mpsc::Sender<SessionEvent>,
    ingest_tx: mpsc::Sender<IngestEvent>,
}

impl SessionActor {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<SessionCommand>,
        mut ingest_rx: mpsc::Receiver<IngestEvent>,
    ) {
        info!(user = %self.user.short(), "session started");

        // Receiver of the live subscription.  Kept out of `self` so the
        // select arms below borrow disjoint state.
        let mut sub_events: Option<mpsc::Receiver<FeedEvent>> = None;

        loop {
            let far = Instant::now() + Duration::from_secs(24 * 3600);
            let (hb_epoch, hb_at) = self.heartbeat_at.unwrap_or((0, far));
            let (bo_epoch, bo_at) = self.backoff_at.unwrap_or((0, far));
            let fl_at = self.flush_at.unwrap_or(far);

            let wake = tokio::select! {
                cmd = cmd_rx.recv() => Wake::Command(cmd),
                // Pends forever while no subscription is live.
                event = recv_feed(&mut sub_events) => Wake::Feed(event),
                event = ingest_rx.recv() => match event {
                    Some(event) => Wake::Ingest(event),
                    // The actor holds a sender, so this arm cannot close.
                    None => continue,
                },
                _ = sleep_until(hb_at), if self.heartbeat_at.is_some() => {
                    Wake::HeartbeatFired(hb_epoch)
                }
                _ = sleep_until(bo_at), if self.backoff_at.is_some() => {
                    Wake::BackoffFired(bo_epoch)
                }
                _ = sleep_until(fl_at), if self.flush_at.is_some() => Wake::FlushDue,
            };

            match wake {
                Wake::Command(None) | Wake::Command(Some(SessionCommand::Shutdown)) => {
                    let effects = self.manager.close();
                    self.apply(effects, &mut sub_events).await;
                    break;
                }
                Wake::Command(Some(cmd)) => self.handle_command(cmd, &mut sub_events).await,
                Wake::Feed(Some(event)) => self.handle_feed_event(event, &mut sub_events).await,
                Wake::Feed(None) => {
                    // The hub dropped our stream without a close signal.
                    debug!("subscription stream ended unexpectedly");
                    sub_events = None;
                    let effects = self.manager.on_failure(FailureKind::ClosedByFeed);
                    self.apply(effects, &mut sub_events).await;
                }
                Wake::Ingest(event) => self.ingest(event).await,
                Wake::HeartbeatFired(epoch) => {
                    self.heartbeat_at = None;
                    let effects = self.manager.on_heartbeat_fired(epoch);
                    self.apply(effects, &mut sub_events).await;
                }
                Wake::BackoffFired(epoch) => {
                    self.backoff_at = None;
                    let effects = self.manager.on_backoff_fired(epoch);
                    self.apply(effects, &mut sub_events).await;
                }
                Wake::FlushDue => {
                    self.flush().await;
                }
            }
        }

        info!(user = %self.user.short(), "session terminated");
    }

    async fn handle_command(
        &mut self,
        cmd: SessionCommand,
        sub_events: &mut Option<mpsc::Receiver<FeedEvent>>,
    ) {
        match cmd {
            SessionCommand::Open(channel_id) => {
                info!(channel = %channel_id, "opening channel");
                self.queue.reset();
                self.flush_at = None;
                self.channel_info = self.load_channel_info(channel_id).await;
                let effects = self.manager.open(channel_id);
                self.apply(effects, sub_events).await;
            }
            SessionCommand::Close => {
                info!("closing channel");
                self.queue.reset();
                self.flush_at = None;
                self.channel_info = None;
                let effects = self.manager.close();
                self.apply(effects, sub_events).await;
            }
            SessionCommand::Send {
                content,
                message_type,
                reply_to,
            } => self.handle_send(content, message_type, reply_to).await,
            SessionCommand::ToggleReaction { message_id, symbol } => {
                self.handle_toggle_reaction(message_id, symbol).await;
            }
            SessionCommand::NetworkOnline => {
                info!("network online");
                let effects = self.manager.on_network_online();
                self.apply(effects, sub_events).await;
            }
            SessionCommand::NetworkOffline => {
                info!("network offline");
                let effects = self.manager.on_network_offline();
                self.apply(effects, sub_events).await;
            }
            SessionCommand::Snapshot(reply) => {
                let _ = reply.send(self.queue.log().snapshot());
            }
            SessionCommand::Status(reply) => {
                let _ = reply.send(self.manager.status());
            }
            // Handled in the run loop.
            SessionCommand::Shutdown => {}
        }
    }

    async fn handle_feed_event(
        &mut self,
        event: FeedEvent,
        sub_events: &mut Option<mpsc::Receiver<FeedEvent>>,
    ) {
        match event {
            FeedEvent::Status(status) => {
                debug!(?status, "subscription status change");
                let effects = match status {
                    SubscriptionStatus::Subscribed => self.manager.on_subscribed(),
                    SubscriptionStatus::ChannelError => {
                        self.manager.on_failure(FailureKind::ChannelError)
                    }
                    SubscriptionStatus::TimedOut => {
                        self.manager.on_failure(FailureKind::TimedOut)
                    }
                    SubscriptionStatus::Closed => {
                        self.manager.on_failure(FailureKind::ClosedByFeed)
                    }
                };
                self.apply(effects, sub_events).await;
            }
            FeedEvent::Insert(message) => self.ingest(IngestEvent::Insert(message)).await,
            FeedEvent::Update(message) => self.ingest(IngestEvent::Update(message)).await,
            FeedEvent::Delete(id) => self.ingest(IngestEvent::Delete(id)).await,
        }
    }

    /// Carry out machine effects.  A failing effect (subscribe,
    /// keep-alive) feeds back into the machine and its follow-up effects
    /// join the queue.
    async fn apply(
        &mut self,
        effects: Vec<Effect>,
        sub_events: &mut Option<mpsc::Receiver<FeedEvent>>,
    ) {
        let mut queue: VecDeque<Effect> = effects.into();

        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::Unsubscribe => {
                    *sub_events = None;
                    if let Some(handle) = self.sub_handle.take() {
                        if let Err(e) = self.feed.unsubscribe(handle) {
                            debug!(error = %e, "unsubscribe failed");
                        }
                    }
                }
                Effect::Subscribe(channel_id) => {
                    match self.feed.subscribe(&channel_id.to_topic()) {
                        Ok(sub) => {
                            debug!(topic = %sub.handle.topic, "subscription opened");
                            self.sub_handle = Some(sub.handle);
                            *sub_events = Some(sub.events);
                        }
                        Err(e) => {
                            warn!(error = %e, "subscribe failed");
                            queue.extend(self.manager.on_failure(FailureKind::SubscribeFailed));
                        }
                    }
                }
                Effect::LoadHistory(channel_id) => self.load_history(channel_id).await,
                Effect::SendKeepalive => {
                    let result = match &self.sub_handle {
                        Some(handle) => self.feed.keepalive(handle),
                        None => Err(FeedError::UnknownSubscription),
                    };
                    if let Err(e) = result {
                        warn!(error = %e, "keepalive failed");
                        queue.extend(self.manager.on_failure(FailureKind::KeepaliveFailed));
                    }
                }
                Effect::ArmHeartbeat { epoch, after } => {
                    self.heartbeat_at = Some((epoch, Instant::now() + after));
                }
                Effect::ArmBackoff { epoch, after } => {
                    info!(delay_ms = after.as_millis() as u64, attempt = self.manager.attempt(), "reconnect scheduled");
                    self.backoff_at = Some((epoch, Instant::now() + after));
                }
                Effect::Notify(status) => {
                    info!(status = %status, "connection status changed");
                    let _ = self
                        .event_tx
                        .send(SessionEvent::StatusChanged(status))
                        .await;
                }
            }
        }

        self.prune_stale_timers();
    }

    /// Disarm timers whose epoch no longer matches the machine's, so a
    /// teardown leaves nothing behind to fire.
    fn prune_stale_timers(&mut self) {
        let epoch = self.manager.epoch();
        if matches!(self.heartbeat_at, Some((e, _)) if e != epoch) {
            self.heartbeat_at = None;
        }
        if matches!(self.backoff_at, Some((e, _)) if e != epoch) {
            self.backoff_at = None;
        }
    }

    async fn load_channel_info(
        &self,
        channel_id: ChannelId,
    ) -> Option<(Channel, Option<MemberRole>)> {
        let store = Arc::clone(&self.store);
        let user = self.user;
        let loaded = tokio::task::spawn_blocking(move || {
            let channel = store.channel(channel_id)?;
            let role = store.member(channel_id, user)?.map(|m| m.role);
            Ok::<_, StoreError>((channel, role))
        })
        .await;

        match loaded {
            Ok(Ok(info)) => Some(info),
            Ok(Err(e)) => {
                warn!(channel = %channel_id, error = %e, "failed to load channel metadata");
                None
            }
            Err(e) => {
                warn!(error = %e, "channel metadata task failed");
                None
            }
        }
    }

    /// Reload the channel history through the ingestion queue.  Duplicate
    /// suppression reconciles the overlap with events that arrived live.
    async fn load_history(&mut self, channel_id: ChannelId) {
        let store = Arc::clone(&self.store);
        let loaded = tokio::task::spawn_blocking(move || {
            store.query_messages(&MessageQuery::channel(channel_id))
        })
        .await;

        match loaded {
            Ok(Ok(messages)) => {
                debug!(count = messages.len(), "history loaded");
                for message in messages {
                    if self.queue.enqueue(IngestEvent::Insert(message)) {
                        self.flush().await;
                    }
                }
                // Make the reloaded log visible without waiting out the
                // idle timeout.
                self.flush().await;
            }
            Ok(Err(e)) => warn!(error = %e, "history reload failed"),
            Err(e) => warn!(error = %e, "history reload task failed"),
        }
    }

    async fn handle_send(
        &mut self,
        content: String,
        message_type: MessageType,
        reply_to: Option<MessageId>,
    ) {
        let Some(channel_id) = self.manager.channel() else {
            self.send_failed(content, "no channel is open".into()).await;
            return;
        };

        if let Err(e) = policy::validate_content(&content) {
            self.send_failed(content, e.to_string()).await;
            return;
        }

        let allowed = match &self.channel_info {
            Some((channel, Some(role))) => policy::can_send(channel.channel_type, *role),
            _ => false,
        };
        if !allowed {
            let reason = match &self.channel_info {
                Some((_, Some(_))) => "this channel is read-only for your role".to_string(),
                _ => "not a member of this channel".to_string(),
            };
            self.send_failed(content, reason).await;
            return;
        }

        if let Some(reply_id) = reply_to {
            if !self.queue.log().contains(reply_id) {
                self.send_failed(content, "reply target is not in this channel".into())
                    .await;
                return;
            }
        }

        let token = ClientToken::new();
        let temporary = Message {
            id: MessageId::new(),
            channel_id,
            sender_id: self.user,
            content: content.clone(),
            message_type,
            reply_to_id: reply_to,
            forwarded_from_id: None,
            is_deleted: false,
            reactions: Reactions::new(),
            created_at: Utc::now(),
            edited_at: None,
        };
        debug!(?token, "optimistic send enqueued");
        self.ingest(IngestEvent::Local {
            token,
            message: temporary,
        })
        .await;

        // The store insert runs off the actor thread; its result funnels
        // back through the same ingestion path as feed events.
        let store = Arc::clone(&self.store);
        let ingest_tx = self.ingest_tx.clone();
        let new = NewMessage {
            channel_id,
            sender_id: self.user,
            content,
            message_type,
            reply_to_id: reply_to,
            forwarded_from_id: None,
        };
        tokio::task::spawn_blocking(move || {
            let event = match store.insert_message(new) {
                Ok(message) => IngestEvent::Confirmed { token, message },
                Err(e) => IngestEvent::Failed {
                    token,
                    reason: e.to_string(),
                },
            };
            let _ = ingest_tx.blocking_send(event);
        });
    }

    async fn handle_toggle_reaction(&mut self, message_id: MessageId, symbol: String) {
        if !self
            .queue
            .log_mut()
            .toggle_reaction(message_id, &symbol, self.user)
        {
            debug!(message = %message_id, "reaction toggle for unknown message discarded");
            return;
        }

        let _ = self
            .event_tx
            .send(SessionEvent::LogChanged(self.queue.log().snapshot()))
            .await;

        // Persist the new state; the authoritative update event from the
        // feed supersedes this local view either way.
        let Some(reactions) = self
            .queue
            .log()
            .get(message_id)
            .map(|m| m.reactions.clone())
        else {
            return;
        };
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || {
            let patch = MessagePatch {
                reactions: Some(reactions),
                ..MessagePatch::default()
            };
            if let Err(e) = store.update_message(message_id, patch) {
                warn!(message = %message_id, error = %e, "failed to persist reaction toggle");
            }
        });
    }

    async fn ingest(&mut self, event: IngestEvent) {
        if self.queue.enqueue(event) {
            self.flush().await;
        } else {
            self.flush_at = Some(Instant::now() + self.config.flush_idle);
        }
    }

    async fn flush(&mut self) {
        self.flush_at = None;
        let outcome = self.queue.flush();

        if outcome.changed {
            let _ = self
                .event_tx
                .send(SessionEvent::LogChanged(self.queue.log().snapshot()))
                .await;
        }
        for failed in outcome.failed_sends {
            warn!(reason = %failed.reason, "send failed, restoring compose text");
            let _ = self
                .event_tx
                .send(SessionEvent::SendFailed {
                    content: failed.content,
                    reason: failed.reason,
                })
                .await;
        }
    }

    async fn send_failed(&self, content: String, reason: String) {
        debug!(reason = %reason, "send rejected");
        let _ = self
            .event_tx
            .send(SessionEvent::SendFailed { content, reason })
            .await;
    }
}

/// Await the next event on the live subscription, pending forever when
/// there is none.
async fn recv_feed(sub_events: &mut Option<mpsc::Receiver<FeedEvent>>) -> Option<FeedEvent> {
    match sub_events.as_mut() {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}
