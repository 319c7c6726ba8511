//! Message ingestion queue and the ordered in-memory log.
//!
//! Raw change events from the realtime feed and the optimistic send path
//! all funnel through one [`IngestQueue`].  Events accumulate in a pending
//! buffer and are merged into the canonical [`MessageLog`] on flush:
//! duplicate inserts are suppressed by id, updates patch in place, deletes
//! are no-ops when the id is unknown, and the full log is re-sorted by
//! creation timestamp after every flush because delivery order is not
//! guaranteed to match creation order across a reconnect.
//!
//! Ties on the creation timestamp keep arrival order -- ids are opaque, so
//! they are never used for ordering.

use std::collections::HashSet;

use tracing::debug;

use sparkchat_shared::{ClientToken, MessageId, UserId};
use sparkchat_store::Message;

use crate::policy;

/// Events funnelled into the ingestion queue.
#[derive(Debug, Clone)]
pub enum IngestEvent {
    /// New row from the feed or a history reload.
    Insert(Message),
    /// Full new state of an existing row.
    Update(Message),
    /// A row was removed.
    Delete(MessageId),
    /// Optimistic local send, not yet confirmed.  `message.id` is a
    /// temporary client id that never reaches the store.
    Local {
        token: ClientToken,
        message: Message,
    },
    /// The store confirmed a local send with the canonical record.
    Confirmed {
        token: ClientToken,
        message: Message,
    },
    /// The store rejected a local send.
    Failed { token: ClientToken, reason: String },
}

/// A send that failed during a flush; `content` restores the compose input.
#[derive(Debug, Clone)]
pub struct FailedSend {
    pub content: String,
    pub reason: String,
}

/// What a flush did to the log.
#[derive(Debug, Default)]
pub struct FlushOutcome {
    /// The visible log changed.
    pub changed: bool,
    /// Local sends that were rolled back.
    pub failed_sends: Vec<FailedSend>,
}

// ---------------------------------------------------------------------------
// MessageLog
// ---------------------------------------------------------------------------

struct LogEntry {
    message: Message,
    /// Monotonic arrival stamp; the tie-breaker for equal timestamps.
    arrival: u64,
    /// Correlation token while this entry is an unconfirmed local send.
    pending: Option<ClientToken>,
}

/// The ordered, de-duplicated message sequence produced for display.
///
/// Indexed by id for O(1) duplicate checks.
#[derive(Default)]
pub struct MessageLog {
    entries: Vec<LogEntry>,
    ids: HashSet<MessageId>,
    next_arrival: u64,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// O(1) membership check by message id.
    pub fn contains(&self, id: MessageId) -> bool {
        self.ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.entries
            .iter()
            .find(|e| e.message.id == id)
            .map(|e| &e.message)
    }

    /// Clone the current ordered sequence.
    pub fn snapshot(&self) -> Vec<Message> {
        self.entries.iter().map(|e| e.message.clone()).collect()
    }

    fn next_arrival(&mut self) -> u64 {
        let arrival = self.next_arrival;
        self.next_arrival += 1;
        arrival
    }

    /// Append a confirmed row.  Returns `false` on a duplicate id.
    fn insert(&mut self, message: Message) -> bool {
        if self.ids.contains(&message.id) {
            return false;
        }
        self.ids.insert(message.id);
        let arrival = self.next_arrival();
        self.entries.push(LogEntry {
            message,
            arrival,
            pending: None,
        });
        true
    }

    /// Replace an existing row in place, keeping its arrival stamp.
    /// Returns `false` when the id is unknown.
    fn apply_update(&mut self, message: Message) -> bool {
        match self.entries.iter_mut().find(|e| e.message.id == message.id) {
            Some(entry) => {
                entry.message = message;
                true
            }
            None => false,
        }
    }

    /// Remove a row by id.  Unknown ids are a no-op.
    fn remove(&mut self, id: MessageId) -> bool {
        if !self.ids.remove(&id) {
            return false;
        }
        self.entries.retain(|e| e.message.id != id);
        true
    }

    /// Append an unconfirmed local send.
    fn push_local(&mut self, token: ClientToken, message: Message) {
        self.ids.insert(message.id);
        let arrival = self.next_arrival();
        self.entries.push(LogEntry {
            message,
            arrival,
            pending: Some(token),
        });
    }

    /// Swap a pending entry for its confirmed counterpart, preserving its
    /// position.  If the confirmed row already arrived through the feed,
    /// the pending entry is dropped instead so exactly one copy remains.
    fn confirm(&mut self, token: ClientToken, message: Message) -> bool {
        let Some(index) = self.entries.iter().position(|e| e.pending == Some(token)) else {
            return false;
        };

        if self.ids.contains(&message.id) {
            let entry = self.entries.remove(index);
            self.ids.remove(&entry.message.id);
            return true;
        }

        let entry = &mut self.entries[index];
        self.ids.remove(&entry.message.id);
        self.ids.insert(message.id);
        entry.message = message;
        entry.pending = None;
        true
    }

    /// Roll back a pending entry, returning its message so the compose
    /// input can be restored.
    fn fail(&mut self, token: ClientToken) -> Option<Message> {
        let index = self.entries.iter().position(|e| e.pending == Some(token))?;
        let entry = self.entries.remove(index);
        self.ids.remove(&entry.message.id);
        Some(entry.message)
    }

    /// Toggle `user` on `symbol` for one message.  Returns `false` when
    /// the id is unknown.
    pub fn toggle_reaction(&mut self, id: MessageId, symbol: &str, user: UserId) -> bool {
        match self.entries.iter_mut().find(|e| e.message.id == id) {
            Some(entry) => {
                policy::toggle_reaction(&mut entry.message.reactions, symbol, user);
                true
            }
            None => false,
        }
    }

    /// Stable re-sort by creation timestamp, ties broken by arrival order.
    fn sort(&mut self) {
        self.entries
            .sort_by(|a, b| (a.message.created_at, a.arrival).cmp(&(b.message.created_at, b.arrival)));
    }
}

// ---------------------------------------------------------------------------
// IngestQueue
// ---------------------------------------------------------------------------

/// Buffers incoming events and merges them into the log in batches.
///
/// The owner flushes either when [`enqueue`](Self::enqueue) reports the
/// size threshold was reached or after an idle timeout since the last
/// enqueue, whichever happens first.
pub struct IngestQueue {
    pending: Vec<IngestEvent>,
    log: MessageLog,
    flush_threshold: usize,
}

impl IngestQueue {
    pub fn new(flush_threshold: usize) -> Self {
        Self {
            pending: Vec::new(),
            log: MessageLog::new(),
            flush_threshold,
        }
    }

    /// Buffer an event.  Returns `true` when the buffer reached the size
    /// threshold and should be flushed now.
    pub fn enqueue(&mut self, event: IngestEvent) -> bool {
        self.pending.push(event);
        self.pending.len() >= self.flush_threshold
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut MessageLog {
        &mut self.log
    }

    /// Drop all buffered events and the log, e.g. when the viewed channel
    /// changes.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.log = MessageLog::new();
    }

    /// Merge every buffered event into the log in arrival order, then
    /// re-sort the log by creation timestamp.
    pub fn flush(&mut self) -> FlushOutcome {
        let mut outcome = FlushOutcome::default();

        for event in self.pending.drain(..) {
            match event {
                IngestEvent::Insert(message) => {
                    let id = message.id;
                    if self.log.insert(message) {
                        outcome.changed = true;
                    } else {
                        debug!(message = %id, "duplicate insert discarded");
                    }
                }
                IngestEvent::Update(message) => {
                    let id = message.id;
                    if self.log.apply_update(message) {
                        outcome.changed = true;
                    } else {
                        debug!(message = %id, "update for unknown message discarded");
                    }
                }
                IngestEvent::Delete(id) => {
                    if self.log.remove(id) {
                        outcome.changed = true;
                    }
                }
                IngestEvent::Local { token, message } => {
                    self.log.push_local(token, message);
                    outcome.changed = true;
                }
                IngestEvent::Confirmed { token, message } => {
                    if self.log.confirm(token, message) {
                        outcome.changed = true;
                    } else {
                        debug!(?token, "confirmation for unknown send discarded");
                    }
                }
                IngestEvent::Failed { token, reason } => {
                    if let Some(message) = self.log.fail(token) {
                        outcome.changed = true;
                        outcome.failed_sends.push(FailedSend {
                            content: message.content,
                            reason,
                        });
                    } else {
                        debug!(?token, "failure for unknown send discarded");
                    }
                }
            }
        }

        if outcome.changed {
            self.log.sort();
        }
        outcome
    }
}
