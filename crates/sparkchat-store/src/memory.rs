//! In-memory [`DataStore`] used by tests and the demo console.
//!
//! Behaves like the hosted backend from the core's point of view:
//! server-assigned ids, uniqueness constraints, cascade deletes, and change
//! notifications through an optional [`ChangeListener`].  A fault switch
//! turns every write into a `Network` error so callers can exercise their
//! failure paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};

use sparkchat_shared::{ChannelId, MessageId, UserId};

use crate::error::{Result, StoreError};
use crate::models::{Channel, ChannelMember, Message, NewChannel, NewMessage, Reactions};
use crate::store::{ChangeListener, DataStore, MessagePatch, MessageQuery, SortOrder};

#[derive(Default)]
struct Inner {
    channels: HashMap<ChannelId, Channel>,
    members: HashMap<(ChannelId, UserId), ChannelMember>,
    /// Messages in insertion order; queries sort on demand.
    messages: Vec<Message>,
    presence: HashMap<UserId, DateTime<Utc>>,
}

/// Thread-safe in-memory store.  Clones share the same state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    listener: Arc<RwLock<Option<Arc<dyn ChangeListener>>>>,
    offline: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the observer notified after message mutations.
    pub fn set_listener(&self, listener: Arc<dyn ChangeListener>) {
        *self.listener.write().expect("listener lock poisoned") = Some(listener);
    }

    /// When set, every write fails with a `Network` error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Network("store unreachable".into()));
        }
        Ok(())
    }

    fn notify<F: FnOnce(&dyn ChangeListener)>(&self, f: F) {
        let guard = self.listener.read().expect("listener lock poisoned");
        if let Some(listener) = guard.as_ref() {
            f(listener.as_ref());
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("store lock poisoned")
    }
}

fn apply_patch(message: &mut Message, patch: MessagePatch) {
    if let Some(content) = patch.content {
        message.content = content;
    }
    if let Some(edited_at) = patch.edited_at {
        message.edited_at = Some(edited_at);
    }
    if let Some(is_deleted) = patch.is_deleted {
        message.is_deleted = is_deleted;
    }
    if let Some(reactions) = patch.reactions {
        message.reactions = reactions;
    }
}

impl DataStore for MemoryStore {
    // -- channels ----------------------------------------------------------

    fn insert_channel(&self, new: NewChannel) -> Result<Channel> {
        self.check_online()?;
        let mut inner = self.lock();

        if inner.channels.values().any(|c| c.name == new.name) {
            return Err(StoreError::Conflict(format!(
                "channel name already exists: {}",
                new.name
            )));
        }

        let channel = Channel {
            id: ChannelId::new(),
            name: new.name,
            description: new.description,
            channel_type: new.channel_type,
            created_by: new.created_by,
            created_at: Utc::now(),
        };
        inner.channels.insert(channel.id, channel.clone());
        Ok(channel)
    }

    fn channel(&self, id: ChannelId) -> Result<Channel> {
        self.lock().channels.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    fn channel_by_name(&self, name: &str) -> Result<Option<Channel>> {
        Ok(self
            .lock()
            .channels
            .values()
            .find(|c| c.name == name)
            .cloned())
    }

    fn list_channels(&self) -> Result<Vec<Channel>> {
        let mut channels: Vec<Channel> = self.lock().channels.values().cloned().collect();
        channels.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(channels)
    }

    fn delete_channel(&self, id: ChannelId) -> Result<bool> {
        self.check_online()?;
        let removed_messages;
        {
            let mut inner = self.lock();
            if inner.channels.remove(&id).is_none() {
                return Ok(false);
            }
            inner.members.retain(|(channel_id, _), _| *channel_id != id);
            let (gone, kept): (Vec<Message>, Vec<Message>) =
                inner.messages.drain(..).partition(|m| m.channel_id == id);
            inner.messages = kept;
            removed_messages = gone;
        }

        for message in &removed_messages {
            self.notify(|l| l.message_deleted(id, message.id));
        }
        Ok(true)
    }

    // -- membership --------------------------------------------------------

    fn insert_member(&self, member: ChannelMember) -> Result<()> {
        self.check_online()?;
        let mut inner = self.lock();
        let key = (member.channel_id, member.user_id);
        if inner.members.contains_key(&key) {
            return Err(StoreError::Conflict("already a member".into()));
        }
        inner.members.insert(key, member);
        Ok(())
    }

    fn member(&self, channel_id: ChannelId, user_id: UserId) -> Result<Option<ChannelMember>> {
        Ok(self.lock().members.get(&(channel_id, user_id)).cloned())
    }

    fn members(&self, channel_id: ChannelId) -> Result<Vec<ChannelMember>> {
        let mut members: Vec<ChannelMember> = self
            .lock()
            .members
            .values()
            .filter(|m| m.channel_id == channel_id)
            .cloned()
            .collect();
        members.sort_by(|a, b| a.joined_at.cmp(&b.joined_at));
        Ok(members)
    }

    fn member_count(&self, channel_id: ChannelId) -> Result<usize> {
        Ok(self
            .lock()
            .members
            .values()
            .filter(|m| m.channel_id == channel_id)
            .count())
    }

    fn memberships(&self, user_id: UserId) -> Result<Vec<ChannelMember>> {
        let mut memberships: Vec<ChannelMember> = self
            .lock()
            .members
            .values()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect();
        memberships.sort_by(|a, b| a.joined_at.cmp(&b.joined_at));
        Ok(memberships)
    }

    fn remove_member(&self, channel_id: ChannelId, user_id: UserId) -> Result<bool> {
        self.check_online()?;
        Ok(self.lock().members.remove(&(channel_id, user_id)).is_some())
    }

    // -- messages ----------------------------------------------------------

    fn insert_message(&self, new: NewMessage) -> Result<Message> {
        self.check_online()?;
        let message = {
            let mut inner = self.lock();
            if !inner.channels.contains_key(&new.channel_id) {
                return Err(StoreError::NotFound);
            }
            let message = Message {
                id: MessageId::new(),
                channel_id: new.channel_id,
                sender_id: new.sender_id,
                content: new.content,
                message_type: new.message_type,
                reply_to_id: new.reply_to_id,
                forwarded_from_id: new.forwarded_from_id,
                is_deleted: false,
                reactions: Reactions::new(),
                created_at: Utc::now(),
                edited_at: None,
            };
            inner.messages.push(message.clone());
            message
        };

        self.notify(|l| l.message_inserted(&message));
        Ok(message)
    }

    fn message(&self, id: MessageId) -> Result<Option<Message>> {
        Ok(self.lock().messages.iter().find(|m| m.id == id).cloned())
    }

    fn update_message(&self, id: MessageId, patch: MessagePatch) -> Result<Message> {
        self.check_online()?;
        let updated = {
            let mut inner = self.lock();
            let message = inner
                .messages
                .iter_mut()
                .find(|m| m.id == id)
                .ok_or(StoreError::NotFound)?;
            apply_patch(message, patch);
            message.clone()
        };

        self.notify(|l| l.message_updated(&updated));
        Ok(updated)
    }

    fn delete_message(&self, id: MessageId) -> Result<bool> {
        self.check_online()?;
        let removed = {
            let mut inner = self.lock();
            let before = inner.messages.len();
            let channel_id = inner
                .messages
                .iter()
                .find(|m| m.id == id)
                .map(|m| m.channel_id);
            inner.messages.retain(|m| m.id != id);
            channel_id.filter(|_| inner.messages.len() < before)
        };

        if let Some(channel_id) = removed {
            self.notify(|l| l.message_deleted(channel_id, id));
            return Ok(true);
        }
        Ok(false)
    }

    fn query_messages(&self, query: &MessageQuery) -> Result<Vec<Message>> {
        let mut messages: Vec<Message> = self
            .lock()
            .messages
            .iter()
            .filter(|m| query.channel_id.map_or(true, |id| m.channel_id == id))
            .filter(|m| query.before.map_or(true, |cutoff| m.created_at < cutoff))
            .filter(|m| {
                query
                    .contains
                    .as_deref()
                    .map_or(true, |needle| m.content.contains(needle))
            })
            .cloned()
            .collect();

        match query.order {
            SortOrder::Ascending => messages.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
            SortOrder::Descending => messages.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        }

        if let Some(limit) = query.limit {
            messages.truncate(limit as usize);
        }
        Ok(messages)
    }

    // -- presence ----------------------------------------------------------

    fn touch_presence(&self, user_id: UserId, at: DateTime<Utc>) -> Result<()> {
        self.check_online()?;
        self.lock().presence.insert(user_id, at);
        Ok(())
    }

    fn last_active(&self, user_id: UserId) -> Result<Option<DateTime<Utc>>> {
        Ok(self.lock().presence.get(&user_id).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChannelType, MemberRole, MessageType};

    fn new_channel(name: &str, created_by: UserId) -> NewChannel {
        NewChannel {
            name: name.into(),
            description: None,
            channel_type: ChannelType::Public,
            created_by,
        }
    }

    fn new_message(channel_id: ChannelId, sender_id: UserId, content: &str) -> NewMessage {
        NewMessage {
            channel_id,
            sender_id,
            content: content.into(),
            message_type: MessageType::Text,
            reply_to_id: None,
            forwarded_from_id: None,
        }
    }

    #[test]
    fn channel_names_are_unique() {
        let store = MemoryStore::new();
        let user = UserId::new();
        store.insert_channel(new_channel("general", user)).unwrap();

        let err = store.insert_channel(new_channel("general", user)).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn membership_is_unique_per_channel_and_user() {
        let store = MemoryStore::new();
        let user = UserId::new();
        let channel = store.insert_channel(new_channel("general", user)).unwrap();

        let member = ChannelMember {
            channel_id: channel.id,
            user_id: user,
            role: MemberRole::Member,
            joined_at: Utc::now(),
        };
        store.insert_member(member.clone()).unwrap();
        let err = store.insert_member(member).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn insert_message_assigns_id_and_timestamp() {
        let store = MemoryStore::new();
        let user = UserId::new();
        let channel = store.insert_channel(new_channel("general", user)).unwrap();

        let a = store.insert_message(new_message(channel.id, user, "one")).unwrap();
        let b = store.insert_message(new_message(channel.id, user, "two")).unwrap();
        assert_ne!(a.id, b.id);
        assert!(!a.is_deleted);
    }

    #[test]
    fn delete_channel_cascades_to_messages_and_members() {
        let store = MemoryStore::new();
        let user = UserId::new();
        let channel = store.insert_channel(new_channel("general", user)).unwrap();
        store
            .insert_member(ChannelMember {
                channel_id: channel.id,
                user_id: user,
                role: MemberRole::Admin,
                joined_at: Utc::now(),
            })
            .unwrap();
        store.insert_message(new_message(channel.id, user, "hi")).unwrap();

        assert!(store.delete_channel(channel.id).unwrap());
        assert_eq!(store.member_count(channel.id).unwrap(), 0);
        assert!(store
            .query_messages(&MessageQuery::channel(channel.id))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn query_filters_by_cursor_and_content() {
        let store = MemoryStore::new();
        let user = UserId::new();
        let channel = store.insert_channel(new_channel("general", user)).unwrap();
        store.insert_message(new_message(channel.id, user, "first post")).unwrap();
        let second = store.insert_message(new_message(channel.id, user, "second post")).unwrap();

        let before = store
            .query_messages(&MessageQuery {
                channel_id: Some(channel.id),
                before: Some(second.created_at),
                ..MessageQuery::default()
            })
            .unwrap();
        assert!(before.iter().all(|m| m.created_at < second.created_at));

        let found = store
            .query_messages(&MessageQuery {
                channel_id: Some(channel.id),
                contains: Some("second".into()),
                ..MessageQuery::default()
            })
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, second.id);
    }

    #[test]
    fn offline_store_rejects_writes_with_network_error() {
        let store = MemoryStore::new();
        let user = UserId::new();
        let channel = store.insert_channel(new_channel("general", user)).unwrap();

        store.set_offline(true);
        let err = store.insert_message(new_message(channel.id, user, "hi")).unwrap_err();
        assert!(matches!(err, StoreError::Network(_)));

        store.set_offline(false);
        store.insert_message(new_message(channel.id, user, "hi")).unwrap();
    }
}
