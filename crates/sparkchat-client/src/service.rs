//! Channel directory and message maintenance operations.
//!
//! Everything here is a straight read/write against the injected
//! [`DataStore`]; realtime propagation to open sessions happens through
//! the store's change feed, not through this service.  Validation failures
//! are rejected before any store call is attempted, and store failures
//! propagate as tagged errors -- no retries at this layer.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::info;

use sparkchat_shared::constants::{DEFAULT_HISTORY_LIMIT, PRESENCE_WINDOW_SECS};
use sparkchat_shared::{ChannelId, MessageId, UserId};
use sparkchat_store::{
    Channel, ChannelMember, ChannelSummary, ChannelType, DataStore, MemberRole, Message,
    MessagePatch, MessageQuery, NewChannel, NewMessage, SortOrder,
};

use crate::error::{ClientError, Result};
use crate::policy;

/// High-level chat operations over an injected store.
#[derive(Clone)]
pub struct ChatService {
    store: Arc<dyn DataStore>,
}

impl ChatService {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self { store }
    }

    // ------------------------------------------------------------------
    // Channel directory
    // ------------------------------------------------------------------

    /// Create a channel; the creator becomes its first admin member.
    pub fn create_channel(&self, new: NewChannel) -> Result<Channel> {
        if new.name.trim().is_empty() {
            return Err(ClientError::InvalidInput(
                "channel name must not be empty".into(),
            ));
        }

        let created_by = new.created_by;
        let channel = self.store.insert_channel(new)?;
        self.store.insert_member(ChannelMember {
            channel_id: channel.id,
            user_id: created_by,
            role: MemberRole::Admin,
            joined_at: Utc::now(),
        })?;

        info!(channel = %channel.id, name = %channel.name, "channel created");
        Ok(channel)
    }

    /// Join a channel.  Joining twice is a conflict.
    pub fn join_channel(
        &self,
        channel_id: ChannelId,
        user_id: UserId,
        role: MemberRole,
    ) -> Result<ChannelMember> {
        // Ensure the channel exists before writing the membership row.
        self.store.channel(channel_id)?;

        let member = ChannelMember {
            channel_id,
            user_id,
            role,
            joined_at: Utc::now(),
        };
        self.store.insert_member(member.clone())?;

        info!(channel = %channel_id, user = %user_id.short(), "member joined");
        Ok(member)
    }

    /// Leave a channel.  The creator cannot leave their own channel.
    pub fn leave_channel(&self, channel_id: ChannelId, user_id: UserId) -> Result<()> {
        let channel = self.store.channel(channel_id)?;
        if channel.created_by == user_id {
            return Err(ClientError::PermissionDenied(
                "the channel creator cannot leave; transfer ownership first".into(),
            ));
        }

        if !self.store.remove_member(channel_id, user_id)? {
            return Err(ClientError::NotAMember);
        }

        info!(channel = %channel_id, user = %user_id.short(), "member left");
        Ok(())
    }

    /// Delete a channel.  Creator-only; the store cascades messages and
    /// memberships.
    pub fn delete_channel(&self, channel_id: ChannelId, requester: UserId) -> Result<()> {
        let channel = self.store.channel(channel_id)?;
        if channel.created_by != requester {
            return Err(ClientError::PermissionDenied(
                "only the channel creator can delete a channel".into(),
            ));
        }

        self.store.delete_channel(channel_id)?;
        info!(channel = %channel_id, "channel deleted");
        Ok(())
    }

    /// All non-announcement channels with derived member counts, newest
    /// first.
    pub fn public_channels(&self) -> Result<Vec<ChannelSummary>> {
        let channels = self.store.list_channels()?;
        let mut summaries = Vec::with_capacity(channels.len());
        for channel in channels {
            if channel.channel_type == ChannelType::Announcement {
                continue;
            }
            let member_count = self.store.member_count(channel.id)?;
            summaries.push(ChannelSummary {
                channel,
                member_count,
            });
        }
        Ok(summaries)
    }

    /// The channels `user_id` is a member of, with derived member counts.
    pub fn channels_for_user(&self, user_id: UserId) -> Result<Vec<ChannelSummary>> {
        let memberships = self.store.memberships(user_id)?;
        let mut summaries = Vec::with_capacity(memberships.len());
        for membership in memberships {
            let channel = self.store.channel(membership.channel_id)?;
            let member_count = self.store.member_count(channel.id)?;
            summaries.push(ChannelSummary {
                channel,
                member_count,
            });
        }
        Ok(summaries)
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    /// Validated, non-optimistic send.  The optimistic path lives in the
    /// session actor; this is the plain request/response variant.
    pub fn send_message(&self, new: NewMessage) -> Result<Message> {
        policy::validate_content(&new.content)?;

        let channel = self.store.channel(new.channel_id)?;
        let member = self
            .store
            .member(new.channel_id, new.sender_id)?
            .ok_or(ClientError::NotAMember)?;
        if !policy::can_send(channel.channel_type, member.role) {
            return Err(ClientError::PermissionDenied(
                "this channel is read-only for your role".into(),
            ));
        }

        if let Some(reply_id) = new.reply_to_id {
            let target = self
                .store
                .message(reply_id)?
                .ok_or_else(|| ClientError::InvalidInput("reply target does not exist".into()))?;
            if target.channel_id != new.channel_id {
                return Err(ClientError::InvalidInput(
                    "reply target is in a different channel".into(),
                ));
            }
        }

        Ok(self.store.insert_message(new)?)
    }

    /// One page of history ending just before `before`, oldest first.
    pub fn message_history(
        &self,
        channel_id: ChannelId,
        before: Option<chrono::DateTime<Utc>>,
        limit: Option<u32>,
    ) -> Result<Vec<Message>> {
        let mut page = self.store.query_messages(&MessageQuery {
            channel_id: Some(channel_id),
            before,
            contains: None,
            limit: Some(limit.unwrap_or(DEFAULT_HISTORY_LIMIT)),
            order: SortOrder::Descending,
        })?;
        page.reverse();
        Ok(page)
    }

    /// Search a channel's messages by content substring, newest first.
    pub fn search_messages(&self, channel_id: ChannelId, query: &str) -> Result<Vec<Message>> {
        if query.trim().is_empty() {
            return Err(ClientError::InvalidInput(
                "search query must not be empty".into(),
            ));
        }

        Ok(self.store.query_messages(&MessageQuery {
            channel_id: Some(channel_id),
            before: None,
            contains: Some(query.to_string()),
            limit: Some(DEFAULT_HISTORY_LIMIT),
            order: SortOrder::Descending,
        })?)
    }

    /// Edit a message's content.  Sender-only; deleted and system
    /// messages stay frozen.
    pub fn edit_message(
        &self,
        message_id: MessageId,
        editor: UserId,
        new_content: &str,
    ) -> Result<Message> {
        policy::validate_content(new_content)?;

        let message = self
            .store
            .message(message_id)?
            .ok_or(ClientError::Store(sparkchat_store::StoreError::NotFound))?;
        if !policy::can_edit(&message, editor) {
            return Err(ClientError::PermissionDenied(
                "only the sender can edit this message".into(),
            ));
        }

        let patch = MessagePatch {
            content: Some(new_content.to_string()),
            edited_at: Some(Utc::now()),
            ..MessagePatch::default()
        };
        Ok(self.store.update_message(message_id, patch)?)
    }

    /// Soft-delete a message.  Sender-only; repeated deletes are a no-op.
    pub fn delete_message(&self, message_id: MessageId, requester: UserId) -> Result<()> {
        let message = self
            .store
            .message(message_id)?
            .ok_or(ClientError::Store(sparkchat_store::StoreError::NotFound))?;
        if !policy::can_delete(&message, requester) {
            return Err(ClientError::PermissionDenied(
                "only the sender can delete this message".into(),
            ));
        }
        if message.is_deleted {
            return Ok(());
        }

        let patch = MessagePatch {
            is_deleted: Some(true),
            ..MessagePatch::default()
        };
        self.store.update_message(message_id, patch)?;
        Ok(())
    }

    /// Forward a message into other channels.  The sender must be a
    /// member of every target; copies carry `forwarded_from_id`.
    pub fn forward_message(
        &self,
        message_id: MessageId,
        sender_id: UserId,
        targets: &[ChannelId],
    ) -> Result<Vec<Message>> {
        let original = self
            .store
            .message(message_id)?
            .ok_or(ClientError::Store(sparkchat_store::StoreError::NotFound))?;

        for target in targets {
            if self.store.member(*target, sender_id)?.is_none() {
                return Err(ClientError::NotAMember);
            }
        }

        let mut forwarded = Vec::with_capacity(targets.len());
        for target in targets {
            forwarded.push(self.store.insert_message(NewMessage {
                channel_id: *target,
                sender_id,
                content: original.content.clone(),
                message_type: original.message_type,
                reply_to_id: None,
                forwarded_from_id: Some(original.id),
            })?);
        }
        Ok(forwarded)
    }

    /// Toggle `user_id` on `symbol` for a stored message and persist the
    /// result.  Last writer wins against concurrent toggles.
    pub fn toggle_reaction(
        &self,
        message_id: MessageId,
        user_id: UserId,
        symbol: &str,
    ) -> Result<Message> {
        let message = self
            .store
            .message(message_id)?
            .ok_or(ClientError::Store(sparkchat_store::StoreError::NotFound))?;

        let mut reactions = message.reactions;
        policy::toggle_reaction(&mut reactions, symbol, user_id);

        let patch = MessagePatch {
            reactions: Some(reactions),
            ..MessagePatch::default()
        };
        Ok(self.store.update_message(message_id, patch)?)
    }

    // ------------------------------------------------------------------
    // Presence
    // ------------------------------------------------------------------

    /// Stamp `user_id` as active now.
    pub fn touch_presence(&self, user_id: UserId) -> Result<()> {
        Ok(self.store.touch_presence(user_id, Utc::now())?)
    }

    /// Members of a channel active within the presence window.
    pub fn online_members(&self, channel_id: ChannelId) -> Result<Vec<UserId>> {
        let cutoff = Utc::now() - Duration::seconds(PRESENCE_WINDOW_SECS);
        let mut online = Vec::new();
        for member in self.store.members(channel_id)? {
            if let Some(last_active) = self.store.last_active(member.user_id)? {
                if last_active >= cutoff {
                    online.push(member.user_id);
                }
            }
        }
        Ok(online)
    }
}
