//! Domain model structs for channels, memberships, and messages.
//!
//! Every struct derives `Serialize` and `Deserialize` so records can be
//! handed directly to a rendering layer.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sparkchat_shared::{ChannelId, MessageId, UserId};

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// Access class of a channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Public,
    Private,
    Group,
    /// Write access restricted to elevated roles.
    Announcement,
}

impl ChannelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
            Self::Group => "group",
            Self::Announcement => "announcement",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "public" => Some(Self::Public),
            "private" => Some(Self::Private),
            "group" => Some(Self::Group),
            "announcement" => Some(Self::Announcement),
            _ => None,
        }
    }
}

/// A named conversation scope containing messages and members.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Channel {
    /// Unique channel identifier, assigned by the store.
    pub id: ChannelId,
    /// Human-readable channel name, unique across the store.
    pub name: String,
    /// Optional free-form description.
    pub description: Option<String>,
    /// Access class.
    pub channel_type: ChannelType,
    /// User who created the channel.
    pub created_by: UserId,
    /// When the channel was created.
    pub created_at: DateTime<Utc>,
}

/// Fields for a new channel; the store assigns the id and timestamp.
#[derive(Debug, Clone)]
pub struct NewChannel {
    pub name: String,
    pub description: Option<String>,
    pub channel_type: ChannelType,
    pub created_by: UserId,
}

/// A channel plus its derived member count, for directory listings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelSummary {
    pub channel: Channel,
    pub member_count: usize,
}

// ---------------------------------------------------------------------------
// Membership
// ---------------------------------------------------------------------------

/// Role of a user inside one channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Member,
    Admin,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Member => "member",
            Self::Admin => "admin",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "member" => Some(Self::Member),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// Membership of one user in one channel.  At most one row exists per
/// `(channel_id, user_id)` pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelMember {
    pub channel_id: ChannelId,
    pub user_id: UserId,
    pub role: MemberRole,
    pub joined_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Payload kind of a message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    File,
    Image,
    /// Store-generated notices; never editable by the sender.
    System,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::File => "file",
            Self::Image => "image",
            Self::System => "system",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "file" => Some(Self::File),
            "image" => Some(Self::Image),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// Reaction state of a message: symbol -> set of reacting users.
pub type Reactions = HashMap<String, BTreeSet<UserId>>;

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Server-assigned identifier; never chosen by a client for the
    /// canonical record.
    pub id: MessageId,
    /// The channel this message belongs to.
    pub channel_id: ChannelId,
    /// Who sent it.
    pub sender_id: UserId,
    /// Message body.
    pub content: String,
    /// Payload kind.
    pub message_type: MessageType,
    /// Message this one replies to, in the same channel.
    pub reply_to_id: Option<MessageId>,
    /// Original message when this one was forwarded.
    pub forwarded_from_id: Option<MessageId>,
    /// Soft-delete marker.
    pub is_deleted: bool,
    /// Per-symbol reacting users.
    pub reactions: Reactions,
    /// Server timestamp.  Not guaranteed monotonic per channel.
    pub created_at: DateTime<Utc>,
    /// Set when the sender edited the content.
    pub edited_at: Option<DateTime<Utc>>,
}

/// Fields for a new message; the store assigns the id and timestamp.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub channel_id: ChannelId,
    pub sender_id: UserId,
    pub content: String,
    pub message_type: MessageType,
    pub reply_to_id: Option<MessageId>,
    pub forwarded_from_id: Option<MessageId>,
}
