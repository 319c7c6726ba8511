//! Pure access and content validators.  No I/O; callers decide what to do
//! with a denial.

use sparkchat_shared::constants::MAX_MESSAGE_LEN;
use sparkchat_shared::UserId;
use sparkchat_store::{ChannelType, MemberRole, Message, MessageType, Reactions};

use crate::error::ClientError;

/// Whether `role` may post in a channel of type `channel_type`.
///
/// Announcement channels are read-only for plain members; every other
/// channel type accepts posts from any member.
pub fn can_send(channel_type: ChannelType, role: MemberRole) -> bool {
    match channel_type {
        ChannelType::Announcement => matches!(role, MemberRole::Admin),
        ChannelType::Public | ChannelType::Private | ChannelType::Group => true,
    }
}

/// Whether `editor` may edit `message`.  Only the sender can edit, deleted
/// messages stay frozen, and system messages are never editable.
pub fn can_edit(message: &Message, editor: UserId) -> bool {
    message.sender_id == editor
        && !message.is_deleted
        && message.message_type != MessageType::System
}

/// Whether `requester` may delete `message`.
pub fn can_delete(message: &Message, requester: UserId) -> bool {
    message.sender_id == requester
}

/// Reject blank or oversized message content before any network call.
pub fn validate_content(content: &str) -> Result<(), ClientError> {
    if content.trim().is_empty() {
        return Err(ClientError::InvalidInput(
            "message content must not be empty".into(),
        ));
    }
    if content.chars().count() > MAX_MESSAGE_LEN {
        return Err(ClientError::InvalidInput(format!(
            "message too long: {} characters (maximum {MAX_MESSAGE_LEN})",
            content.chars().count()
        )));
    }
    Ok(())
}

/// Toggle `user` on `symbol` in a reactions map.
///
/// A user's second toggle on the same symbol removes only that user; the
/// symbol disappears once its set empties.  Returns `true` if the user is
/// in the set afterwards.
pub fn toggle_reaction(reactions: &mut Reactions, symbol: &str, user: UserId) -> bool {
    let set = reactions.entry(symbol.to_string()).or_default();
    let now_present = if set.contains(&user) {
        set.remove(&user);
        false
    } else {
        set.insert(user);
        true
    };

    if set.is_empty() {
        reactions.remove(symbol);
    }
    now_present
}
