//! CRUD operations for [`Message`] records.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use sparkchat_shared::{ChannelId, MessageId, UserId};

use crate::database::SqliteStore;
use crate::error::{Result, StoreError};
use crate::models::{Message, MessageType, NewMessage, Reactions};
use crate::store::{MessagePatch, MessageQuery, SortOrder};

const MESSAGE_COLUMNS: &str = "id, channel_id, sender_id, content, message_type, \
     reply_to_id, forwarded_from_id, is_deleted, reactions, created_at, edited_at";

impl SqliteStore {
    /// Insert a message.  The returned record carries the assigned id and
    /// timestamp; the change listener is notified after the write commits.
    pub fn create_message(&self, new: NewMessage) -> Result<Message> {
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

        self.conn().execute(
            "INSERT INTO messages (id, channel_id, sender_id, content, message_type,
                 reply_to_id, forwarded_from_id, is_deleted, reactions, created_at, edited_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                message.id.to_string(),
                message.channel_id.to_string(),
                message.sender_id.to_string(),
                message.content,
                message.message_type.as_str(),
                message.reply_to_id.map(|id| id.to_string()),
                message.forwarded_from_id.map(|id| id.to_string()),
                message.is_deleted,
                serde_json::to_string(&message.reactions)?,
                message.created_at.to_rfc3339(),
                message.edited_at.map(|t| t.to_rfc3339()),
            ],
        )?;

        self.notify(|l| l.message_inserted(&message));
        Ok(message)
    }

    /// Fetch a single message, if present.
    pub fn get_message(&self, id: MessageId) -> Result<Option<Message>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"
        ))?;

        let mut rows = stmt.query_map(params![id.to_string()], row_to_message)?;
        rows.next().transpose().map_err(StoreError::Sqlite)
    }

    /// Apply a partial update and return the updated record.
    pub fn patch_message(&self, id: MessageId, patch: MessagePatch) -> Result<Message> {
        let mut message = self.get_message(id)?.ok_or(StoreError::NotFound)?;

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

        self.conn().execute(
            "UPDATE messages
             SET content = ?2, edited_at = ?3, is_deleted = ?4, reactions = ?5
             WHERE id = ?1",
            params![
                id.to_string(),
                message.content,
                message.edited_at.map(|t| t.to_rfc3339()),
                message.is_deleted,
                serde_json::to_string(&message.reactions)?,
            ],
        )?;

        self.notify(|l| l.message_updated(&message));
        Ok(message)
    }

    /// Hard delete.  Returns `true` if a row was deleted.
    pub fn remove_message(&self, id: MessageId) -> Result<bool> {
        let channel_id = {
            let conn = self.conn();
            let channel_id: Option<String> = conn
                .query_row(
                    "SELECT channel_id FROM messages WHERE id = ?1",
                    params![id.to_string()],
                    |row| row.get(0),
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })?;

            let Some(channel_id) = channel_id else {
                return Ok(false);
            };

            conn.execute("DELETE FROM messages WHERE id = ?1", params![id.to_string()])?;
            channel_id
        };

        if let Ok(channel_uuid) = Uuid::parse_str(&channel_id) {
            self.notify(|l| l.message_deleted(ChannelId(channel_uuid), id));
        }
        Ok(true)
    }

    /// Query messages by channel, cursor, and content substring.
    pub fn get_messages(&self, query: &MessageQuery) -> Result<Vec<Message>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut bound: Vec<String> = Vec::new();

        if let Some(channel_id) = query.channel_id {
            clauses.push("channel_id = ?");
            bound.push(channel_id.to_string());
        }
        if let Some(before) = query.before {
            clauses.push("created_at < ?");
            bound.push(before.to_rfc3339());
        }
        if let Some(ref needle) = query.contains {
            clauses.push("instr(content, ?) > 0");
            bound.push(needle.clone());
        }

        let mut sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(match query.order {
            SortOrder::Ascending => " ORDER BY created_at ASC",
            SortOrder::Descending => " ORDER BY created_at DESC",
        });
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(bound.iter()), row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`Message`].
fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let channel_str: String = row.get(1)?;
    let sender_str: String = row.get(2)?;
    let content: String = row.get(3)?;
    let type_str: String = row.get(4)?;
    let reply_str: Option<String> = row.get(5)?;
    let forwarded_str: Option<String> = row.get(6)?;
    let is_deleted: bool = row.get(7)?;
    let reactions_json: String = row.get(8)?;
    let created_str: String = row.get(9)?;
    let edited_str: Option<String> = row.get(10)?;

    let parse_uuid = |idx: usize, s: &str| {
        Uuid::parse_str(s).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
    };

    let id = parse_uuid(0, &id_str)?;
    let channel_id = parse_uuid(1, &channel_str)?;
    let sender_id = parse_uuid(2, &sender_str)?;
    let reply_to_id = reply_str.as_deref().map(|s| parse_uuid(5, s)).transpose()?;
    let forwarded_from_id = forwarded_str
        .as_deref()
        .map(|s| parse_uuid(6, s))
        .transpose()?;

    let message_type = MessageType::from_str(&type_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("unknown message type: {type_str}").into(),
        )
    })?;

    let reactions: Reactions = serde_json::from_str(&reactions_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let parse_ts = |idx: usize, s: &str| {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    idx,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
    };

    let created_at = parse_ts(9, &created_str)?;
    let edited_at = edited_str.as_deref().map(|s| parse_ts(10, s)).transpose()?;

    Ok(Message {
        id: MessageId(id),
        channel_id: ChannelId(channel_id),
        sender_id: UserId(sender_id),
        content,
        message_type,
        reply_to_id: reply_to_id.map(MessageId),
        forwarded_from_id: forwarded_from_id.map(MessageId),
        is_deleted,
        reactions,
        created_at,
        edited_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChannelType, NewChannel};
    use crate::store::DataStore;
    use std::collections::BTreeSet;

    fn open_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open_at(&dir.path().join("test.db")).unwrap();
        (dir, store)
    }

    fn seed_channel(store: &SqliteStore) -> ChannelId {
        store
            .create_channel(NewChannel {
                name: "general".into(),
                description: None,
                channel_type: ChannelType::Public,
                created_by: UserId::new(),
            })
            .unwrap()
            .id
    }

    #[test]
    fn message_round_trip_preserves_reactions() {
        let (_dir, store) = open_store();
        let channel_id = seed_channel(&store);
        let sender = UserId::new();

        let message = store
            .create_message(NewMessage {
                channel_id,
                sender_id: sender,
                content: "hello".into(),
                message_type: MessageType::Text,
                reply_to_id: None,
                forwarded_from_id: None,
            })
            .unwrap();

        let mut reactions = Reactions::new();
        reactions.insert("thumbsup".into(), BTreeSet::from([sender]));
        let updated = store
            .patch_message(
                message.id,
                MessagePatch {
                    reactions: Some(reactions.clone()),
                    ..MessagePatch::default()
                },
            )
            .unwrap();
        assert_eq!(updated.reactions, reactions);

        let loaded = store.get_message(message.id).unwrap().unwrap();
        assert_eq!(loaded.reactions, reactions);
    }

    #[test]
    fn duplicate_channel_name_is_a_conflict() {
        let (_dir, store) = open_store();
        seed_channel(&store);

        let err = store
            .create_channel(NewChannel {
                name: "general".into(),
                description: None,
                channel_type: ChannelType::Public,
                created_by: UserId::new(),
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn query_orders_and_limits() {
        let (_dir, store) = open_store();
        let channel_id = seed_channel(&store);
        let sender = UserId::new();

        for text in ["one", "two", "three"] {
            store
                .create_message(NewMessage {
                    channel_id,
                    sender_id: sender,
                    content: text.into(),
                    message_type: MessageType::Text,
                    reply_to_id: None,
                    forwarded_from_id: None,
                })
                .unwrap();
        }

        let newest_first = store
            .query_messages(&MessageQuery {
                channel_id: Some(channel_id),
                order: SortOrder::Descending,
                limit: Some(2),
                ..MessageQuery::default()
            })
            .unwrap();
        assert_eq!(newest_first.len(), 2);
        assert!(newest_first[0].created_at >= newest_first[1].created_at);
    }

    #[test]
    fn patch_missing_message_is_not_found() {
        let (_dir, store) = open_store();
        let err = store
            .patch_message(MessageId::new(), MessagePatch::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }
}
