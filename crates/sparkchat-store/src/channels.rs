//! CRUD operations for [`Channel`] records.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use sparkchat_shared::{ChannelId, UserId};

use crate::database::{map_conflict, SqliteStore};
use crate::error::{Result, StoreError};
use crate::models::{Channel, ChannelType, NewChannel};

impl SqliteStore {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new channel.  Duplicate names map to `Conflict`.
    pub fn create_channel(&self, new: NewChannel) -> Result<Channel> {
        let channel = Channel {
            id: ChannelId::new(),
            name: new.name,
            description: new.description,
            channel_type: new.channel_type,
            created_by: new.created_by,
            created_at: Utc::now(),
        };

        self.conn()
            .execute(
                "INSERT INTO channels (id, name, description, channel_type, created_by, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    channel.id.to_string(),
                    channel.name,
                    channel.description,
                    channel.channel_type.as_str(),
                    channel.created_by.to_string(),
                    channel.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| map_conflict(e, "channel name already exists"))?;

        Ok(channel)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single channel by id.
    pub fn get_channel(&self, id: ChannelId) -> Result<Channel> {
        self.conn()
            .query_row(
                "SELECT id, name, description, channel_type, created_by, created_at
                 FROM channels
                 WHERE id = ?1",
                params![id.to_string()],
                row_to_channel,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Fetch a channel by its unique name.
    pub fn get_channel_by_name(&self, name: &str) -> Result<Option<Channel>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, description, channel_type, created_by, created_at
             FROM channels
             WHERE name = ?1",
        )?;

        let mut rows = stmt.query_map(params![name], row_to_channel)?;
        rows.next().transpose().map_err(StoreError::Sqlite)
    }

    /// List all channels, newest first.
    pub fn get_channels(&self) -> Result<Vec<Channel>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, description, channel_type, created_by, created_at
             FROM channels
             ORDER BY created_at DESC",
        )?;

        let rows = stmt.query_map([], row_to_channel)?;

        let mut channels = Vec::new();
        for row in rows {
            channels.push(row?);
        }
        Ok(channels)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a channel.  Messages and memberships cascade; the change
    /// listener sees one delete notification per removed message.
    pub fn remove_channel(&self, id: ChannelId) -> Result<bool> {
        let removed_ids: Vec<String> = {
            let conn = self.conn();
            let mut stmt =
                conn.prepare("SELECT id FROM messages WHERE channel_id = ?1")?;
            let rows = stmt.query_map(params![id.to_string()], |row| row.get(0))?;

            let mut ids = Vec::new();
            for row in rows {
                ids.push(row?);
            }

            let affected = conn.execute(
                "DELETE FROM channels WHERE id = ?1",
                params![id.to_string()],
            )?;
            if affected == 0 {
                return Ok(false);
            }
            ids
        };

        for id_str in removed_ids {
            if let Ok(message_id) = Uuid::parse_str(&id_str) {
                self.notify(|l| {
                    l.message_deleted(id, sparkchat_shared::MessageId(message_id))
                });
            }
        }
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`Channel`].
fn row_to_channel(row: &rusqlite::Row<'_>) -> rusqlite::Result<Channel> {
    let id_str: String = row.get(0)?;
    let name: String = row.get(1)?;
    let description: Option<String> = row.get(2)?;
    let type_str: String = row.get(3)?;
    let created_by_str: String = row.get(4)?;
    let created_str: String = row.get(5)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let channel_type = ChannelType::from_str(&type_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown channel type: {type_str}").into(),
        )
    })?;

    let created_by = Uuid::parse_str(&created_by_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Channel {
        id: ChannelId(id),
        name,
        description,
        channel_type,
        created_by: UserId(created_by),
        created_at,
    })
}
