//! CRUD operations for [`ChannelMember`] records.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use sparkchat_shared::{ChannelId, UserId};

use crate::database::{map_conflict, SqliteStore};
use crate::error::{Result, StoreError};
use crate::models::{ChannelMember, MemberRole};

impl SqliteStore {
    /// Insert a membership row.  A second row for the same
    /// `(channel_id, user_id)` pair maps to `Conflict`.
    pub fn create_member(&self, member: ChannelMember) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO channel_members (channel_id, user_id, role, joined_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    member.channel_id.to_string(),
                    member.user_id.to_string(),
                    member.role.as_str(),
                    member.joined_at.to_rfc3339(),
                ],
            )
            .map_err(|e| map_conflict(e, "already a member"))?;
        Ok(())
    }

    /// Fetch one membership row, if present.
    pub fn get_member(
        &self,
        channel_id: ChannelId,
        user_id: UserId,
    ) -> Result<Option<ChannelMember>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT channel_id, user_id, role, joined_at
             FROM channel_members
             WHERE channel_id = ?1 AND user_id = ?2",
        )?;

        let mut rows = stmt.query_map(
            params![channel_id.to_string(), user_id.to_string()],
            row_to_member,
        )?;
        rows.next().transpose().map_err(StoreError::Sqlite)
    }

    /// All members of a channel, oldest join first.
    pub fn get_members(&self, channel_id: ChannelId) -> Result<Vec<ChannelMember>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT channel_id, user_id, role, joined_at
             FROM channel_members
             WHERE channel_id = ?1
             ORDER BY joined_at ASC",
        )?;

        let rows = stmt.query_map(params![channel_id.to_string()], row_to_member)?;

        let mut members = Vec::new();
        for row in rows {
            members.push(row?);
        }
        Ok(members)
    }

    /// Number of members in a channel.
    pub fn count_members(&self, channel_id: ChannelId) -> Result<usize> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM channel_members WHERE channel_id = ?1",
            params![channel_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// All memberships of one user, oldest join first.
    pub fn get_memberships(&self, user_id: UserId) -> Result<Vec<ChannelMember>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT channel_id, user_id, role, joined_at
             FROM channel_members
             WHERE user_id = ?1
             ORDER BY joined_at ASC",
        )?;

        let rows = stmt.query_map(params![user_id.to_string()], row_to_member)?;

        let mut memberships = Vec::new();
        for row in rows {
            memberships.push(row?);
        }
        Ok(memberships)
    }

    /// Remove a membership row.  Returns `true` if a row was deleted.
    pub fn delete_member(&self, channel_id: ChannelId, user_id: UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM channel_members WHERE channel_id = ?1 AND user_id = ?2",
            params![channel_id.to_string(), user_id.to_string()],
        )?;
        Ok(affected > 0)
    }
}

/// Map a `rusqlite::Row` to a [`ChannelMember`].
fn row_to_member(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChannelMember> {
    let channel_str: String = row.get(0)?;
    let user_str: String = row.get(1)?;
    let role_str: String = row.get(2)?;
    let joined_str: String = row.get(3)?;

    let channel_id = Uuid::parse_str(&channel_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let user_id = Uuid::parse_str(&user_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let role = MemberRole::from_str(&role_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown member role: {role_str}").into(),
        )
    })?;

    let joined_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&joined_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(ChannelMember {
        channel_id: ChannelId(channel_id),
        user_id: UserId(user_id),
        role,
        joined_at,
    })
}
