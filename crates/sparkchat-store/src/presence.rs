//! Last-active stamps backing the online-members view.

use chrono::{DateTime, Utc};
use rusqlite::params;

use sparkchat_shared::UserId;

use crate::database::SqliteStore;
use crate::error::{Result, StoreError};

impl SqliteStore {
    /// Stamp a user as active at `at`, inserting or updating their row.
    pub fn upsert_presence(&self, user_id: UserId, at: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            "INSERT INTO presence (user_id, last_active) VALUES (?1, ?2)
             ON CONFLICT(user_id) DO UPDATE SET last_active = excluded.last_active",
            params![user_id.to_string(), at.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Last-active stamp for a user, if one exists.
    pub fn get_last_active(&self, user_id: UserId) -> Result<Option<DateTime<Utc>>> {
        let stamp: Option<String> = self
            .conn()
            .query_row(
                "SELECT last_active FROM presence WHERE user_id = ?1",
                params![user_id.to_string()],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        stamp
            .map(|s| {
                DateTime::parse_from_rfc3339(&s)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(StoreError::ChronoParse)
            })
            .transpose()
    }
}
