//! SQLite-backed store used as the local channel mirror.
//!
//! The [`SqliteStore`] struct owns a [`rusqlite::Connection`] behind a mutex
//! and guarantees that migrations are run before any other operation.  It
//! implements the same [`DataStore`] contract as the in-memory store, so
//! the messaging core cannot tell them apart.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use rusqlite::Connection;

use sparkchat_shared::{ChannelId, MessageId, UserId};

use crate::error::{Result, StoreError};
use crate::migrations;
use crate::models::{Channel, ChannelMember, Message, NewChannel, NewMessage};
use crate::store::{ChangeListener, DataStore, MessagePatch, MessageQuery};

/// Wrapper around a [`rusqlite::Connection`].
pub struct SqliteStore {
    conn: Mutex<Connection>,
    listener: RwLock<Option<Arc<dyn ChangeListener>>>,
}

impl SqliteStore {
    /// Open (or create) the default application database.
    ///
    /// The database file is placed in the platform-appropriate data
    /// directory:
    /// - Linux:   `~/.local/share/sparkchat/sparkchat.db`
    /// - macOS:   `~/Library/Application Support/com.sparkchat.sparkchat/sparkchat.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\sparkchat\sparkchat\data\sparkchat.db`
    pub fn new() -> Result<Self> {
        let project_dirs =
            ProjectDirs::from("com", "sparkchat", "sparkchat").ok_or(StoreError::NoDataDir)?;

        let data_dir = project_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;

        let db_path = data_dir.join("sparkchat.db");

        tracing::info!(path = %db_path.display(), "opening database");

        Self::open_at(&db_path)
    }

    /// Open (or create) a database at an explicit path.
    ///
    /// This is useful for tests and for embedding the store inside custom
    /// directory layouts.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Recommended SQLite settings.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        // Run schema migrations.
        migrations::run_migrations(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            listener: RwLock::new(None),
        })
    }

    /// Register the observer notified after message mutations.
    pub fn set_listener(&self, listener: Arc<dyn ChangeListener>) {
        *self.listener.write().expect("listener lock poisoned") = Some(listener);
    }

    /// Lock and return the underlying connection.
    ///
    /// Callers should prefer the typed CRUD helpers, but direct access is
    /// occasionally needed for transactions or ad-hoc queries.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("connection lock poisoned")
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn().path().map(PathBuf::from)
    }

    pub(crate) fn notify<F: FnOnce(&dyn ChangeListener)>(&self, f: F) {
        let guard = self.listener.read().expect("listener lock poisoned");
        if let Some(listener) = guard.as_ref() {
            f(listener.as_ref());
        }
    }
}

/// Map a constraint violation onto the tagged `Conflict` class, leaving
/// other SQLite failures untouched.
pub(crate) fn map_conflict(err: rusqlite::Error, what: &str) -> StoreError {
    if let rusqlite::Error::SqliteFailure(inner, _) = &err {
        if inner.code == rusqlite::ErrorCode::ConstraintViolation {
            return StoreError::Conflict(what.to_string());
        }
    }
    StoreError::Sqlite(err)
}

impl DataStore for SqliteStore {
    fn insert_channel(&self, new: NewChannel) -> Result<Channel> {
        self.create_channel(new)
    }

    fn channel(&self, id: ChannelId) -> Result<Channel> {
        self.get_channel(id)
    }

    fn channel_by_name(&self, name: &str) -> Result<Option<Channel>> {
        self.get_channel_by_name(name)
    }

    fn list_channels(&self) -> Result<Vec<Channel>> {
        self.get_channels()
    }

    fn delete_channel(&self, id: ChannelId) -> Result<bool> {
        self.remove_channel(id)
    }

    fn insert_member(&self, member: ChannelMember) -> Result<()> {
        self.create_member(member)
    }

    fn member(&self, channel_id: ChannelId, user_id: UserId) -> Result<Option<ChannelMember>> {
        self.get_member(channel_id, user_id)
    }

    fn members(&self, channel_id: ChannelId) -> Result<Vec<ChannelMember>> {
        self.get_members(channel_id)
    }

    fn member_count(&self, channel_id: ChannelId) -> Result<usize> {
        self.count_members(channel_id)
    }

    fn memberships(&self, user_id: UserId) -> Result<Vec<ChannelMember>> {
        self.get_memberships(user_id)
    }

    fn remove_member(&self, channel_id: ChannelId, user_id: UserId) -> Result<bool> {
        self.delete_member(channel_id, user_id)
    }

    fn insert_message(&self, new: NewMessage) -> Result<Message> {
        self.create_message(new)
    }

    fn message(&self, id: MessageId) -> Result<Option<Message>> {
        self.get_message(id)
    }

    fn update_message(&self, id: MessageId, patch: MessagePatch) -> Result<Message> {
        self.patch_message(id, patch)
    }

    fn delete_message(&self, id: MessageId) -> Result<bool> {
        self.remove_message(id)
    }

    fn query_messages(&self, query: &MessageQuery) -> Result<Vec<Message>> {
        self.get_messages(query)
    }

    fn touch_presence(&self, user_id: UserId, at: DateTime<Utc>) -> Result<()> {
        self.upsert_presence(user_id, at)
    }

    fn last_active(&self, user_id: UserId) -> Result<Option<DateTime<Utc>>> {
        self.get_last_active(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        let store = SqliteStore::open_at(&path).expect("should open");
        assert!(store.path().is_some());
    }
}
