//! # sparkchat-store
//!
//! Domain models and the data-store contract consumed by the messaging
//! core, plus two reference implementations: an in-memory store used by
//! tests and the demo console, and a SQLite-backed local store that mirrors
//! channel data on disk.
//!
//! The core never talks to a backend directly; everything goes through the
//! [`DataStore`] trait so a hosted backend, the SQLite mirror, and the test
//! fake are interchangeable.

pub mod channels;
pub mod database;
pub mod members;
pub mod memory;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod presence;
pub mod store;

mod error;

pub use database::SqliteStore;
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use models::*;
pub use store::{ChangeListener, DataStore, MessagePatch, MessageQuery, SortOrder};
