//! # sparkchat-shared
//!
//! Identifiers, connection status values, and tuning constants shared by
//! every sparkchat crate.  Nothing in here performs I/O.

pub mod constants;
pub mod types;

pub use types::{ChannelId, ClientToken, ConnectionStatus, MessageId, UserId};
