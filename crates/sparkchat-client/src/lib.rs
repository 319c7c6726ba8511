//! # sparkchat-client
//!
//! The realtime messaging core: a connection state machine that keeps one
//! live subscription per viewed channel, an ingestion queue that turns raw
//! change events into an ordered de-duplicated message log, pure access
//! validators, and the channel directory / message maintenance operations
//! built on the store contract.
//!
//! The [`session`] module ties the pieces together as a single-writer actor:
//! UI commands, feed callbacks, timer fires, and store confirmations all
//! funnel through one task, so no state is ever mutated from two places.

pub mod connection;
pub mod ingest;
pub mod policy;
pub mod service;
pub mod session;

mod error;

pub use connection::{ConnectionConfig, ConnectionManager, Effect, FailureKind};
pub use error::{ClientError, Result};
pub use ingest::{FlushOutcome, IngestEvent, IngestQueue, MessageLog};
pub use service::ChatService;
pub use session::{
    spawn_session, SessionCommand, SessionConfig, SessionEvent, SessionHandle,
};
