//! `conduit-events`: SQLite-backed [`EventSink`](conduit_core::events::EventSink).
//!
//! Events are stored as JSON bodies alongside their kind, actor, workspace
//! and target so activity feeds can query them without decoding.

pub mod db;
pub mod store;

pub use store::{RecordedEvent, SqliteEventSink};
