//! # commkit-store
//!
//! Local durable storage for the chat message list, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle wrapping a
//! `rusqlite::Connection` with typed CRUD helpers, and the [`MessageStore`]
//! trait the chat orchestrator consumes as its persistence boundary.

pub mod database;
pub mod messages;
pub mod migrations;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use messages::MessageStore;
