//! # commkit-chat
//!
//! The chat side of commkit: a single-task [`engine::ChatEngine`] driving an
//! opaque cloud chat service behind the [`backend::ChatBackend`] trait, plus
//! the pure read-receipt reconciliation algorithms in [`receipts`].
//!
//! The engine owns the thread session; the orchestrator in `commkit-client`
//! owns the message list and applies engine events to its store.

pub mod backend;
pub mod engine;
pub mod files;
pub mod receipts;

pub use backend::{
    ChatBackend, ChatBackendEvent, ReadReceipt, RemoteFileRef, RemoteMessage, RemoteMessagePage,
    SendMessageRequest, ThreadId, ThreadInfo,
};
pub use engine::{ChatEngine, ChatEngineEvent, ChatEngineHandle};
pub use files::RemoteFileStore;
pub use receipts::{apply_read_receipt, is_duplicate, reconcile_read_receipts};
