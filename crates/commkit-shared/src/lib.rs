//! # commkit-shared
//!
//! Leaf types shared by every commkit crate: call and chat domain models,
//! the push wake-payload wire format, and the common error taxonomy.
//!
//! Nothing in here talks to the network or owns a task; these are plain
//! value types plus a handful of parsing helpers.

pub mod chat;
pub mod error;
pub mod types;
pub mod wake;

pub use chat::{ChatMessage, FileAttachment};
pub use error::{CommError, Result};
pub use types::{CallHandle, CallState, ChatMessageStatus, Credentials, FileType, Identity};
pub use wake::{parse_wake_payload, IncomingCallDescriptor};
