//! Chat domain models.
//!
//! `ChatMessage` is the unit the chat engine, orchestrator and store all
//! agree on. Its `id` is assigned locally at creation and stays stable for
//! the message's whole life; the remote service assigns its own
//! `chat_message_id` asynchronously after a send completes, so dedup against
//! echoed remote events always goes through the local id.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{ChatMessageStatus, FileType, Identity};

/// A file riding along a chat message.
///
/// Name and type are always present, even before the bytes have been
/// downloaded from the remote file store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileAttachment {
    pub id: Uuid,
    /// Identifier the remote file store assigned. Present once the upload
    /// completed, or immediately for attachments received from the service.
    pub remote_id: Option<String>,
    pub name: String,
    pub file_type: FileType,
    /// Lazily fetched and cached once. `None` until the download completes.
    #[serde(skip)]
    pub bytes: Option<Bytes>,
}

impl FileAttachment {
    pub fn new(name: String, file_type: FileType, bytes: Option<Bytes>) -> Self {
        Self {
            id: Uuid::new_v4(),
            remote_id: None,
            name,
            file_type,
            bytes,
        }
    }
}

/// A single chat message in the two-party thread.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    /// Locally generated, stable for the message's life. Used for
    /// deduplication against incoming remote events.
    pub id: Uuid,
    /// Identifier the remote service assigned after the send completed.
    pub chat_message_id: Option<String>,
    pub sender: Identity,
    pub body: Option<String>,
    pub attachment: Option<FileAttachment>,
    pub created_at: DateTime<Utc>,
    pub status: ChatMessageStatus,
    /// Soft-delete marker set on remote-delete confirmation.
    pub is_invalidated: bool,
}

impl ChatMessage {
    /// A locally composed message, stored optimistically at `Pending`
    /// before the remote send completes.
    pub fn outgoing(
        sender: Identity,
        body: Option<String>,
        attachment: Option<FileAttachment>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            chat_message_id: None,
            sender,
            body,
            attachment,
            created_at: Utc::now(),
            status: ChatMessageStatus::Pending,
            is_invalidated: false,
        }
    }

    /// A message materialized from a remote event or history item.
    pub fn from_remote(
        id: Uuid,
        chat_message_id: String,
        sender: Identity,
        body: Option<String>,
        attachment: Option<FileAttachment>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            chat_message_id: Some(chat_message_id),
            sender,
            body,
            attachment,
            created_at,
            status: ChatMessageStatus::Sent,
            is_invalidated: false,
        }
    }

    /// Whether this message was sent by the given local identity.
    pub fn is_own(&self, local: &Identity) -> bool {
        &self.sender == local
    }
}
