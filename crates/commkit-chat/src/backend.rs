//! Trait seam for the cloud chat service.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use commkit_shared::{Credentials, FileType, Identity, Result};

/// Server-side thread identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThreadId(pub String);

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct ThreadInfo {
    pub id: ThreadId,
    pub topic: String,
}

/// Reference to a file stored remotely, carried in message metadata.
/// Bytes are fetched lazily through the file store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFileRef {
    pub id: String,
    pub name: String,
    pub file_type: FileType,
}

/// A message as the service reports it. `app_message_id` is the
/// application-assigned id echoed back through metadata and is the dedup
/// key against optimistic local copies.
#[derive(Debug, Clone)]
pub struct RemoteMessage {
    pub app_message_id: Option<Uuid>,
    pub chat_message_id: String,
    pub sender: Identity,
    pub body: Option<String>,
    pub created_at: DateTime<Utc>,
    pub file: Option<RemoteFileRef>,
}

/// One page of thread history. Pages arrive in no guaranteed order.
#[derive(Debug, Clone, Default)]
pub struct RemoteMessagePage {
    pub messages: Vec<RemoteMessage>,
}

/// A read receipt names the latest message the partner has read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadReceipt {
    pub chat_message_id: String,
}

#[derive(Debug, Clone)]
pub struct SendMessageRequest {
    /// Application-assigned id, round-tripped in metadata for dedup.
    pub app_message_id: Uuid,
    pub sender_display_name: String,
    pub body: Option<String>,
    pub file: Option<RemoteFileRef>,
}

/// Operations the chat engine invokes against the cloud chat service.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Establish the authenticated chat session.
    async fn connect(&self, credentials: &Credentials) -> Result<()>;

    /// Subscribe to live message / read-receipt events, delivered as
    /// [`ChatBackendEvent`]s.
    async fn start_live_events(&self) -> Result<()>;

    async fn list_threads(&self) -> Result<Vec<ThreadInfo>>;

    async fn create_thread(
        &self,
        topic: &str,
        self_identity: &Identity,
        display_name: &str,
    ) -> Result<ThreadId>;

    async fn list_participants(&self, thread: &ThreadId) -> Result<Vec<Identity>>;

    async fn add_participant(
        &self,
        thread: &ThreadId,
        participant: &Identity,
        display_name: &str,
    ) -> Result<()>;

    /// Full thread history as pages, order not guaranteed.
    async fn list_messages(&self, thread: &ThreadId) -> Result<Vec<RemoteMessagePage>>;

    /// Returns the server-assigned message id.
    async fn send_message(&self, thread: &ThreadId, request: SendMessageRequest)
        -> Result<String>;

    async fn send_read_receipt(&self, thread: &ThreadId, chat_message_id: &str) -> Result<()>;

    async fn list_read_receipts(&self, thread: &ThreadId) -> Result<Vec<ReadReceipt>>;

    async fn delete_message(&self, thread: &ThreadId, chat_message_id: &str) -> Result<()>;
}

/// Live callbacks from the chat service.
#[derive(Debug, Clone)]
pub enum ChatBackendEvent {
    MessageReceived(RemoteMessage),
    ReadReceiptReceived(ReadReceipt),
}
