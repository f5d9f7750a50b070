//! Trait seam for the remote file store backing chat attachments.

use async_trait::async_trait;
use bytes::Bytes;

use commkit_shared::Result;

/// Attachment byte storage. Message metadata carries only the
/// [`RemoteFileRef`](crate::backend::RemoteFileRef); bytes live here and
/// are downloaded lazily on first display.
#[async_trait]
pub trait RemoteFileStore: Send + Sync {
    /// Upload bytes under `key`. Returns the store-assigned file id.
    async fn upload(&self, key: &str, bytes: Bytes) -> Result<String>;

    async fn download(&self, id: &str) -> Result<Bytes>;

    /// Delete the remote object. Returns the deleted id.
    async fn delete(&self, id: &str) -> Result<String>;
}
