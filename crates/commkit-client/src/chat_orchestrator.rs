//! The chat orchestrator: owns the message list.
//!
//! It is the only writer of the local store. Chat engine events are applied
//! to the store and mirrored in memory; the ordered, deduplicated list is
//! published over a watch channel. Read receipts cascade through the pure
//! algorithms in `commkit_chat::receipts`.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use commkit_chat::{
    apply_read_receipt, is_duplicate, reconcile_read_receipts, ChatEngineEvent, ChatEngineHandle,
    RemoteFileStore, RemoteMessage,
};
use commkit_shared::{
    ChatMessage, ChatMessageStatus, CommError, FileAttachment, Identity, Result,
};
use commkit_store::MessageStore;

#[derive(Debug)]
enum Command {
    Send {
        body: Option<String>,
        attachment: Option<FileAttachment>,
    },
    DeleteForAll(Uuid),
    DeleteLocally(Uuid),
    FetchAttachment(Uuid),
    Shutdown,
}

/// Clonable command-side handle to a spawned [`ChatOrchestrator`].
#[derive(Clone)]
pub struct ChatOrchestratorHandle {
    cmd_tx: mpsc::Sender<Command>,
}

impl ChatOrchestratorHandle {
    async fn send_cmd(&self, cmd: Command) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| CommError::ChannelClosed)
    }

    /// Compose and send a message. The optimistic Pending copy appears in
    /// the published list immediately; attachment bytes are uploaded before
    /// the remote send.
    pub async fn send_message(
        &self,
        body: Option<String>,
        attachment: Option<FileAttachment>,
    ) -> Result<()> {
        self.send_cmd(Command::Send { body, attachment }).await
    }

    /// Delete an own message for all participants. Rejected without a
    /// remote call once the partner has read it.
    pub async fn delete_for_all(&self, local_id: Uuid) -> Result<()> {
        self.send_cmd(Command::DeleteForAll(local_id)).await
    }

    /// Remove a message from the local store only.
    pub async fn delete_locally(&self, local_id: Uuid) -> Result<()> {
        self.send_cmd(Command::DeleteLocally(local_id)).await
    }

    /// Download attachment bytes for a message, cached once in the store.
    pub async fn fetch_attachment(&self, local_id: Uuid) -> Result<()> {
        self.send_cmd(Command::FetchAttachment(local_id)).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send_cmd(Command::Shutdown).await
    }
}

pub struct ChatOrchestrator;

impl ChatOrchestrator {
    /// Spawn the orchestrator task. The store's existing content seeds the
    /// published list.
    pub fn spawn(
        store: Box<dyn MessageStore>,
        files: Arc<dyn RemoteFileStore>,
        engine: ChatEngineHandle,
        engine_events: mpsc::Receiver<ChatEngineEvent>,
        local: Identity,
    ) -> (ChatOrchestratorHandle, watch::Receiver<Vec<ChatMessage>>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let messages = match store.fetch_all() {
            Ok(messages) => messages,
            Err(e) => {
                error!(error = %e, "store load failed, starting with empty history");
                Vec::new()
            }
        };
        let (list_tx, list_rx) = watch::channel(messages.clone());

        let state = OrchestratorState {
            store,
            files,
            engine,
            local,
            messages,
            list_tx,
        };

        tokio::spawn(orchestrator_loop(state, cmd_rx, engine_events));

        (ChatOrchestratorHandle { cmd_tx }, list_rx)
    }
}

async fn orchestrator_loop(
    mut state: OrchestratorState,
    mut cmd_rx: mpsc::Receiver<Command>,
    mut engine_rx: mpsc::Receiver<ChatEngineEvent>,
) {
    info!("chat orchestrator started");
    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Shutdown) | None => break,
                Some(cmd) => state.handle_command(cmd).await,
            },
            Some(event) = engine_rx.recv() => state.handle_engine_event(event).await,
        }
    }
    info!("chat orchestrator stopped");
}

struct OrchestratorState {
    store: Box<dyn MessageStore>,
    files: Arc<dyn RemoteFileStore>,
    engine: ChatEngineHandle,
    local: Identity,
    messages: Vec<ChatMessage>,
    list_tx: watch::Sender<Vec<ChatMessage>>,
}

impl OrchestratorState {
    fn publish(&mut self) {
        self.messages.sort_by_key(|m| m.created_at);
        self.list_tx.send_replace(self.messages.clone());
    }

    fn persist(&self, message: &ChatMessage) {
        if let Err(e) = self.store.update(message) {
            error!(id = %message.id, error = %e, "store update failed");
        }
    }

    fn find_mut(&mut self, local_id: Uuid) -> Option<&mut ChatMessage> {
        self.messages.iter_mut().find(|m| m.id == local_id)
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Send { body, attachment } => self.send(body, attachment).await,
            Command::DeleteForAll(local_id) => self.delete_for_all(local_id).await,
            Command::DeleteLocally(local_id) => {
                if let Err(e) = self.store.delete(local_id) {
                    error!(id = %local_id, error = %e, "local delete failed");
                    return;
                }
                self.messages.retain(|m| m.id != local_id);
                self.publish();
            }
            Command::FetchAttachment(local_id) => self.fetch_attachment(local_id).await,
            Command::Shutdown => unreachable!("handled by the loop"),
        }
    }

    async fn send(&mut self, body: Option<String>, attachment: Option<FileAttachment>) {
        let mut message = ChatMessage::outgoing(self.local.clone(), body, attachment);
        if let Err(e) = self.store.insert(&message) {
            error!(error = %e, "optimistic insert failed");
            return;
        }
        self.messages.push(message.clone());
        self.publish();

        // Upload attachment bytes before the remote send so the message
        // metadata can carry the file-store id.
        let mut uploaded = false;
        if let Some(att) = message.attachment.as_mut() {
            let Some(bytes) = att.bytes.clone() else {
                warn!(id = %message.id, "attachment without bytes, message stays pending");
                return;
            };
            let key = att.id.to_string();
            match self.files.upload(&key, bytes).await {
                Ok(remote_id) => {
                    att.remote_id = Some(remote_id);
                    uploaded = true;
                }
                Err(e) => {
                    // The message stays Pending; there is no retry.
                    warn!(id = %message.id, error = %e, "attachment upload failed");
                    return;
                }
            }
        }
        if uploaded {
            let attachment = message.attachment.clone();
            if let Some(stored) = self.find_mut(message.id) {
                stored.attachment = attachment;
            }
            self.persist(&message);
        }

        if let Err(e) = self.engine.send(message).await {
            error!(error = %e, "send command lost");
        }
    }

    async fn delete_for_all(&mut self, local_id: Uuid) {
        let Some(message) = self.messages.iter().find(|m| m.id == local_id) else {
            warn!(id = %local_id, "delete for unknown message");
            return;
        };
        if !message.is_own(&self.local) {
            warn!(id = %local_id, "refusing to delete a partner message");
            return;
        }
        if message.status == ChatMessageStatus::Read {
            // Already read by the partner: rejected locally, the service
            // is never asked.
            warn!(id = %local_id, "delete rejected, message already read");
            return;
        }
        let Some(chat_message_id) = message.chat_message_id.clone() else {
            warn!(id = %local_id, "delete rejected, message not yet confirmed");
            return;
        };
        let status = message.status;
        if let Err(e) = self.engine.delete(chat_message_id, status).await {
            error!(error = %e, "delete command lost");
        }
    }

    async fn fetch_attachment(&mut self, local_id: Uuid) {
        let Some(message) = self.messages.iter().find(|m| m.id == local_id) else {
            return;
        };
        let Some(att) = message.attachment.as_ref() else {
            return;
        };
        if att.bytes.is_some() {
            return;
        }
        let Some(remote_id) = att.remote_id.clone() else {
            warn!(id = %local_id, "attachment has no remote id to download");
            return;
        };
        match self.files.download(&remote_id).await {
            Ok(bytes) => {
                let mut updated = None;
                if let Some(message) = self.find_mut(local_id) {
                    if let Some(att) = message.attachment.as_mut() {
                        att.bytes = Some(bytes);
                    }
                    updated = Some(message.clone());
                }
                if let Some(message) = updated {
                    self.persist(&message);
                    self.publish();
                }
            }
            Err(e) => warn!(id = %local_id, error = %e, "attachment download failed"),
        }
    }

    async fn handle_engine_event(&mut self, event: ChatEngineEvent) {
        match event {
            ChatEngineEvent::SetupFinished => debug!("chat thread ready"),
            ChatEngineEvent::SetupFailed(e) => error!(error = %e, "chat setup failed"),
            ChatEngineEvent::HistoryLoaded(items) => {
                let mut changed = false;
                for item in items {
                    changed |= self.absorb_remote(item, false).await;
                }
                if changed {
                    self.publish();
                }
            }
            ChatEngineEvent::MessageReceived(item) => {
                let chat_message_id = item.chat_message_id.clone();
                let from_partner = !self.is_own_remote(&item);
                if self.absorb_remote(item, true).await {
                    self.publish();
                    if from_partner {
                        let _ = self.engine.send_read_receipt(chat_message_id).await;
                    }
                }
            }
            ChatEngineEvent::MessageSent {
                local_id,
                chat_message_id,
            } => {
                let mut updated = None;
                if let Some(message) = self.find_mut(local_id) {
                    message.chat_message_id = Some(chat_message_id);
                    message.status = message.status.advance(ChatMessageStatus::Sent);
                    updated = Some(message.clone());
                }
                if let Some(message) = updated {
                    self.persist(&message);
                    self.publish();
                }
            }
            ChatEngineEvent::SendFailed { local_id, error } => {
                // The optimistic copy stays Pending permanently.
                warn!(id = %local_id, error = %error, "message send failed");
            }
            ChatEngineEvent::MessageDeleted(chat_message_id) => {
                self.mark_deleted(&chat_message_id).await;
            }
            ChatEngineEvent::DeleteFailed {
                chat_message_id,
                error,
            } => {
                warn!(%chat_message_id, error = %error, "delete failed");
            }
            ChatEngineEvent::ReadReceiptReceived(receipt) => {
                let changed =
                    apply_read_receipt(&mut self.messages, &self.local, &receipt.chat_message_id);
                self.persist_changed(&changed);
            }
            ChatEngineEvent::ReceiptsReconciled(receipts) => {
                let changed =
                    reconcile_read_receipts(&mut self.messages, &self.local, &receipts);
                self.persist_changed(&changed);
            }
            ChatEngineEvent::ReadReceiptsWanted => {
                self.acknowledge_latest_partner_message().await;
            }
        }
    }

    fn is_own_remote(&self, item: &RemoteMessage) -> bool {
        item.sender.raw() == self.local.raw()
    }

    /// Store a remote message unless it is an echo or already known.
    /// Returns whether the list changed. `live` controls the attachment
    /// download (history items stay metadata-only until displayed).
    async fn absorb_remote(&mut self, item: RemoteMessage, live: bool) -> bool {
        if is_duplicate(&self.messages, &item) {
            // Echo of an own send: adopt the server id if the confirmation
            // has not arrived yet.
            let app_id = item.app_message_id.unwrap_or_default();
            let mut updated = None;
            if let Some(message) = self.find_mut(app_id) {
                if message.chat_message_id.is_none() {
                    message.chat_message_id = Some(item.chat_message_id);
                    message.status = message.status.advance(ChatMessageStatus::Sent);
                    updated = Some(message.clone());
                }
            }
            if let Some(message) = updated {
                self.persist(&message);
                return true;
            }
            return false;
        }
        if self
            .messages
            .iter()
            .any(|m| m.chat_message_id.as_deref() == Some(item.chat_message_id.as_str()))
        {
            return false;
        }

        let attachment = item.file.as_ref().map(|f| FileAttachment {
            id: Uuid::new_v4(),
            remote_id: Some(f.id.clone()),
            name: f.name.clone(),
            file_type: f.file_type,
            bytes: None,
        });
        let mut message = ChatMessage::from_remote(
            item.app_message_id.unwrap_or_else(Uuid::new_v4),
            item.chat_message_id,
            item.sender,
            item.body,
            attachment,
            item.created_at,
        );

        if live && message.attachment.is_some() {
            self.download_attachment(&mut message).await;
        }

        if let Err(e) = self.store.insert(&message) {
            error!(id = %message.id, error = %e, "remote message insert failed");
        }
        self.messages.push(message);
        true
    }

    async fn download_attachment(&mut self, message: &mut ChatMessage) {
        let Some(att) = message.attachment.as_mut() else {
            return;
        };
        let Some(remote_id) = att.remote_id.clone() else {
            return;
        };
        match self.files.download(&remote_id).await {
            Ok(bytes) => att.bytes = Some(bytes),
            Err(e) => warn!(%remote_id, error = %e, "attachment download failed"),
        }
    }

    async fn mark_deleted(&mut self, chat_message_id: &str) {
        let mut updated = None;
        if let Some(message) = self
            .messages
            .iter_mut()
            .find(|m| m.chat_message_id.as_deref() == Some(chat_message_id))
        {
            message.is_invalidated = true;
            let remote_file = message
                .attachment
                .as_mut()
                .and_then(|att| {
                    att.bytes = None;
                    att.remote_id.clone()
                });
            updated = Some((message.clone(), remote_file));
        }
        let Some((message, remote_file)) = updated else {
            return;
        };
        self.persist(&message);
        if let Some(remote_id) = remote_file {
            if let Err(e) = self.files.delete(&remote_id).await {
                warn!(%remote_id, error = %e, "remote file delete failed");
            }
        }
        self.publish();
    }

    fn persist_changed(&mut self, changed: &[Uuid]) {
        if changed.is_empty() {
            return;
        }
        for id in changed {
            if let Some(message) = self.messages.iter().find(|m| m.id == *id) {
                if let Err(e) = self.store.update(message) {
                    error!(id = %message.id, error = %e, "store update failed");
                }
            }
        }
        self.publish();
    }

    /// Answer `ReadReceiptsWanted`: acknowledge the partner's latest
    /// message so their side can advance its own read cascade.
    async fn acknowledge_latest_partner_message(&mut self) {
        let latest = self
            .messages
            .iter()
            .filter(|m| !m.is_own(&self.local) && !m.is_invalidated)
            .max_by_key(|m| m.created_at)
            .and_then(|m| m.chat_message_id.clone());
        if let Some(chat_message_id) = latest {
            let _ = self.engine.send_read_receipt(chat_message_id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::{Duration as ChronoDuration, Utc};
    use commkit_chat::{
        ChatBackend, ChatBackendEvent, ChatEngine, ReadReceipt, RemoteMessagePage,
        SendMessageRequest, ThreadId, ThreadInfo,
    };
    use commkit_shared::{Credentials, FileType};
    use commkit_store::Database;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct TestChatBackend {
        ops: Mutex<Vec<String>>,
    }

    impl TestChatBackend {
        fn ops(&self) -> Vec<String> {
            self.ops.lock().unwrap().clone()
        }
        fn record(&self, op: String) {
            self.ops.lock().unwrap().push(op);
        }
    }

    #[async_trait]
    impl ChatBackend for TestChatBackend {
        async fn connect(&self, _credentials: &Credentials) -> Result<()> {
            self.record("connect".into());
            Ok(())
        }
        async fn start_live_events(&self) -> Result<()> {
            Ok(())
        }
        async fn list_threads(&self) -> Result<Vec<ThreadInfo>> {
            Ok(Vec::new())
        }
        async fn create_thread(
            &self,
            _topic: &str,
            _self_identity: &Identity,
            _display_name: &str,
        ) -> Result<ThreadId> {
            Ok(ThreadId("thread-1".into()))
        }
        async fn list_participants(&self, _thread: &ThreadId) -> Result<Vec<Identity>> {
            Ok(Vec::new())
        }
        async fn add_participant(
            &self,
            _thread: &ThreadId,
            _participant: &Identity,
            _display_name: &str,
        ) -> Result<()> {
            Ok(())
        }
        async fn list_messages(&self, _thread: &ThreadId) -> Result<Vec<RemoteMessagePage>> {
            Ok(Vec::new())
        }
        async fn send_message(
            &self,
            _thread: &ThreadId,
            request: SendMessageRequest,
        ) -> Result<String> {
            let file = request
                .file
                .map(|f| f.id)
                .unwrap_or_else(|| "none".into());
            self.record(format!("send:{file}"));
            Ok("srv-1".into())
        }
        async fn send_read_receipt(
            &self,
            _thread: &ThreadId,
            chat_message_id: &str,
        ) -> Result<()> {
            self.record(format!("receipt:{chat_message_id}"));
            Ok(())
        }
        async fn list_read_receipts(&self, _thread: &ThreadId) -> Result<Vec<ReadReceipt>> {
            Ok(Vec::new())
        }
        async fn delete_message(
            &self,
            _thread: &ThreadId,
            chat_message_id: &str,
        ) -> Result<()> {
            self.record(format!("delete:{chat_message_id}"));
            Ok(())
        }
    }

    #[derive(Default)]
    struct TestFileStore {
        ops: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RemoteFileStore for TestFileStore {
        async fn upload(&self, key: &str, _bytes: Bytes) -> Result<String> {
            self.ops.lock().unwrap().push(format!("upload:{key}"));
            Ok(format!("remote-{key}"))
        }
        async fn download(&self, id: &str) -> Result<Bytes> {
            self.ops.lock().unwrap().push(format!("download:{id}"));
            Ok(Bytes::from_static(b"bytes"))
        }
        async fn delete(&self, id: &str) -> Result<String> {
            self.ops.lock().unwrap().push(format!("delete:{id}"));
            Ok(id.to_string())
        }
    }

    fn me() -> Identity {
        Identity::Local("me".into())
    }

    fn credentials() -> Credentials {
        Credentials {
            identifier: "me".into(),
            token: "token".into(),
            display_name: "Me".into(),
            endpoint: Some("https://chat.example".into()),
        }
    }

    struct Fixture {
        chat_backend: Arc<TestChatBackend>,
        file_store: Arc<TestFileStore>,
        backend_tx: mpsc::Sender<ChatBackendEvent>,
        orchestrator: ChatOrchestratorHandle,
        list: watch::Receiver<Vec<ChatMessage>>,
    }

    async fn fixture_with_store(db: Database) -> Fixture {
        let chat_backend = Arc::new(TestChatBackend::default());
        let file_store = Arc::new(TestFileStore::default());
        let (backend_tx, backend_rx) = mpsc::channel(16);

        let (engine, engine_events) = ChatEngine::spawn(chat_backend.clone(), backend_rx);
        engine.initialize(credentials()).await.unwrap();
        engine
            .start_or_resume_thread(Identity::Local("partner".into()), "Partner".into())
            .await
            .unwrap();

        let (orchestrator, list) = ChatOrchestrator::spawn(
            Box::new(db),
            file_store.clone(),
            engine,
            engine_events,
            me(),
        );

        Fixture {
            chat_backend,
            file_store,
            backend_tx,
            orchestrator,
            list,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with_store(Database::open_in_memory().unwrap()).await
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition never became true");
    }

    #[tokio::test]
    async fn send_publishes_pending_then_advances_to_sent() {
        let mut fx = fixture().await;
        fx.orchestrator
            .send_message(Some("hi".into()), None)
            .await
            .unwrap();

        wait_until(|| {
            fx.list
                .borrow()
                .first()
                .is_some_and(|m| m.status == ChatMessageStatus::Sent)
        })
        .await;
        let list = fx.list.borrow().clone();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].chat_message_id.as_deref(), Some("srv-1"));
    }

    #[tokio::test]
    async fn echoed_own_message_is_not_duplicated() {
        let mut fx = fixture().await;
        fx.orchestrator
            .send_message(Some("hi".into()), None)
            .await
            .unwrap();
        wait_until(|| !fx.list.borrow().is_empty()).await;
        let local_id = fx.list.borrow()[0].id;

        fx.backend_tx
            .send(ChatBackendEvent::MessageReceived(RemoteMessage {
                app_message_id: Some(local_id),
                chat_message_id: "srv-1".into(),
                sender: me(),
                body: Some("hi".into()),
                created_at: Utc::now(),
                file: None,
            }))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(fx.list.borrow().len(), 1);
        // No read receipt for an own echo.
        assert!(!fx
            .chat_backend
            .ops()
            .iter()
            .any(|op| op.starts_with("receipt")));
    }

    #[tokio::test]
    async fn partner_message_is_stored_and_acknowledged() {
        let mut fx = fixture().await;
        fx.backend_tx
            .send(ChatBackendEvent::MessageReceived(RemoteMessage {
                app_message_id: Some(Uuid::new_v4()),
                chat_message_id: "srv-7".into(),
                sender: Identity::Local("partner".into()),
                body: Some("hello".into()),
                created_at: Utc::now(),
                file: None,
            }))
            .await
            .unwrap();

        wait_until(|| fx.list.borrow().len() == 1).await;
        wait_until(|| {
            fx.chat_backend
                .ops()
                .contains(&"receipt:srv-7".to_string())
        })
        .await;
    }

    #[tokio::test]
    async fn history_load_acknowledges_stored_partner_message() {
        let db = Database::open_in_memory().unwrap();
        let message = ChatMessage::from_remote(
            Uuid::new_v4(),
            "srv-5".into(),
            Identity::Local("partner".into()),
            Some("hello".into()),
            None,
            Utc::now(),
        );
        db.insert(&message).unwrap();

        // Thread setup runs inside the fixture; its history pass must
        // answer with a receipt for the partner's latest message.
        let fx = fixture_with_store(db).await;
        wait_until(|| {
            fx.chat_backend
                .ops()
                .contains(&"receipt:srv-5".to_string())
        })
        .await;
    }

    #[tokio::test]
    async fn live_read_receipt_cascades_and_persists() {
        let db = Database::open_in_memory().unwrap();
        let mut older = ChatMessage::outgoing(me(), Some("a".into()), None);
        older.created_at = Utc::now() - ChronoDuration::minutes(10);
        older.chat_message_id = Some("srv-a".into());
        older.status = ChatMessageStatus::Sent;
        let mut newer = ChatMessage::outgoing(me(), Some("b".into()), None);
        newer.chat_message_id = Some("srv-b".into());
        newer.status = ChatMessageStatus::Sent;
        db.insert(&older).unwrap();
        db.insert(&newer).unwrap();

        let mut fx = fixture_with_store(db).await;
        fx.backend_tx
            .send(ChatBackendEvent::ReadReceiptReceived(ReadReceipt {
                chat_message_id: "srv-b".into(),
            }))
            .await
            .unwrap();

        wait_until(|| {
            fx.list
                .borrow()
                .iter()
                .all(|m| m.status == ChatMessageStatus::Read)
        })
        .await;
    }

    #[tokio::test]
    async fn delete_of_read_message_never_reaches_the_service() {
        let db = Database::open_in_memory().unwrap();
        let mut read = ChatMessage::outgoing(me(), Some("a".into()), None);
        read.chat_message_id = Some("srv-a".into());
        read.status = ChatMessageStatus::Read;
        db.insert(&read).unwrap();
        let local_id = read.id;

        let fx = fixture_with_store(db).await;
        fx.orchestrator.delete_for_all(local_id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!fx
            .chat_backend
            .ops()
            .iter()
            .any(|op| op.starts_with("delete")));
    }

    #[tokio::test]
    async fn confirmed_delete_invalidates_and_removes_remote_file() {
        let db = Database::open_in_memory().unwrap();
        let mut message = ChatMessage::outgoing(me(), None, None);
        let mut att = FileAttachment::new("pic.jpg".into(), FileType::Image, None);
        att.remote_id = Some("remote-1".into());
        att.bytes = Some(Bytes::from_static(b"img"));
        message.attachment = Some(att);
        message.chat_message_id = Some("srv-a".into());
        message.status = ChatMessageStatus::Sent;
        db.insert(&message).unwrap();
        let local_id = message.id;

        let mut fx = fixture_with_store(db).await;
        fx.orchestrator.delete_for_all(local_id).await.unwrap();

        wait_until(|| fx.list.borrow().iter().any(|m| m.is_invalidated)).await;
        let list = fx.list.borrow().clone();
        assert!(list[0].attachment.as_ref().unwrap().bytes.is_none());
        assert!(fx
            .file_store
            .ops
            .lock()
            .unwrap()
            .contains(&"delete:remote-1".to_string()));
    }

    #[tokio::test]
    async fn attachment_upload_precedes_send() {
        let mut fx = fixture().await;
        let att = FileAttachment::new(
            "doc.pdf".into(),
            FileType::Pdf,
            Some(Bytes::from_static(b"%PDF")),
        );
        let att_id = att.id;
        fx.orchestrator
            .send_message(None, Some(att))
            .await
            .unwrap();

        wait_until(|| {
            fx.chat_backend
                .ops()
                .contains(&format!("send:remote-{att_id}"))
        })
        .await;
        assert!(fx
            .file_store
            .ops
            .lock()
            .unwrap()
            .contains(&format!("upload:{att_id}")));
        wait_until(|| {
            fx.list
                .borrow()
                .first()
                .is_some_and(|m| m.status == ChatMessageStatus::Sent)
        })
        .await;
    }

    #[tokio::test]
    async fn fetch_attachment_downloads_and_caches_once() {
        let db = Database::open_in_memory().unwrap();
        let mut message = ChatMessage::from_remote(
            Uuid::new_v4(),
            "srv-a".into(),
            Identity::Local("partner".into()),
            None,
            Some(FileAttachment {
                id: Uuid::new_v4(),
                remote_id: Some("remote-9".into()),
                name: "pic.jpg".into(),
                file_type: FileType::Image,
                bytes: None,
            }),
            Utc::now(),
        );
        message.status = ChatMessageStatus::Sent;
        db.insert(&message).unwrap();
        let local_id = message.id;

        let mut fx = fixture_with_store(db).await;
        fx.orchestrator.fetch_attachment(local_id).await.unwrap();
        wait_until(|| {
            fx.list.borrow()[0]
                .attachment
                .as_ref()
                .is_some_and(|a| a.bytes.is_some())
        })
        .await;

        // A second fetch is a no-op: bytes are cached.
        fx.orchestrator.fetch_attachment(local_id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let downloads = fx
            .file_store
            .ops
            .lock()
            .unwrap()
            .iter()
            .filter(|op| op.starts_with("download"))
            .count();
        assert_eq!(downloads, 1);
    }
}
