//! The chat engine: owns the thread session with the cloud chat service.
//!
//! Like the call engine, a single tokio task serializes all mutation:
//! commands on one channel, live service callbacks on another, both drained
//! by the same loop. The engine never stores the message list itself; the
//! orchestrator owns that and applies engine events to its store.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use commkit_shared::{
    ChatMessage, ChatMessageStatus, CommError, Credentials, Identity, Result,
};

use crate::backend::{
    ChatBackend, ChatBackendEvent, ReadReceipt, RemoteFileRef, RemoteMessage, SendMessageRequest,
    ThreadId,
};

#[derive(Debug)]
enum Command {
    Initialize(Credentials),
    StartOrResumeThread {
        partner: Identity,
        partner_display_name: String,
    },
    FetchHistory,
    Send(ChatMessage),
    SendReadReceipt(String),
    Delete {
        chat_message_id: String,
        status: ChatMessageStatus,
    },
    Invalidate,
    Shutdown,
}

/// Events raised by the engine for the chat orchestrator.
#[derive(Debug)]
pub enum ChatEngineEvent {
    /// Session and thread are ready; history fetch follows.
    SetupFinished,
    /// One-shot setup failed; the engine does not retry.
    SetupFailed(CommError),
    /// Full history, merged across pages, ascending by creation time.
    HistoryLoaded(Vec<RemoteMessage>),
    /// History is in; the consumer should answer with a read receipt for
    /// the latest unread partner message, if any.
    ReadReceiptsWanted,
    /// The full remote receipt listing, for cascade reconciliation.
    ReceiptsReconciled(Vec<ReadReceipt>),
    /// A send completed; the optimistic local copy can advance to Sent.
    MessageSent {
        local_id: Uuid,
        chat_message_id: String,
    },
    /// A send failed. The local copy stays Pending.
    SendFailed {
        local_id: Uuid,
        error: CommError,
    },
    /// Remote delete confirmed.
    MessageDeleted(String),
    /// A delete was rejected before or by the service.
    DeleteFailed {
        chat_message_id: String,
        error: CommError,
    },
    /// Live message from the service (may be an echo of an own send).
    MessageReceived(RemoteMessage),
    /// Live read receipt from the partner.
    ReadReceiptReceived(ReadReceipt),
}

/// Clonable command-side handle to a spawned [`ChatEngine`].
#[derive(Clone)]
pub struct ChatEngineHandle {
    cmd_tx: mpsc::Sender<Command>,
}

impl ChatEngineHandle {
    async fn send_cmd(&self, cmd: Command) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| CommError::ChannelClosed)
    }

    /// Establish the chat session. One-shot: failure is reported once and
    /// not retried.
    pub async fn initialize(&self, credentials: Credentials) -> Result<()> {
        self.send_cmd(Command::Initialize(credentials)).await
    }

    /// Reuse the existing two-party thread with `partner` or create one,
    /// then load history.
    pub async fn start_or_resume_thread(
        &self,
        partner: Identity,
        partner_display_name: String,
    ) -> Result<()> {
        self.send_cmd(Command::StartOrResumeThread {
            partner,
            partner_display_name,
        })
        .await
    }

    pub async fn fetch_history(&self) -> Result<()> {
        self.send_cmd(Command::FetchHistory).await
    }

    /// Fire-and-forget send. The caller keeps the optimistic Pending copy;
    /// confirmation arrives as [`ChatEngineEvent::MessageSent`].
    pub async fn send(&self, message: ChatMessage) -> Result<()> {
        self.send_cmd(Command::Send(message)).await
    }

    pub async fn send_read_receipt(&self, chat_message_id: String) -> Result<()> {
        self.send_cmd(Command::SendReadReceipt(chat_message_id)).await
    }

    /// Delete for all participants. Rejected locally, with no remote call,
    /// when the partner has already read the message.
    pub async fn delete(
        &self,
        chat_message_id: String,
        status: ChatMessageStatus,
    ) -> Result<()> {
        self.send_cmd(Command::Delete {
            chat_message_id,
            status,
        })
        .await
    }

    /// Drop the thread session (e.g. when the conversation view goes away).
    pub async fn invalidate(&self) -> Result<()> {
        self.send_cmd(Command::Invalidate).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send_cmd(Command::Shutdown).await
    }
}

pub struct ChatEngine;

impl ChatEngine {
    /// Spawn the engine task. `backend_rx` carries the service's live
    /// callbacks.
    pub fn spawn(
        backend: Arc<dyn ChatBackend>,
        backend_rx: mpsc::Receiver<ChatBackendEvent>,
    ) -> (ChatEngineHandle, mpsc::Receiver<ChatEngineEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(64);

        let state = EngineState {
            backend,
            event_tx,
            credentials: None,
            connected: false,
            thread: None,
        };

        tokio::spawn(engine_loop(state, cmd_rx, backend_rx));

        (ChatEngineHandle { cmd_tx }, event_rx)
    }
}

async fn engine_loop(
    mut state: EngineState,
    mut cmd_rx: mpsc::Receiver<Command>,
    mut backend_rx: mpsc::Receiver<ChatBackendEvent>,
) {
    info!("chat engine started");
    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Shutdown) | None => break,
                Some(cmd) => state.handle_command(cmd).await,
            },
            Some(event) = backend_rx.recv() => state.handle_backend_event(event).await,
        }
    }
    info!("chat engine stopped");
}

struct EngineState {
    backend: Arc<dyn ChatBackend>,
    event_tx: mpsc::Sender<ChatEngineEvent>,
    credentials: Option<Credentials>,
    connected: bool,
    thread: Option<ThreadId>,
}

impl EngineState {
    async fn emit(&self, event: ChatEngineEvent) {
        if self.event_tx.send(event).await.is_err() {
            debug!("chat engine event receiver dropped");
        }
    }

    fn self_identity(&self) -> Option<Identity> {
        self.credentials
            .as_ref()
            .map(|c| Identity::Local(c.identifier.clone()))
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Initialize(credentials) => self.initialize(credentials).await,
            Command::StartOrResumeThread {
                partner,
                partner_display_name,
            } => {
                self.start_or_resume_thread(partner, partner_display_name)
                    .await
            }
            Command::FetchHistory => self.fetch_history().await,
            Command::Send(message) => self.send(message).await,
            Command::SendReadReceipt(chat_message_id) => {
                let Some(thread) = self.thread.clone() else {
                    warn!("read receipt without a thread, ignoring");
                    return;
                };
                if let Err(e) = self
                    .backend
                    .send_read_receipt(&thread, &chat_message_id)
                    .await
                {
                    warn!(error = %e, "read receipt send failed");
                }
            }
            Command::Delete {
                chat_message_id,
                status,
            } => self.delete(chat_message_id, status).await,
            Command::Invalidate => {
                info!("chat thread session invalidated");
                self.thread = None;
            }
            Command::Shutdown => unreachable!("handled by the loop"),
        }
    }

    async fn initialize(&mut self, credentials: Credentials) {
        if self.connected {
            debug!("chat session already established, ignoring initialize");
            return;
        }
        if let Err(e) = credentials.validate() {
            self.emit(ChatEngineEvent::SetupFailed(e)).await;
            return;
        }
        if credentials.endpoint.is_none() {
            warn!("chat initialize rejected: no service endpoint");
            self.emit(ChatEngineEvent::SetupFailed(CommError::CredentialsMissing))
                .await;
            return;
        }
        match self.backend.connect(&credentials).await {
            Ok(()) => {
                info!("chat session established");
                self.credentials = Some(credentials);
                self.connected = true;
            }
            Err(e) => {
                // One-shot: report once, never retry.
                error!(error = %e, "chat session creation failed");
                self.emit(ChatEngineEvent::SetupFailed(CommError::AgentInitFailed(
                    e.to_string(),
                )))
                .await;
            }
        }
    }

    /// Find the existing two-party thread by topic or create it, make sure
    /// the partner is a participant, then subscribe to live events.
    async fn start_or_resume_thread(&mut self, partner: Identity, partner_display_name: String) {
        if !self.connected {
            self.emit(ChatEngineEvent::SetupFailed(CommError::AgentInitFailed(
                "chat session not established".into(),
            )))
            .await;
            return;
        }
        let Some(self_identity) = self.self_identity() else {
            self.emit(ChatEngineEvent::SetupFailed(CommError::CredentialsMissing))
                .await;
            return;
        };
        let display_name = self
            .credentials
            .as_ref()
            .map(|c| c.display_name.clone())
            .unwrap_or_default();

        let thread = match self
            .resolve_thread(&partner_display_name, &self_identity, &display_name)
            .await
        {
            Ok(thread) => thread,
            Err(e) => {
                error!(error = %e, "thread setup failed");
                self.emit(ChatEngineEvent::SetupFailed(e)).await;
                return;
            }
        };

        if let Err(e) = self
            .ensure_participant(&thread, &partner, &partner_display_name)
            .await
        {
            error!(error = %e, "participant setup failed");
            self.emit(ChatEngineEvent::SetupFailed(e)).await;
            return;
        }

        if let Err(e) = self.backend.start_live_events().await {
            warn!(error = %e, "live chat events unavailable");
        }

        self.thread = Some(thread);
        self.emit(ChatEngineEvent::SetupFinished).await;
        self.fetch_history().await;
    }

    async fn resolve_thread(
        &self,
        topic: &str,
        self_identity: &Identity,
        display_name: &str,
    ) -> Result<ThreadId> {
        let threads = self.backend.list_threads().await?;
        if let Some(existing) = threads.into_iter().find(|t| t.topic == topic) {
            debug!(thread = %existing.id, "reusing existing thread");
            return Ok(existing.id);
        }
        let created = self
            .backend
            .create_thread(topic, self_identity, display_name)
            .await?;
        info!(thread = %created, "created chat thread");
        Ok(created)
    }

    /// Membership check before add keeps repeated thread setup idempotent.
    async fn ensure_participant(
        &self,
        thread: &ThreadId,
        partner: &Identity,
        display_name: &str,
    ) -> Result<()> {
        let participants = self.backend.list_participants(thread).await?;
        if participants.iter().any(|p| p.raw() == partner.raw()) {
            debug!(partner = %partner, "partner already in thread");
            return Ok(());
        }
        self.backend
            .add_participant(thread, partner, display_name)
            .await
    }

    async fn fetch_history(&self) {
        let Some(thread) = self.thread.clone() else {
            warn!("history fetch without a thread, ignoring");
            return;
        };
        let pages = match self.backend.list_messages(&thread).await {
            Ok(pages) => pages,
            Err(e) => {
                warn!(error = %e, "history fetch failed");
                return;
            }
        };
        let mut items: Vec<RemoteMessage> = pages.into_iter().flat_map(|p| p.messages).collect();
        items.sort_by_key(|m| m.created_at);
        debug!(count = items.len(), "thread history loaded");
        self.emit(ChatEngineEvent::HistoryLoaded(items)).await;

        // Let the consumer acknowledge the partner's latest message, then
        // fold the remote receipt listing back over our own messages.
        self.emit(ChatEngineEvent::ReadReceiptsWanted).await;
        match self.backend.list_read_receipts(&thread).await {
            Ok(receipts) => {
                self.emit(ChatEngineEvent::ReceiptsReconciled(receipts)).await;
            }
            Err(e) => warn!(error = %e, "read receipt listing failed"),
        }
    }

    async fn send(&self, message: ChatMessage) {
        let Some(thread) = self.thread.clone() else {
            self.emit(ChatEngineEvent::SendFailed {
                local_id: message.id,
                error: CommError::SendFailed("no active thread".into()),
            })
            .await;
            return;
        };
        let display_name = self
            .credentials
            .as_ref()
            .map(|c| c.display_name.clone())
            .unwrap_or_default();
        let request = SendMessageRequest {
            app_message_id: message.id,
            sender_display_name: display_name,
            body: message.body.clone(),
            file: message.attachment.as_ref().map(|a| RemoteFileRef {
                // The file-store id once uploaded; the local id otherwise.
                id: a.remote_id.clone().unwrap_or_else(|| a.id.to_string()),
                name: a.name.clone(),
                file_type: a.file_type,
            }),
        };
        match self.backend.send_message(&thread, request).await {
            Ok(chat_message_id) => {
                debug!(local_id = %message.id, %chat_message_id, "message sent");
                self.emit(ChatEngineEvent::MessageSent {
                    local_id: message.id,
                    chat_message_id,
                })
                .await;
            }
            Err(e) => {
                // The optimistic copy stays Pending; no automatic retry.
                warn!(local_id = %message.id, error = %e, "message send failed");
                self.emit(ChatEngineEvent::SendFailed {
                    local_id: message.id,
                    error: CommError::SendFailed(e.to_string()),
                })
                .await;
            }
        }
    }

    async fn delete(&self, chat_message_id: String, status: ChatMessageStatus) {
        // Once the partner has read a message, deleting it for everyone is
        // rejected locally; the service is never asked.
        if status == ChatMessageStatus::Read {
            self.emit(ChatEngineEvent::DeleteFailed {
                chat_message_id,
                error: CommError::DeleteRejected,
            })
            .await;
            return;
        }
        let Some(thread) = self.thread.clone() else {
            self.emit(ChatEngineEvent::DeleteFailed {
                chat_message_id,
                error: CommError::ActionRejected("no active thread".into()),
            })
            .await;
            return;
        };
        match self.backend.delete_message(&thread, &chat_message_id).await {
            Ok(()) => {
                info!(%chat_message_id, "message deleted for all");
                self.emit(ChatEngineEvent::MessageDeleted(chat_message_id)).await;
            }
            Err(e) => {
                warn!(%chat_message_id, error = %e, "remote delete failed");
                self.emit(ChatEngineEvent::DeleteFailed {
                    chat_message_id,
                    error: e,
                })
                .await;
            }
        }
    }

    async fn handle_backend_event(&mut self, event: ChatBackendEvent) {
        match event {
            ChatBackendEvent::MessageReceived(message) => {
                debug!(chat_message_id = %message.chat_message_id, "live message received");
                self.emit(ChatEngineEvent::MessageReceived(message)).await;
            }
            ChatBackendEvent::ReadReceiptReceived(receipt) => {
                debug!(chat_message_id = %receipt.chat_message_id, "live read receipt");
                self.emit(ChatEngineEvent::ReadReceiptReceived(receipt)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{RemoteMessagePage, ThreadInfo};
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct TestBackend {
        ops: Mutex<Vec<String>>,
        threads: Mutex<Vec<ThreadInfo>>,
        participants: Mutex<Vec<Identity>>,
        pages: Mutex<Vec<RemoteMessagePage>>,
        fail_send: AtomicBool,
    }

    impl TestBackend {
        fn ops(&self) -> Vec<String> {
            self.ops.lock().unwrap().clone()
        }
        fn record(&self, op: &str) {
            self.ops.lock().unwrap().push(op.to_string());
        }
    }

    #[async_trait]
    impl ChatBackend for TestBackend {
        async fn connect(&self, _credentials: &Credentials) -> Result<()> {
            self.record("connect");
            Ok(())
        }
        async fn start_live_events(&self) -> Result<()> {
            self.record("start_live_events");
            Ok(())
        }
        async fn list_threads(&self) -> Result<Vec<ThreadInfo>> {
            self.record("list_threads");
            Ok(self.threads.lock().unwrap().clone())
        }
        async fn create_thread(
            &self,
            topic: &str,
            _self_identity: &Identity,
            _display_name: &str,
        ) -> Result<ThreadId> {
            self.record("create_thread");
            let id = ThreadId(format!("thread-{topic}"));
            self.threads.lock().unwrap().push(ThreadInfo {
                id: id.clone(),
                topic: topic.to_string(),
            });
            Ok(id)
        }
        async fn list_participants(&self, _thread: &ThreadId) -> Result<Vec<Identity>> {
            self.record("list_participants");
            Ok(self.participants.lock().unwrap().clone())
        }
        async fn add_participant(
            &self,
            _thread: &ThreadId,
            participant: &Identity,
            _display_name: &str,
        ) -> Result<()> {
            self.record("add_participant");
            self.participants.lock().unwrap().push(participant.clone());
            Ok(())
        }
        async fn list_messages(&self, _thread: &ThreadId) -> Result<Vec<RemoteMessagePage>> {
            self.record("list_messages");
            Ok(self.pages.lock().unwrap().clone())
        }
        async fn send_message(
            &self,
            _thread: &ThreadId,
            _request: SendMessageRequest,
        ) -> Result<String> {
            self.record("send_message");
            if self.fail_send.load(Ordering::SeqCst) {
                return Err(CommError::Backend("send rejected".into()));
            }
            Ok("srv-1".into())
        }
        async fn send_read_receipt(
            &self,
            _thread: &ThreadId,
            _chat_message_id: &str,
        ) -> Result<()> {
            self.record("send_read_receipt");
            Ok(())
        }
        async fn list_read_receipts(&self, _thread: &ThreadId) -> Result<Vec<ReadReceipt>> {
            self.record("list_read_receipts");
            Ok(Vec::new())
        }
        async fn delete_message(
            &self,
            _thread: &ThreadId,
            _chat_message_id: &str,
        ) -> Result<()> {
            self.record("delete_message");
            Ok(())
        }
    }

    fn credentials() -> Credentials {
        Credentials {
            identifier: "me".into(),
            token: "token".into(),
            display_name: "Me".into(),
            endpoint: Some("https://chat.example".into()),
        }
    }

    fn partner() -> Identity {
        Identity::Local("partner".into())
    }

    struct Fixture {
        backend: Arc<TestBackend>,
        backend_tx: mpsc::Sender<ChatBackendEvent>,
        engine: ChatEngineHandle,
        events: mpsc::Receiver<ChatEngineEvent>,
    }

    fn fixture() -> Fixture {
        let backend = Arc::new(TestBackend::default());
        let (backend_tx, backend_rx) = mpsc::channel(16);
        let (engine, events) = ChatEngine::spawn(backend.clone(), backend_rx);
        Fixture {
            backend,
            backend_tx,
            engine,
            events,
        }
    }

    async fn next_event(rx: &mut mpsc::Receiver<ChatEngineEvent>) -> ChatEngineEvent {
        tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for chat engine event")
            .expect("chat engine event channel closed")
    }

    async fn setup_thread(fx: &mut Fixture) {
        fx.engine.initialize(credentials()).await.unwrap();
        fx.engine
            .start_or_resume_thread(partner(), "Partner".into())
            .await
            .unwrap();
        assert!(matches!(
            next_event(&mut fx.events).await,
            ChatEngineEvent::SetupFinished
        ));
        assert!(matches!(
            next_event(&mut fx.events).await,
            ChatEngineEvent::HistoryLoaded(_)
        ));
        assert!(matches!(
            next_event(&mut fx.events).await,
            ChatEngineEvent::ReadReceiptsWanted
        ));
        assert!(matches!(
            next_event(&mut fx.events).await,
            ChatEngineEvent::ReceiptsReconciled(_)
        ));
    }

    #[tokio::test]
    async fn thread_setup_creates_thread_and_adds_partner() {
        let mut fx = fixture();
        setup_thread(&mut fx).await;

        let ops = fx.backend.ops();
        assert!(ops.contains(&"create_thread".to_string()));
        assert!(ops.contains(&"add_participant".to_string()));
        assert!(ops.contains(&"start_live_events".to_string()));
    }

    #[tokio::test]
    async fn thread_setup_is_idempotent() {
        let mut fx = fixture();
        setup_thread(&mut fx).await;

        fx.engine
            .start_or_resume_thread(partner(), "Partner".into())
            .await
            .unwrap();
        assert!(matches!(
            next_event(&mut fx.events).await,
            ChatEngineEvent::SetupFinished
        ));

        let ops = fx.backend.ops();
        // Second setup reuses the thread and skips the participant add.
        assert_eq!(ops.iter().filter(|op| *op == "create_thread").count(), 1);
        assert_eq!(ops.iter().filter(|op| *op == "add_participant").count(), 1);
    }

    #[tokio::test]
    async fn initialize_without_endpoint_fails_setup() {
        let mut fx = fixture();
        let mut creds = credentials();
        creds.endpoint = None;
        fx.engine.initialize(creds).await.unwrap();
        assert!(matches!(
            next_event(&mut fx.events).await,
            ChatEngineEvent::SetupFailed(CommError::CredentialsMissing)
        ));
        assert!(fx.backend.ops().is_empty());
    }

    #[tokio::test]
    async fn history_pages_merge_sorted_by_creation_time() {
        let mut fx = fixture();
        let now = Utc::now();
        let msg = |id: &str, minutes_ago: i64| RemoteMessage {
            app_message_id: None,
            chat_message_id: id.to_string(),
            sender: partner(),
            body: Some(id.to_string()),
            created_at: now - Duration::minutes(minutes_ago),
            file: None,
        };
        // Pages arrive out of order.
        *fx.backend.pages.lock().unwrap() = vec![
            RemoteMessagePage {
                messages: vec![msg("new", 1), msg("mid", 5)],
            },
            RemoteMessagePage {
                messages: vec![msg("old", 10)],
            },
        ];

        fx.engine.initialize(credentials()).await.unwrap();
        fx.engine
            .start_or_resume_thread(partner(), "Partner".into())
            .await
            .unwrap();
        assert!(matches!(
            next_event(&mut fx.events).await,
            ChatEngineEvent::SetupFinished
        ));
        match next_event(&mut fx.events).await {
            ChatEngineEvent::HistoryLoaded(items) => {
                let ids: Vec<_> = items.iter().map(|m| m.chat_message_id.as_str()).collect();
                assert_eq!(ids, vec!["old", "mid", "new"]);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn send_confirmation_carries_server_id() {
        let mut fx = fixture();
        setup_thread(&mut fx).await;

        let message =
            ChatMessage::outgoing(Identity::Local("me".into()), Some("hi".into()), None);
        let local_id = message.id;
        fx.engine.send(message).await.unwrap();

        match next_event(&mut fx.events).await {
            ChatEngineEvent::MessageSent {
                local_id: id,
                chat_message_id,
            } => {
                assert_eq!(id, local_id);
                assert_eq!(chat_message_id, "srv-1");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_send_reports_and_does_not_retry() {
        let mut fx = fixture();
        setup_thread(&mut fx).await;
        fx.backend.fail_send.store(true, Ordering::SeqCst);

        let message =
            ChatMessage::outgoing(Identity::Local("me".into()), Some("hi".into()), None);
        fx.engine.send(message).await.unwrap();

        assert!(matches!(
            next_event(&mut fx.events).await,
            ChatEngineEvent::SendFailed { .. }
        ));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let sends = fx
            .backend
            .ops()
            .into_iter()
            .filter(|op| op == "send_message")
            .count();
        assert_eq!(sends, 1);
    }

    #[tokio::test]
    async fn delete_of_read_message_never_reaches_the_service() {
        let mut fx = fixture();
        setup_thread(&mut fx).await;

        fx.engine
            .delete("srv-1".into(), ChatMessageStatus::Read)
            .await
            .unwrap();

        match next_event(&mut fx.events).await {
            ChatEngineEvent::DeleteFailed { error, .. } => {
                assert!(matches!(error, CommError::DeleteRejected));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(!fx.backend.ops().contains(&"delete_message".to_string()));
    }

    #[tokio::test]
    async fn delete_of_sent_message_confirms_once() {
        let mut fx = fixture();
        setup_thread(&mut fx).await;

        fx.engine
            .delete("srv-1".into(), ChatMessageStatus::Sent)
            .await
            .unwrap();

        assert!(matches!(
            next_event(&mut fx.events).await,
            ChatEngineEvent::MessageDeleted(id) if id == "srv-1"
        ));
        let deletes = fx
            .backend
            .ops()
            .into_iter()
            .filter(|op| op == "delete_message")
            .count();
        assert_eq!(deletes, 1);
    }

    #[tokio::test]
    async fn live_events_are_forwarded() {
        let mut fx = fixture();
        setup_thread(&mut fx).await;

        fx.backend_tx
            .send(ChatBackendEvent::ReadReceiptReceived(ReadReceipt {
                chat_message_id: "srv-9".into(),
            }))
            .await
            .unwrap();

        assert!(matches!(
            next_event(&mut fx.events).await,
            ChatEngineEvent::ReadReceiptReceived(r) if r.chat_message_id == "srv-9"
        ));
    }
}
