//! # commkit-client
//!
//! Composition root for the commkit call/chat orchestration stack.
//!
//! The hosting application injects the platform collaborators (cloud
//! calling/chat backends, telephony bridge, permission prompts, push
//! pathway, file store, local store); [`CommClient`] wires them to the
//! engines and orchestrators. There are no global singletons: everything
//! is owned by the client instance.

pub mod call_orchestrator;
pub mod chat_orchestrator;
pub mod push;
pub mod telephony;

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing_subscriber::{fmt, EnvFilter};

use commkit_calling::{
    BackendEvent, CallEngine, CallEngineConfig, CallEngineHandle, CallingBackend, DeviceManager,
};
use commkit_chat::{ChatBackend, ChatBackendEvent, ChatEngine, ChatEngineHandle, RemoteFileStore};
use commkit_shared::{ChatMessage, Credentials, Identity, Result};
use commkit_store::MessageStore;

pub use call_orchestrator::{CallOrchestrator, CallOrchestratorHandle, CallUiState};
pub use chat_orchestrator::{ChatOrchestrator, ChatOrchestratorHandle};
pub use push::PushEvent;
pub use telephony::{
    CallEndReason, PermissionStatus, Permissions, TelephonyAction, TelephonyBridge,
};

/// Install the global tracing subscriber. Call once at startup.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("commkit_client=debug,commkit_calling=debug,commkit_chat=debug,commkit_store=info,warn")
    });

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

/// Platform collaborators injected by the hosting application.
pub struct CommClientDeps {
    pub calling_backend: Arc<dyn CallingBackend>,
    pub devices: Arc<dyn DeviceManager>,
    /// Cloud calling service callbacks.
    pub calling_events: mpsc::Receiver<BackendEvent>,
    pub chat_backend: Arc<dyn ChatBackend>,
    /// Cloud chat service callbacks.
    pub chat_events: mpsc::Receiver<ChatBackendEvent>,
    pub telephony: Arc<dyn TelephonyBridge>,
    pub permissions: Arc<dyn Permissions>,
    /// Intents from the native call screen.
    pub telephony_actions: mpsc::Receiver<TelephonyAction>,
    /// Token updates and wake payloads from the push registry.
    pub push_events: mpsc::Receiver<PushEvent>,
    pub store: Box<dyn MessageStore>,
    pub files: Arc<dyn RemoteFileStore>,
}

/// The assembled client: engine and orchestrator handles plus the
/// published UI state channels.
pub struct CommClient {
    credentials: Credentials,
    pub calls: CallOrchestratorHandle,
    pub chat: ChatOrchestratorHandle,
    call_engine: CallEngineHandle,
    chat_engine: ChatEngineHandle,
    call_ui: watch::Receiver<CallUiState>,
    chat_messages: watch::Receiver<Vec<ChatMessage>>,
}

impl CommClient {
    /// Wire engines and orchestrators from the injected collaborators.
    /// Nothing talks to the cloud until [`CommClient::initialize`].
    pub fn new(credentials: Credentials, deps: CommClientDeps, call_config: CallEngineConfig) -> Self {
        let (call_engine, call_engine_events) = CallEngine::spawn(
            deps.calling_backend,
            deps.devices,
            deps.calling_events,
            call_config,
        );
        let (calls, call_ui) = CallOrchestrator::spawn(
            call_engine.clone(),
            call_engine_events,
            deps.telephony,
            deps.permissions,
            deps.telephony_actions,
            deps.push_events,
        );

        let (chat_engine, chat_engine_events) =
            ChatEngine::spawn(deps.chat_backend, deps.chat_events);
        let local = Identity::Local(credentials.identifier.clone());
        let (chat, chat_messages) = ChatOrchestrator::spawn(
            deps.store,
            deps.files,
            chat_engine.clone(),
            chat_engine_events,
            local,
        );

        Self {
            credentials,
            calls,
            chat,
            call_engine,
            chat_engine,
            call_ui,
            chat_messages,
        }
    }

    /// Establish both cloud sessions.
    pub async fn initialize(&self) -> Result<()> {
        self.call_engine.initialize(self.credentials.clone()).await?;
        self.chat_engine.initialize(self.credentials.clone()).await
    }

    /// Open (or resume) the two-party chat thread with `partner`.
    pub async fn open_conversation(
        &self,
        partner: Identity,
        partner_display_name: String,
    ) -> Result<()> {
        self.chat_engine
            .start_or_resume_thread(partner, partner_display_name)
            .await
    }

    /// Published call-side UI state.
    pub fn call_ui(&self) -> watch::Receiver<CallUiState> {
        self.call_ui.clone()
    }

    /// Published ordered, deduplicated message list.
    pub fn chat_messages(&self) -> watch::Receiver<Vec<ChatMessage>> {
        self.chat_messages.clone()
    }

    /// Direct engine access for hosts that need the lower-level surface.
    pub fn call_engine(&self) -> &CallEngineHandle {
        &self.call_engine
    }

    pub fn chat_engine(&self) -> &ChatEngineHandle {
        &self.chat_engine
    }

    /// Stop every task. In-flight commands are drained first.
    pub async fn shutdown(&self) {
        let _ = self.calls.shutdown().await;
        let _ = self.chat.shutdown().await;
        let _ = self.call_engine.shutdown().await;
        let _ = self.chat_engine.shutdown().await;
    }
}
