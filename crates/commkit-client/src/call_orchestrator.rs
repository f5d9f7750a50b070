//! The call orchestrator: the only component talking to both the native
//! telephony bridge and the call engine.
//!
//! One task consumes three inputs (bridge intents, push events, engine
//! events) plus its own command channel. Every visibility transition in the
//! published [`CallUiState`] derives from exactly one authoritative engine
//! event; bridge callbacks only originate intents.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use commkit_calling::{CallEngineEvent, CallEngineHandle, ViewHandle};
use commkit_shared::{wake, CallHandle, CommError, Identity, Result};

use crate::push::PushEvent;
use crate::telephony::{
    negotiate_media, CallEndReason, PermissionStatus, Permissions, TelephonyAction,
    TelephonyBridge,
};

/// Call-side state published to the UI over a watch channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallUiState {
    /// Outgoing calls are allowed (wake registration completed).
    pub call_enabled: bool,
    /// The in-call view should be visible.
    pub present_call_view: bool,
    pub is_muted: bool,
    pub local_video_on: bool,
    pub remote_video_view: Option<ViewHandle>,
    /// Name of the peer for the in-call view.
    pub display_name: Option<String>,
}

#[derive(Debug)]
enum Command {
    StartCall(Identity),
    EndCall,
    ToggleMute,
    StartVideo,
    StopVideo,
    Shutdown,
}

/// Clonable command-side handle to a spawned [`CallOrchestrator`].
#[derive(Clone)]
pub struct CallOrchestratorHandle {
    cmd_tx: mpsc::Sender<Command>,
}

impl CallOrchestratorHandle {
    async fn send(&self, cmd: Command) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| CommError::ChannelClosed)
    }

    /// Place an outgoing call after negotiating media permissions. A
    /// microphone denial aborts the attempt; there is no retry loop.
    pub async fn start_call(&self, callee: Identity) -> Result<()> {
        self.send(Command::StartCall(callee)).await
    }

    pub async fn end_call(&self) -> Result<()> {
        self.send(Command::EndCall).await
    }

    pub async fn toggle_mute(&self) -> Result<()> {
        self.send(Command::ToggleMute).await
    }

    pub async fn start_video(&self) -> Result<()> {
        self.send(Command::StartVideo).await
    }

    pub async fn stop_video(&self) -> Result<()> {
        self.send(Command::StopVideo).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown).await
    }
}

/// One call as the orchestrator tracks it for bridge reporting. The flags
/// guarantee exactly one connecting / connected / ended report per handle.
#[derive(Debug)]
struct TrackedCall {
    handle: CallHandle,
    outgoing: bool,
    reported_connecting: bool,
    reported_connected: bool,
}

pub struct CallOrchestrator;

impl CallOrchestrator {
    /// Spawn the orchestrator task.
    pub fn spawn(
        engine: CallEngineHandle,
        engine_events: mpsc::Receiver<CallEngineEvent>,
        bridge: Arc<dyn TelephonyBridge>,
        permissions: Arc<dyn Permissions>,
        telephony_rx: mpsc::Receiver<TelephonyAction>,
        push_rx: mpsc::Receiver<PushEvent>,
    ) -> (CallOrchestratorHandle, watch::Receiver<CallUiState>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (ui_tx, ui_rx) = watch::channel(CallUiState::default());

        let state = OrchestratorState {
            engine,
            bridge,
            permissions,
            ui: CallUiState::default(),
            ui_tx,
            current: None,
            pending_display_name: None,
            reported_incoming: HashSet::new(),
            local_end_requested: false,
        };

        tokio::spawn(orchestrator_loop(
            state,
            cmd_rx,
            engine_events,
            telephony_rx,
            push_rx,
        ));

        (CallOrchestratorHandle { cmd_tx }, ui_rx)
    }
}

async fn orchestrator_loop(
    mut state: OrchestratorState,
    mut cmd_rx: mpsc::Receiver<Command>,
    mut engine_rx: mpsc::Receiver<CallEngineEvent>,
    mut telephony_rx: mpsc::Receiver<TelephonyAction>,
    mut push_rx: mpsc::Receiver<PushEvent>,
) {
    info!("call orchestrator started");
    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Shutdown) | None => break,
                Some(cmd) => state.handle_command(cmd).await,
            },
            Some(event) = engine_rx.recv() => state.handle_engine_event(event).await,
            Some(action) = telephony_rx.recv() => state.handle_telephony_action(action).await,
            Some(event) = push_rx.recv() => state.handle_push_event(event).await,
        }
    }
    info!("call orchestrator stopped");
}

struct OrchestratorState {
    engine: CallEngineHandle,
    bridge: Arc<dyn TelephonyBridge>,
    permissions: Arc<dyn Permissions>,
    ui: CallUiState,
    ui_tx: watch::Sender<CallUiState>,
    current: Option<TrackedCall>,
    /// Peer name stashed at call initiation, applied on `CallStarted`.
    pending_display_name: Option<String>,
    /// Handles already reported to the native call screen, so the engine's
    /// own incoming-call event does not report twice.
    reported_incoming: HashSet<CallHandle>,
    local_end_requested: bool,
}

impl OrchestratorState {
    fn publish(&self) {
        self.ui_tx.send_replace(self.ui.clone());
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::StartCall(callee) => {
                if negotiate_media(self.permissions.as_ref()).await == PermissionStatus::Denied {
                    return;
                }
                self.pending_display_name = callee.raw().map(str::to_string);
                if let Err(e) = self.engine.start_call(callee).await {
                    error!(error = %e, "start call command lost");
                }
            }
            Command::EndCall => {
                self.local_end_requested = true;
                if let Err(e) = self.engine.end_call().await {
                    error!(error = %e, "end call command lost");
                }
            }
            Command::ToggleMute => {
                if let Some(call) = &self.current {
                    let _ = self.engine.toggle_mute(call.handle).await;
                } else {
                    warn!("mute toggle without a tracked call");
                }
            }
            Command::StartVideo => {
                let _ = self.engine.start_video().await;
            }
            Command::StopVideo => {
                let _ = self.engine.stop_video().await;
            }
            Command::Shutdown => unreachable!("handled by the loop"),
        }
    }

    async fn handle_telephony_action(&mut self, action: TelephonyAction) {
        match action {
            TelephonyAction::AcceptRequested(handle) => {
                if negotiate_media(self.permissions.as_ref()).await == PermissionStatus::Denied {
                    // The call cannot proceed without a microphone.
                    let _ = self
                        .bridge
                        .report_call_ended(handle, CallEndReason::Failed)
                        .await;
                    self.reported_incoming.remove(&handle);
                    return;
                }
                if let Err(e) = self.engine.accept_incoming_call(handle).await {
                    error!(%handle, error = %e, "accept command lost");
                }
            }
            TelephonyAction::EndRequested(handle) => {
                self.local_end_requested = true;
                if let Err(e) = self.engine.end_call_for(handle).await {
                    error!(%handle, error = %e, "end command lost");
                }
            }
            TelephonyAction::MuteRequested(handle) => {
                let _ = self.engine.toggle_mute(handle).await;
            }
        }
    }

    async fn handle_push_event(&mut self, event: PushEvent) {
        match event {
            PushEvent::TokenUpdated(token) => {
                if let Err(e) = self.engine.register_wake(token).await {
                    error!(error = %e, "wake token registration command lost");
                }
            }
            PushEvent::WakePayload(payload) => {
                let descriptor = match wake::parse_wake_payload(&payload) {
                    Ok(descriptor) => descriptor,
                    Err(e) => {
                        error!(error = %e, "discarding malformed wake payload");
                        return;
                    }
                };
                let handle = CallHandle(descriptor.call_id);

                // Report to the OS first; the reporting window is bounded
                // and must not wait on the cloud session.
                if let Err(e) = self
                    .bridge
                    .report_incoming_call(handle, &descriptor.caller_display_name, descriptor.has_video)
                    .await
                {
                    error!(%handle, error = %e, "native incoming-call report failed");
                }
                self.reported_incoming.insert(handle);
                self.pending_display_name = Some(descriptor.caller_display_name.clone());

                if let Err(e) = self.engine.handle_wake(descriptor).await {
                    error!(%handle, error = %e, "wake forward lost");
                }
            }
        }
    }

    async fn handle_engine_event(&mut self, event: CallEngineEvent) {
        match event {
            CallEngineEvent::IncomingCall { handle, descriptor } => {
                if self.reported_incoming.insert(handle) {
                    // Not seen via push: the service resolved it first.
                    if let Err(e) = self
                        .bridge
                        .report_incoming_call(
                            handle,
                            &descriptor.caller_display_name,
                            descriptor.has_video,
                        )
                        .await
                    {
                        error!(%handle, error = %e, "native incoming-call report failed");
                    }
                }
                self.pending_display_name = Some(descriptor.caller_display_name);
            }
            CallEngineEvent::CallStarted(handle) => self.call_started(handle).await,
            CallEngineEvent::CallEnded(handle) => self.call_ended(handle).await,
            CallEngineEvent::MuteChanged { muted, .. } => {
                self.ui.is_muted = muted;
                self.publish();
            }
            CallEngineEvent::VideoChanged { enabled } => {
                self.ui.local_video_on = enabled;
                self.publish();
            }
            CallEngineEvent::RemoteParticipantChanged(view) => {
                self.ui.remote_video_view = view;
                self.publish();
            }
            CallEngineEvent::WakeRegistered => {
                self.ui.call_enabled = true;
                self.publish();
            }
            CallEngineEvent::AcceptFailed { handle, error } => {
                warn!(%handle, error = %error, "incoming call accept failed");
                let _ = self
                    .bridge
                    .report_call_ended(handle, CallEndReason::Failed)
                    .await;
                self.reported_incoming.remove(&handle);
            }
            CallEngineEvent::InitFailed(error) | CallEngineEvent::CallFailed(error) => {
                error!(error = %error, "call engine failure");
            }
        }
    }

    async fn call_started(&mut self, handle: CallHandle) {
        match &self.current {
            Some(call) if call.handle != handle => {
                warn!(%handle, "started event for untracked call");
                return;
            }
            Some(_) => {}
            None => {
                self.current = Some(TrackedCall {
                    handle,
                    outgoing: !self.reported_incoming.contains(&handle),
                    reported_connecting: false,
                    reported_connected: false,
                });
            }
        }

        let mut report_connecting = false;
        let mut report_connected = false;
        if let Some(call) = self.current.as_mut() {
            if call.outgoing && !call.reported_connecting {
                call.reported_connecting = true;
                report_connecting = true;
            }
            if call.outgoing && !call.reported_connected {
                call.reported_connected = true;
                report_connected = true;
            }
        }
        if report_connecting {
            if let Err(e) = self.bridge.report_outgoing_connecting(handle).await {
                warn!(%handle, error = %e, "connecting report failed");
            }
        }
        if report_connected {
            if let Err(e) = self.bridge.report_outgoing_connected(handle).await {
                warn!(%handle, error = %e, "connected report failed");
            }
        }

        self.ui.present_call_view = true;
        if let Some(name) = self.pending_display_name.take() {
            self.ui.display_name = Some(name);
        }
        self.publish();
        debug!(%handle, "call view presented");
    }

    async fn call_ended(&mut self, handle: CallHandle) {
        let connected = match self.current.take() {
            Some(call) if call.handle == handle => true,
            Some(other) => {
                // Different call still tracked: this ended handle was a
                // push-reported call that went away before being answered.
                self.current = Some(other);
                self.reported_incoming.remove(&handle);
                let _ = self
                    .bridge
                    .report_call_ended(handle, CallEndReason::Unanswered)
                    .await;
                return;
            }
            None => false,
        };

        let reason = if self.local_end_requested {
            CallEndReason::LocalEnded
        } else if connected {
            CallEndReason::RemoteEnded
        } else {
            CallEndReason::Unanswered
        };
        if let Err(e) = self.bridge.report_call_ended(handle, reason).await {
            warn!(%handle, error = %e, "ended report failed");
        }
        self.reported_incoming.remove(&handle);
        self.local_end_requested = false;

        self.ui.present_call_view = false;
        self.ui.is_muted = false;
        self.ui.local_video_on = false;
        self.ui.remote_video_view = None;
        self.ui.display_name = None;
        self.publish();
        info!(%handle, reason = ?reason, "call view dismissed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use commkit_calling::{
        BackendEvent, CallEngine, CallEngineConfig, CallingBackend, DeviceManager,
        StreamDirection, VideoRenderer, VideoStreamHandle,
    };
    use commkit_shared::{CallState, Credentials, IncomingCallDescriptor};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use uuid::Uuid;

    #[derive(Debug)]
    struct NullRenderer(ViewHandle);

    impl VideoRenderer for NullRenderer {
        fn view(&self) -> ViewHandle {
            self.0
        }
        fn dispose(&mut self) {}
    }

    #[derive(Default)]
    struct TestCallingBackend {
        ops: Mutex<Vec<String>>,
        next_handle: Mutex<Option<CallHandle>>,
    }

    impl TestCallingBackend {
        fn ops(&self) -> Vec<String> {
            self.ops.lock().unwrap().clone()
        }
        fn record(&self, op: &str) {
            self.ops.lock().unwrap().push(op.to_string());
        }
    }

    #[async_trait]
    impl CallingBackend for TestCallingBackend {
        async fn create_agent(&self, _credentials: &Credentials) -> Result<()> {
            self.record("create_agent");
            Ok(())
        }
        async fn register_wake_token(&self, _token: Bytes) -> Result<()> {
            self.record("register_wake_token");
            Ok(())
        }
        async fn handle_wake(&self, _descriptor: &IncomingCallDescriptor) -> Result<()> {
            self.record("handle_wake");
            Ok(())
        }
        async fn place_call(
            &self,
            _callee: &Identity,
            _video: Option<&VideoStreamHandle>,
        ) -> Result<CallHandle> {
            self.record("place_call");
            Ok(self
                .next_handle
                .lock()
                .unwrap()
                .unwrap_or_else(CallHandle::new))
        }
        async fn accept_call(
            &self,
            _handle: CallHandle,
            _video: Option<&VideoStreamHandle>,
        ) -> Result<()> {
            self.record("accept_call");
            Ok(())
        }
        async fn hang_up(&self, _handle: CallHandle) -> Result<()> {
            self.record("hang_up");
            Ok(())
        }
        async fn set_muted(&self, _handle: CallHandle, _muted: bool) -> Result<()> {
            self.record("set_muted");
            Ok(())
        }
        async fn start_video(
            &self,
            _handle: CallHandle,
            _stream: &VideoStreamHandle,
        ) -> Result<()> {
            self.record("start_video");
            Ok(())
        }
        async fn stop_video(
            &self,
            _handle: CallHandle,
            _stream: &VideoStreamHandle,
        ) -> Result<()> {
            self.record("stop_video");
            Ok(())
        }
    }

    struct TestDevices;

    #[async_trait]
    impl DeviceManager for TestDevices {
        async fn acquire_camera(&self) -> Result<VideoStreamHandle> {
            Ok(VideoStreamHandle::new(
                StreamDirection::Local,
                Box::new(NullRenderer(ViewHandle(Uuid::new_v4()))),
            ))
        }
    }

    #[derive(Default)]
    struct TestBridge {
        ops: Mutex<Vec<String>>,
    }

    impl TestBridge {
        fn ops(&self) -> Vec<String> {
            self.ops.lock().unwrap().clone()
        }
        fn record(&self, op: String) {
            self.ops.lock().unwrap().push(op);
        }
    }

    #[async_trait]
    impl TelephonyBridge for TestBridge {
        async fn report_incoming_call(
            &self,
            _handle: CallHandle,
            caller_name: &str,
            _has_video: bool,
        ) -> Result<()> {
            self.record(format!("incoming:{caller_name}"));
            Ok(())
        }
        async fn report_outgoing_connecting(&self, _handle: CallHandle) -> Result<()> {
            self.record("connecting".into());
            Ok(())
        }
        async fn report_outgoing_connected(&self, _handle: CallHandle) -> Result<()> {
            self.record("connected".into());
            Ok(())
        }
        async fn report_call_ended(
            &self,
            _handle: CallHandle,
            reason: CallEndReason,
        ) -> Result<()> {
            self.record(format!("ended:{reason:?}"));
            Ok(())
        }
    }

    struct TestPermissions {
        audio_denied: AtomicBool,
        video_denied: AtomicBool,
        prompts: Mutex<Vec<String>>,
    }

    impl Default for TestPermissions {
        fn default() -> Self {
            Self {
                audio_denied: AtomicBool::new(false),
                video_denied: AtomicBool::new(false),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Permissions for TestPermissions {
        async fn request_audio(&self) -> PermissionStatus {
            self.prompts.lock().unwrap().push("audio".into());
            if self.audio_denied.load(Ordering::SeqCst) {
                PermissionStatus::Denied
            } else {
                PermissionStatus::Granted
            }
        }
        async fn request_video(&self) -> PermissionStatus {
            self.prompts.lock().unwrap().push("video".into());
            if self.video_denied.load(Ordering::SeqCst) {
                PermissionStatus::Denied
            } else {
                PermissionStatus::Granted
            }
        }
    }

    struct Fixture {
        backend: Arc<TestCallingBackend>,
        bridge: Arc<TestBridge>,
        permissions: Arc<TestPermissions>,
        backend_tx: mpsc::Sender<BackendEvent>,
        telephony_tx: mpsc::Sender<TelephonyAction>,
        push_tx: mpsc::Sender<PushEvent>,
        orchestrator: CallOrchestratorHandle,
        engine: CallEngineHandle,
        ui: watch::Receiver<CallUiState>,
    }

    async fn fixture() -> Fixture {
        let backend = Arc::new(TestCallingBackend::default());
        let bridge = Arc::new(TestBridge::default());
        let permissions = Arc::new(TestPermissions::default());
        let (backend_tx, backend_rx) = mpsc::channel(16);
        let (telephony_tx, telephony_rx) = mpsc::channel(16);
        let (push_tx, push_rx) = mpsc::channel(16);

        let config = CallEngineConfig {
            accept_retry_delay: Duration::from_millis(100),
        };
        let (engine, engine_events) =
            CallEngine::spawn(backend.clone(), Arc::new(TestDevices), backend_rx, config);
        engine
            .initialize(Credentials {
                identifier: "me".into(),
                token: "token".into(),
                display_name: "Me".into(),
                endpoint: None,
            })
            .await
            .unwrap();

        let (orchestrator, ui) = CallOrchestrator::spawn(
            engine.clone(),
            engine_events,
            bridge.clone(),
            permissions.clone(),
            telephony_rx,
            push_rx,
        );

        Fixture {
            backend,
            bridge,
            permissions,
            backend_tx,
            telephony_tx,
            push_tx,
            orchestrator,
            engine,
            ui,
        }
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

    fn wake_payload(call_id: Uuid, name: &str, video: bool) -> Vec<u8> {
        serde_json::json!({
            "data": {
                "callId": call_id.to_string(),
                "displayName": name,
                "videoCall": if video { "true" } else { "false" },
            }
        })
        .to_string()
        .into_bytes()
    }

    #[tokio::test]
    async fn outgoing_call_reports_exactly_one_triple() {
        let mut fx = fixture().await;
        let handle = CallHandle::new();
        *fx.backend.next_handle.lock().unwrap() = Some(handle);

        fx.orchestrator
            .start_call(Identity::Local("callee".into()))
            .await
            .unwrap();
        wait_until(|| fx.backend.ops().contains(&"place_call".to_string())).await;

        // Duplicate Connected transitions from the service.
        for _ in 0..2 {
            fx.backend_tx
                .send(BackendEvent::CallStateChanged {
                    handle,
                    state: CallState::Connected,
                })
                .await
                .unwrap();
        }
        wait_until(|| fx.bridge.ops().contains(&"connected".to_string())).await;
        assert!(fx.ui.borrow().present_call_view);

        fx.orchestrator.end_call().await.unwrap();
        wait_until(|| fx.backend.ops().contains(&"hang_up".to_string())).await;
        fx.backend_tx
            .send(BackendEvent::CallRemoved {
                handle,
                state: CallState::Disconnected,
            })
            .await
            .unwrap();
        wait_until(|| fx.bridge.ops().iter().any(|op| op.starts_with("ended"))).await;

        let ops = fx.bridge.ops();
        assert_eq!(ops.iter().filter(|op| *op == "connecting").count(), 1);
        assert_eq!(ops.iter().filter(|op| *op == "connected").count(), 1);
        assert_eq!(
            ops.iter().filter(|op| op.starts_with("ended")).count(),
            1
        );
        assert!(ops.contains(&"ended:LocalEnded".to_string()));
        assert!(!fx.ui.borrow().present_call_view);
    }

    #[tokio::test]
    async fn denied_microphone_is_terminal_for_the_attempt() {
        let fx = fixture().await;
        fx.permissions.audio_denied.store(true, Ordering::SeqCst);

        fx.orchestrator
            .start_call(Identity::Local("callee".into()))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!fx.backend.ops().contains(&"place_call".to_string()));
        // Exactly one audio prompt and no video prompt: audio gates video.
        let prompts = fx.permissions.prompts.lock().unwrap().clone();
        assert_eq!(prompts, vec!["audio".to_string()]);
    }

    #[tokio::test]
    async fn wake_payload_reports_to_bridge_before_forwarding() {
        let fx = fixture().await;
        let call_id = Uuid::new_v4();

        fx.push_tx
            .send(PushEvent::WakePayload(wake_payload(call_id, "Alice", true)))
            .await
            .unwrap();

        wait_until(|| fx.backend.ops().contains(&"handle_wake".to_string())).await;
        let bridge_ops = fx.bridge.ops();
        assert_eq!(bridge_ops, vec!["incoming:Alice".to_string()]);
    }

    #[tokio::test]
    async fn malformed_wake_payload_is_discarded() {
        let fx = fixture().await;
        fx.push_tx
            .send(PushEvent::WakePayload(b"{\"data\":{}}".to_vec()))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(fx.bridge.ops().is_empty());
        assert!(!fx.backend.ops().contains(&"handle_wake".to_string()));
    }

    #[tokio::test]
    async fn accept_request_negotiates_permissions_then_accepts() {
        let fx = fixture().await;
        let handle = CallHandle::new();

        // The service resolves the incoming call first.
        fx.backend_tx
            .send(BackendEvent::IncomingCall {
                handle,
                caller: Identity::Local("alice".into()),
                caller_display_name: "Alice".into(),
                has_video: false,
            })
            .await
            .unwrap();
        wait_until(|| !fx.bridge.ops().is_empty()).await;

        fx.telephony_tx
            .send(TelephonyAction::AcceptRequested(handle))
            .await
            .unwrap();
        wait_until(|| fx.backend.ops().contains(&"accept_call".to_string())).await;

        let prompts = fx.permissions.prompts.lock().unwrap().clone();
        assert_eq!(prompts, vec!["audio".to_string(), "video".to_string()]);
    }

    #[tokio::test]
    async fn token_update_registers_and_enables_calls() {
        let mut fx = fixture().await;
        assert!(!fx.ui.borrow().call_enabled);

        fx.push_tx
            .send(PushEvent::TokenUpdated(Bytes::from_static(b"token")))
            .await
            .unwrap();

        wait_until(|| {
            fx.backend
                .ops()
                .contains(&"register_wake_token".to_string())
        })
        .await;
        fx.ui.changed().await.unwrap();
        assert!(fx.ui.borrow().call_enabled);
    }

    #[tokio::test]
    async fn remote_video_view_follows_participant_events() {
        let mut fx = fixture().await;
        let handle = CallHandle::new();
        *fx.backend.next_handle.lock().unwrap() = Some(handle);

        fx.orchestrator
            .start_call(Identity::Local("callee".into()))
            .await
            .unwrap();
        wait_until(|| fx.backend.ops().contains(&"place_call".to_string())).await;
        fx.backend_tx
            .send(BackendEvent::CallStateChanged {
                handle,
                state: CallState::Connected,
            })
            .await
            .unwrap();

        let view = ViewHandle(Uuid::new_v4());
        fx.backend_tx
            .send(BackendEvent::RemoteParticipantAdded {
                handle,
                participant: Identity::Local("peer".into()),
                display_name: Some("Peer".into()),
                renderer: Box::new(NullRenderer(view)),
            })
            .await
            .unwrap();

        wait_until(|| fx.ui.borrow().remote_video_view == Some(view)).await;

        fx.engine.end_call_for(handle).await.unwrap();
        fx.backend_tx
            .send(BackendEvent::CallRemoved {
                handle,
                state: CallState::Disconnected,
            })
            .await
            .unwrap();
        wait_until(|| fx.ui.borrow().remote_video_view.is_none()).await;
        assert!(!fx.ui.borrow().present_call_view);
    }
}
