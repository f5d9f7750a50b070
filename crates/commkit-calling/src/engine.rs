//! The call engine: single point of truth for the active call.
//!
//! The engine runs as one tokio task owning all call state. Commands come
//! in on an mpsc channel, cloud-SDK callbacks come in as
//! [`BackendEvent`]s on a second channel, and both are drained by the same
//! loop, so a push-triggered accept can never race a UI-triggered one.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use commkit_shared::{
    CallHandle, CallState, CommError, Credentials, Identity, IncomingCallDescriptor, Result,
};

use crate::backend::{BackendEvent, CallingBackend, DeviceManager};
use crate::video::{StreamDirection, VideoStreamHandle, ViewHandle};

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct CallEngineConfig {
    /// Delay before the single deferred re-check of an accept that found
    /// no matching incoming call.
    pub accept_retry_delay: Duration,
}

impl Default for CallEngineConfig {
    fn default() -> Self {
        Self {
            accept_retry_delay: Duration::from_secs(2),
        }
    }
}

/// Commands sent *into* the engine task.
#[derive(Debug)]
enum Command {
    Initialize(Credentials),
    RegisterWake(Bytes),
    HandleWake(IncomingCallDescriptor),
    StartCall(Identity),
    AcceptIncomingCall(CallHandle),
    EndActiveCall,
    EndCall(CallHandle),
    SetMute(CallHandle, bool),
    ToggleMute(CallHandle),
    StartVideo,
    StopVideo,
    GetStreamViews(oneshot::Sender<(Option<ViewHandle>, Option<ViewHandle>)>),
    /// Internal: the single deferred re-check of a pending accept.
    RetryAccept(CallHandle),
    Shutdown,
}

/// Events raised by the engine for the orchestrator.
#[derive(Debug)]
pub enum CallEngineEvent {
    /// The cloud service resolved an incoming call.
    IncomingCall {
        handle: CallHandle,
        descriptor: IncomingCallDescriptor,
    },
    /// The call reached `Connected`. Never delivered after `CallEnded`
    /// for the same handle, and at most once per handle.
    CallStarted(CallHandle),
    /// The call fully ended. All video/participant resources were torn
    /// down before this was emitted.
    CallEnded(CallHandle),
    MuteChanged { handle: CallHandle, muted: bool },
    VideoChanged { enabled: bool },
    /// Remote participant's video view appeared or went away.
    RemoteParticipantChanged(Option<ViewHandle>),
    /// The wake token was registered with the cloud session.
    WakeRegistered,
    InitFailed(CommError),
    /// An outgoing call could not be placed; no state transition occurred.
    CallFailed(CommError),
    /// A deferred accept gave up or the accept itself failed.
    AcceptFailed { handle: CallHandle, error: CommError },
}

/// Clonable command-side handle to a spawned [`CallEngine`].
#[derive(Clone)]
pub struct CallEngineHandle {
    cmd_tx: mpsc::Sender<Command>,
}

impl CallEngineHandle {
    async fn send(&self, cmd: Command) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| CommError::ChannelClosed)
    }

    /// Establish the agent session. Idempotent: a no-op if already up.
    pub async fn initialize(&self, credentials: Credentials) -> Result<()> {
        self.send(Command::Initialize(credentials)).await
    }

    /// Register the opaque voip wake token; buffered until the agent
    /// session exists.
    pub async fn register_wake(&self, token: Bytes) -> Result<()> {
        self.send(Command::RegisterWake(token)).await
    }

    /// Forward a parsed wake descriptor. Never drops the event while
    /// initialization from cached credentials is in flight.
    pub async fn handle_wake(&self, descriptor: IncomingCallDescriptor) -> Result<()> {
        self.send(Command::HandleWake(descriptor)).await
    }

    pub async fn start_call(&self, callee: Identity) -> Result<()> {
        self.send(Command::StartCall(callee)).await
    }

    pub async fn accept_incoming_call(&self, handle: CallHandle) -> Result<()> {
        self.send(Command::AcceptIncomingCall(handle)).await
    }

    /// End whichever call is active.
    pub async fn end_call(&self) -> Result<()> {
        self.send(Command::EndActiveCall).await
    }

    pub async fn end_call_for(&self, handle: CallHandle) -> Result<()> {
        self.send(Command::EndCall(handle)).await
    }

    pub async fn set_mute(&self, handle: CallHandle, muted: bool) -> Result<()> {
        self.send(Command::SetMute(handle, muted)).await
    }

    pub async fn toggle_mute(&self, handle: CallHandle) -> Result<()> {
        self.send(Command::ToggleMute(handle)).await
    }

    pub async fn start_video(&self) -> Result<()> {
        self.send(Command::StartVideo).await
    }

    pub async fn stop_video(&self) -> Result<()> {
        self.send(Command::StopVideo).await
    }

    /// Snapshot of the (local, remote) video views, if alive.
    pub async fn stream_views(&self) -> Result<(Option<ViewHandle>, Option<ViewHandle>)> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::GetStreamViews(tx)).await?;
        rx.await.map_err(|_| CommError::ChannelClosed)
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown).await
    }
}

/// One live call as the engine sees it.
#[derive(Debug)]
struct LiveCall {
    handle: CallHandle,
    state: CallState,
    muted: bool,
    started_emitted: bool,
}

#[derive(Debug)]
struct IncomingInfo {
    handle: CallHandle,
}

#[derive(Debug)]
struct PendingAccept {
    handle: CallHandle,
}

pub struct CallEngine;

impl CallEngine {
    /// Spawn the engine task. Returns the command handle and the event
    /// stream for the orchestrator.
    pub fn spawn(
        backend: Arc<dyn CallingBackend>,
        devices: Arc<dyn DeviceManager>,
        backend_rx: mpsc::Receiver<BackendEvent>,
        config: CallEngineConfig,
    ) -> (CallEngineHandle, mpsc::Receiver<CallEngineEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(64);

        let state = EngineState {
            backend,
            devices,
            config,
            internal_tx: cmd_tx.clone(),
            event_tx,
            credentials: None,
            agent_ready: false,
            pending_wake_token: None,
            active: None,
            incoming: None,
            pending_accept: None,
            local_stream: None,
            remote_stream: None,
        };

        tokio::spawn(engine_loop(state, cmd_rx, backend_rx));

        (CallEngineHandle { cmd_tx }, event_rx)
    }
}

async fn engine_loop(
    mut state: EngineState,
    mut cmd_rx: mpsc::Receiver<Command>,
    mut backend_rx: mpsc::Receiver<BackendEvent>,
) {
    info!("call engine started");
    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Shutdown) | None => break,
                Some(cmd) => state.handle_command(cmd).await,
            },
            Some(event) = backend_rx.recv() => state.handle_backend_event(event).await,
        }
    }
    state.teardown();
    info!("call engine stopped");
}

struct EngineState {
    backend: Arc<dyn CallingBackend>,
    devices: Arc<dyn DeviceManager>,
    config: CallEngineConfig,
    internal_tx: mpsc::Sender<Command>,
    event_tx: mpsc::Sender<CallEngineEvent>,
    credentials: Option<Credentials>,
    agent_ready: bool,
    pending_wake_token: Option<Bytes>,
    active: Option<LiveCall>,
    incoming: Option<IncomingInfo>,
    pending_accept: Option<PendingAccept>,
    local_stream: Option<VideoStreamHandle>,
    remote_stream: Option<VideoStreamHandle>,
}

impl EngineState {
    async fn emit(&self, event: CallEngineEvent) {
        if self.event_tx.send(event).await.is_err() {
            debug!("engine event receiver dropped");
        }
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Initialize(credentials) => self.initialize(credentials).await,
            Command::RegisterWake(token) => {
                if self.agent_ready {
                    self.register_wake(token).await;
                } else {
                    debug!("agent not ready, buffering wake token");
                    self.pending_wake_token = Some(token);
                }
            }
            Command::HandleWake(descriptor) => self.handle_wake(descriptor).await,
            Command::StartCall(callee) => self.start_call(callee).await,
            Command::AcceptIncomingCall(handle) => self.accept_incoming_call(handle).await,
            Command::EndActiveCall => {
                let handle = self.active.as_ref().map(|c| c.handle);
                match handle {
                    Some(handle) => self.request_hangup(handle).await,
                    None => warn!("end requested without an active call"),
                }
            }
            Command::EndCall(handle) => {
                let is_active = matches!(&self.active, Some(c) if c.handle == handle);
                if is_active {
                    self.request_hangup(handle).await;
                } else {
                    warn!(%handle, "end requested for unknown handle, ignoring");
                }
            }
            Command::SetMute(handle, muted) => self.set_mute(handle, muted).await,
            Command::ToggleMute(handle) => {
                let current = match &self.active {
                    Some(c) if c.handle == handle => c.muted,
                    _ => {
                        warn!(%handle, "mute toggle for stale or foreign handle, ignoring");
                        return;
                    }
                };
                self.set_mute(handle, !current).await;
            }
            Command::StartVideo => self.start_video().await,
            Command::StopVideo => self.stop_video().await,
            Command::GetStreamViews(reply) => {
                let views = (
                    self.local_stream.as_ref().map(|s| s.view()),
                    self.remote_stream.as_ref().map(|s| s.view()),
                );
                let _ = reply.send(views);
            }
            Command::RetryAccept(handle) => self.retry_accept(handle).await,
            Command::Shutdown => unreachable!("handled by the loop"),
        }
    }

    async fn initialize(&mut self, credentials: Credentials) {
        if self.agent_ready {
            debug!("agent session already established, ignoring initialize");
            return;
        }
        if let Err(e) = credentials.validate() {
            warn!("initialize rejected: credentials missing");
            self.emit(CallEngineEvent::InitFailed(e)).await;
            return;
        }
        self.credentials = Some(credentials);
        self.init_agent().await;
    }

    /// Create the agent session from cached credentials. Flushes a
    /// buffered wake token on success.
    async fn init_agent(&mut self) -> bool {
        let credentials = match &self.credentials {
            Some(c) => c.clone(),
            None => return false,
        };
        match self.backend.create_agent(&credentials).await {
            Ok(()) => {
                self.agent_ready = true;
                info!("agent session established");
                if let Some(token) = self.pending_wake_token.take() {
                    self.register_wake(token).await;
                }
                true
            }
            Err(e) => {
                error!(error = %e, "agent session creation failed");
                self.emit(CallEngineEvent::InitFailed(CommError::AgentInitFailed(
                    e.to_string(),
                )))
                .await;
                false
            }
        }
    }

    async fn register_wake(&self, token: Bytes) {
        match self.backend.register_wake_token(token).await {
            Ok(()) => {
                info!("wake token registered with cloud session");
                self.emit(CallEngineEvent::WakeRegistered).await;
            }
            Err(e) => warn!(error = %e, "wake token registration failed"),
        }
    }

    async fn handle_wake(&mut self, descriptor: IncomingCallDescriptor) {
        if self.agent_ready {
            self.forward_wake(&descriptor).await;
            return;
        }
        if self.credentials.is_some() {
            info!("agent not ready, initializing before forwarding wake");
            if self.init_agent().await {
                self.forward_wake(&descriptor).await;
            } else {
                warn!(call_id = %descriptor.call_id, "wake dropped: agent init failed");
            }
        } else {
            // No credentials means no retry can ever succeed for this event.
            error!(call_id = %descriptor.call_id, "wake dropped: no cached credentials");
        }
    }

    async fn forward_wake(&self, descriptor: &IncomingCallDescriptor) {
        if let Err(e) = self.backend.handle_wake(descriptor).await {
            warn!(call_id = %descriptor.call_id, error = %e, "service rejected wake descriptor");
        }
    }

    async fn start_call(&mut self, callee: Identity) {
        if !self.agent_ready {
            warn!("start call without agent session");
            self.emit(CallEngineEvent::CallFailed(CommError::AgentInitFailed(
                "agent session not established".into(),
            )))
            .await;
            return;
        }
        if self.active.is_some() {
            warn!("start call rejected: a call is already active");
            self.emit(CallEngineEvent::CallFailed(CommError::ActionRejected(
                "a call is already active".into(),
            )))
            .await;
            return;
        }

        // Camera negotiation happens before placing the call; a missing
        // camera degrades to audio-only rather than failing the call.
        match self.devices.acquire_camera().await {
            Ok(stream) => self.local_stream = Some(stream),
            Err(e) => warn!(error = %e, "no camera available, placing audio-only call"),
        }

        match self
            .backend
            .place_call(&callee, self.local_stream.as_ref())
            .await
        {
            Ok(handle) => {
                info!(%handle, callee = %callee, "outgoing call placed");
                self.active = Some(LiveCall {
                    handle,
                    state: CallState::Connecting,
                    muted: false,
                    started_emitted: false,
                });
                if self.local_stream.is_some() {
                    self.emit(CallEngineEvent::VideoChanged { enabled: true }).await;
                }
            }
            Err(e) => {
                error!(error = %e, "failed to place outgoing call");
                if let Some(stream) = self.local_stream.take() {
                    stream.dispose();
                }
                self.emit(CallEngineEvent::CallFailed(e)).await;
            }
        }
    }

    async fn accept_incoming_call(&mut self, handle: CallHandle) {
        let resolved = matches!(&self.incoming, Some(i) if i.handle == handle);
        if resolved {
            self.perform_accept(handle).await;
            return;
        }

        // The wake pathway and the service's own incoming-call event are
        // not ordered; wait for the event, with one bounded re-check as a
        // backstop instead of open-ended polling.
        info!(%handle, "incoming call not resolved yet, deferring accept");
        self.pending_accept = Some(PendingAccept { handle });
        let tx = self.internal_tx.clone();
        let delay = self.config.accept_retry_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Command::RetryAccept(handle)).await;
        });
    }

    async fn retry_accept(&mut self, handle: CallHandle) {
        let still_pending = matches!(&self.pending_accept, Some(p) if p.handle == handle);
        if !still_pending {
            // Satisfied in the meantime by the incoming-call event.
            return;
        }
        self.pending_accept = None;
        let resolved = matches!(&self.incoming, Some(i) if i.handle == handle);
        if resolved {
            self.perform_accept(handle).await;
        } else {
            warn!(%handle, "incoming call never resolved, abandoning accept");
            self.emit(CallEngineEvent::AcceptFailed {
                handle,
                error: CommError::CallNotFound(handle),
            })
            .await;
        }
    }

    async fn perform_accept(&mut self, handle: CallHandle) {
        self.pending_accept = None;

        // A second call must never displace the active one: its streams
        // would be dropped undisposed and its CallEnded would never fire.
        if self.active.is_some() {
            warn!(%handle, "accept rejected: a call is already active");
            self.emit(CallEngineEvent::AcceptFailed {
                handle,
                error: CommError::ActionRejected("a call is already active".into()),
            })
            .await;
            return;
        }

        match self.devices.acquire_camera().await {
            Ok(stream) => self.local_stream = Some(stream),
            Err(e) => warn!(error = %e, "no camera available, accepting audio-only"),
        }

        match self
            .backend
            .accept_call(handle, self.local_stream.as_ref())
            .await
        {
            Ok(()) => {
                info!(%handle, "incoming call accepted");
                self.incoming = None;
                self.active = Some(LiveCall {
                    handle,
                    state: CallState::Connecting,
                    muted: false,
                    started_emitted: false,
                });
                if self.local_stream.is_some() {
                    self.emit(CallEngineEvent::VideoChanged { enabled: true }).await;
                }
            }
            Err(e) => {
                error!(%handle, error = %e, "accept failed");
                if let Some(stream) = self.local_stream.take() {
                    stream.dispose();
                }
                self.emit(CallEngineEvent::AcceptFailed { handle, error: e })
                    .await;
            }
        }
    }

    async fn request_hangup(&self, handle: CallHandle) {
        // Completion arrives as a CallRemoved backend event.
        if let Err(e) = self.backend.hang_up(handle).await {
            warn!(%handle, error = %e, "hangup request failed");
        }
    }

    async fn set_mute(&mut self, handle: CallHandle, muted: bool) {
        let is_active = matches!(&self.active, Some(c) if c.handle == handle);
        if !is_active {
            warn!(%handle, "mute for stale or foreign handle, ignoring");
            return;
        }
        match self.backend.set_muted(handle, muted).await {
            Ok(()) => {
                let mut changed = false;
                if let Some(call) = self.active.as_mut() {
                    if call.muted != muted {
                        call.muted = muted;
                        changed = true;
                    }
                }
                if changed {
                    self.emit(CallEngineEvent::MuteChanged { handle, muted }).await;
                }
            }
            Err(e) => warn!(%handle, error = %e, "set mute failed"),
        }
    }

    async fn start_video(&mut self) {
        let handle = match self.active.as_ref().map(|c| c.handle) {
            Some(h) => h,
            None => {
                warn!("start video without an active call");
                return;
            }
        };
        if self.local_stream.is_none() {
            match self.devices.acquire_camera().await {
                Ok(stream) => self.local_stream = Some(stream),
                Err(e) => {
                    warn!(error = %e, "camera unavailable for video start");
                    self.emit(CallEngineEvent::CallFailed(e)).await;
                    return;
                }
            }
        }
        if let Some(stream) = &self.local_stream {
            match self.backend.start_video(handle, stream).await {
                Ok(()) => self.emit(CallEngineEvent::VideoChanged { enabled: true }).await,
                Err(e) => warn!(error = %e, "video start failed"),
            }
        }
    }

    async fn stop_video(&mut self) {
        if let Some(handle) = self.active.as_ref().map(|c| c.handle) {
            if let Some(stream) = &self.local_stream {
                if let Err(e) = self.backend.stop_video(handle, stream).await {
                    warn!(error = %e, "video stop failed");
                }
            }
        }
        if let Some(stream) = self.local_stream.take() {
            stream.dispose();
            self.emit(CallEngineEvent::VideoChanged { enabled: false }).await;
        }
    }

    async fn handle_backend_event(&mut self, event: BackendEvent) {
        match event {
            BackendEvent::IncomingCall {
                handle,
                caller,
                caller_display_name,
                has_video,
            } => {
                info!(%handle, caller = %caller, "incoming call resolved by service");
                let descriptor = IncomingCallDescriptor {
                    call_id: handle.0,
                    caller_display_name,
                    has_video,
                };
                self.incoming = Some(IncomingInfo { handle });
                self.emit(CallEngineEvent::IncomingCall { handle, descriptor })
                    .await;

                let accept_waiting =
                    matches!(&self.pending_accept, Some(p) if p.handle == handle);
                if accept_waiting {
                    info!(%handle, "deferred accept satisfied by incoming-call event");
                    self.perform_accept(handle).await;
                }
            }
            BackendEvent::CallStateChanged { handle, state } => {
                self.call_state_changed(handle, state).await;
            }
            BackendEvent::CallRemoved { handle, state } => {
                debug!(%handle, %state, "call removed by service");
                let is_active = matches!(&self.active, Some(c) if c.handle == handle);
                if is_active {
                    self.finish_call(handle).await;
                } else if matches!(&self.incoming, Some(i) if i.handle == handle) {
                    // An unanswered push-reported call went away.
                    self.incoming = None;
                    self.pending_accept = None;
                    self.emit(CallEngineEvent::CallEnded(handle)).await;
                }
            }
            BackendEvent::MuteChanged { handle, muted } => {
                let mut changed = false;
                if let Some(call) = self.active.as_mut() {
                    if call.handle == handle && call.muted != muted {
                        call.muted = muted;
                        changed = true;
                    }
                }
                if changed {
                    self.emit(CallEngineEvent::MuteChanged { handle, muted }).await;
                }
            }
            BackendEvent::RemoteParticipantAdded {
                handle,
                participant,
                display_name,
                renderer,
            } => {
                let is_active = matches!(&self.active, Some(c) if c.handle == handle);
                if !is_active {
                    debug!(%handle, "participant for unknown call, disposing renderer");
                    let mut renderer = renderer;
                    renderer.dispose();
                    return;
                }
                if let Some(existing) = self.remote_stream.take() {
                    existing.dispose();
                }
                let stream = VideoStreamHandle::new(
                    StreamDirection::Remote {
                        participant,
                        display_name,
                    },
                    renderer,
                );
                let view = stream.view();
                self.remote_stream = Some(stream);
                self.emit(CallEngineEvent::RemoteParticipantChanged(Some(view)))
                    .await;
            }
            BackendEvent::RemoteParticipantRemoved {
                handle,
                participant,
            } => {
                let is_active = matches!(&self.active, Some(c) if c.handle == handle);
                if !is_active {
                    return;
                }
                let owns = self
                    .remote_stream
                    .as_ref()
                    .and_then(|s| s.participant())
                    == Some(&participant);
                if owns {
                    if let Some(stream) = self.remote_stream.take() {
                        stream.dispose();
                    }
                    self.emit(CallEngineEvent::RemoteParticipantChanged(None)).await;
                }
            }
        }
    }

    async fn call_state_changed(&mut self, handle: CallHandle, state: CallState) {
        let mut emit_started = false;
        let mut terminal = false;
        match self.active.as_mut() {
            Some(call) if call.handle == handle => {
                debug!(%handle, %state, "call state changed");
                call.state = state;
                if state == CallState::Connected && !call.started_emitted {
                    call.started_emitted = true;
                    emit_started = true;
                }
                if state.is_terminal() {
                    terminal = true;
                }
            }
            _ => {
                debug!(%handle, %state, "state change for unknown call, ignoring");
                return;
            }
        }
        if emit_started {
            self.emit(CallEngineEvent::CallStarted(handle)).await;
        }
        if terminal {
            self.finish_call(handle).await;
        }
    }

    /// Tear down every call resource, then tell listeners the call ended.
    /// Listeners never observe a disconnected call with live resources.
    /// CallEnded fires at most once per handle: the call leaves `active`
    /// here and later finishes for the same handle are ignored.
    async fn finish_call(&mut self, handle: CallHandle) {
        match self.active.take() {
            Some(call) if call.handle == handle => {}
            other => {
                self.active = other;
                debug!(%handle, "finish for non-active call, ignoring");
                return;
            }
        }

        if let Some(stream) = self.remote_stream.take() {
            stream.dispose();
        }
        if let Some(stream) = self.local_stream.take() {
            stream.dispose();
        }
        self.incoming = None;
        self.pending_accept = None;

        self.emit(CallEngineEvent::RemoteParticipantChanged(None)).await;
        self.emit(CallEngineEvent::VideoChanged { enabled: false }).await;
        info!(%handle, "call ended");
        self.emit(CallEngineEvent::CallEnded(handle)).await;
    }

    /// Synchronous teardown when the engine task exits.
    fn teardown(&mut self) {
        if let Some(stream) = self.remote_stream.take() {
            stream.dispose();
        }
        if let Some(stream) = self.local_stream.take() {
            stream.dispose();
        }
    }
}
