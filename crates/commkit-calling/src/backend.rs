//! Trait seam for the cloud calling service.
//!
//! The service is an opaque collaborator: commkit drives it through
//! [`CallingBackend`] and receives its callbacks as [`BackendEvent`]s on an
//! mpsc channel, which the engine drains on its own task before touching
//! any state.

use async_trait::async_trait;
use bytes::Bytes;

use commkit_shared::{CallHandle, CallState, Credentials, Identity, IncomingCallDescriptor, Result};

use crate::video::{VideoRenderer, VideoStreamHandle};

/// Operations the call engine invokes against the cloud calling service.
#[async_trait]
pub trait CallingBackend: Send + Sync {
    /// Establish the authenticated agent session.
    async fn create_agent(&self, credentials: &Credentials) -> Result<()>;

    /// Register the opaque push wake token with the cloud session.
    async fn register_wake_token(&self, token: Bytes) -> Result<()>;

    /// Forward a push wake descriptor so the service resolves the actual
    /// incoming call object.
    async fn handle_wake(&self, descriptor: &IncomingCallDescriptor) -> Result<()>;

    /// Place an outgoing call. Returns the handle only after the service
    /// confirms call creation.
    async fn place_call(
        &self,
        callee: &Identity,
        video: Option<&VideoStreamHandle>,
    ) -> Result<CallHandle>;

    /// Accept the incoming call the service has resolved for `handle`.
    async fn accept_call(
        &self,
        handle: CallHandle,
        video: Option<&VideoStreamHandle>,
    ) -> Result<()>;

    /// Request hangup. Completion arrives as [`BackendEvent::CallRemoved`].
    async fn hang_up(&self, handle: CallHandle) -> Result<()>;

    async fn set_muted(&self, handle: CallHandle, muted: bool) -> Result<()>;

    async fn start_video(&self, handle: CallHandle, stream: &VideoStreamHandle) -> Result<()>;

    async fn stop_video(&self, handle: CallHandle, stream: &VideoStreamHandle) -> Result<()>;
}

/// Device negotiation for the local camera, performed before placing or
/// accepting a call.
#[async_trait]
pub trait DeviceManager: Send + Sync {
    /// Acquire the device camera and wrap its renderer in a local stream
    /// handle. Fails when no camera is available.
    async fn acquire_camera(&self) -> Result<VideoStreamHandle>;
}

/// Callbacks raised by the cloud calling service.
#[derive(Debug)]
pub enum BackendEvent {
    /// The service resolved an incoming call (may arrive before or after
    /// the push wake pathway asked us to accept it).
    IncomingCall {
        handle: CallHandle,
        caller: Identity,
        caller_display_name: String,
        has_video: bool,
    },
    /// A call transitioned lifecycle state.
    CallStateChanged {
        handle: CallHandle,
        state: CallState,
    },
    /// The service removed the call from its active set.
    CallRemoved {
        handle: CallHandle,
        state: CallState,
    },
    /// Microphone mute state changed (locally or natively initiated).
    MuteChanged {
        handle: CallHandle,
        muted: bool,
    },
    /// A remote participant joined and exposed a video stream.
    RemoteParticipantAdded {
        handle: CallHandle,
        participant: Identity,
        display_name: Option<String>,
        renderer: Box<dyn VideoRenderer>,
    },
    /// A remote participant left the call.
    RemoteParticipantRemoved {
        handle: CallHandle,
        participant: Identity,
    },
}
