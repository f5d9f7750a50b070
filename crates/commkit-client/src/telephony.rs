//! Trait seam for the OS-native call screen.
//!
//! The bridge only ever *originates intents* (accept, end, mute); the
//! orchestrator's visibility transitions are driven exclusively by call
//! engine events.

use async_trait::async_trait;
use tracing::warn;

use commkit_shared::{CallHandle, Result};

/// Why a call ended, reported to the native call screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallEndReason {
    RemoteEnded,
    LocalEnded,
    Failed,
    Unanswered,
}

/// Operations the orchestrator invokes against the native call subsystem.
///
/// `report_incoming_call` must be invoked promptly when a push wake
/// arrives; the OS grants a bounded reporting window.
#[async_trait]
pub trait TelephonyBridge: Send + Sync {
    async fn report_incoming_call(
        &self,
        handle: CallHandle,
        caller_name: &str,
        has_video: bool,
    ) -> Result<()>;

    async fn report_outgoing_connecting(&self, handle: CallHandle) -> Result<()>;

    async fn report_outgoing_connected(&self, handle: CallHandle) -> Result<()>;

    async fn report_call_ended(&self, handle: CallHandle, reason: CallEndReason) -> Result<()>;
}

/// User intents raised by the native call screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelephonyAction {
    AcceptRequested(CallHandle),
    EndRequested(CallHandle),
    MuteRequested(CallHandle),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
}

/// Microphone / camera permission prompts. Audio gates video: the video
/// prompt is only ever shown after audio was granted.
#[async_trait]
pub trait Permissions: Send + Sync {
    async fn request_audio(&self) -> PermissionStatus;

    async fn request_video(&self) -> PermissionStatus;
}

/// Request audio then, only if granted, video. Audio denial is terminal
/// for the attempt; video denial degrades to audio-only.
pub(crate) async fn negotiate_media(permissions: &dyn Permissions) -> PermissionStatus {
    match permissions.request_audio().await {
        PermissionStatus::Denied => {
            warn!("microphone permission denied");
            PermissionStatus::Denied
        }
        PermissionStatus::Granted => {
            if permissions.request_video().await == PermissionStatus::Denied {
                warn!("camera permission denied, continuing audio-only");
            }
            PermissionStatus::Granted
        }
    }
}
