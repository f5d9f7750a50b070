use thiserror::Error;

use crate::types::CallHandle;

/// Errors surfaced across the call and chat engines.
#[derive(Error, Debug)]
pub enum CommError {
    /// Initialization attempted with empty identity, token or display name.
    /// Reported once, never retried.
    #[error("Credentials are missing or empty")]
    CredentialsMissing,

    /// The underlying agent session could not be created. Call/chat flows
    /// stay disabled until a fresh initialize succeeds.
    #[error("Agent session initialization failed: {0}")]
    AgentInitFailed(String),

    /// The native call-screen bridge refused an action. No state change
    /// is applied.
    #[error("Native bridge rejected action: {0}")]
    ActionRejected(String),

    /// An accept/end/mute targeted a handle with no matching live call.
    #[error("No live call for handle {0}")]
    CallNotFound(CallHandle),

    /// A message send failed remotely; the local message stays pending.
    #[error("Message send failed: {0}")]
    SendFailed(String),

    /// Deletion refused because the counterpart already read the message.
    #[error("Message already read, deletion rejected")]
    DeleteRejected,

    /// A push wake payload did not match the expected wire shape.
    #[error("Invalid wake payload: {0}")]
    WakePayloadInvalid(String),

    /// Failure inside the cloud calling/chat backend.
    #[error("Backend error: {0}")]
    Backend(String),

    /// An engine channel closed while a request was in flight.
    #[error("Engine channel closed")]
    ChannelClosed,
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, CommError>;
