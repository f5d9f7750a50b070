//! The push-wake pathway.
//!
//! The hosting application feeds these into the call orchestrator; the raw
//! wake payload is parsed with [`commkit_shared::wake::parse_wake_payload`].

use bytes::Bytes;

/// Events from the OS push registry.
#[derive(Debug, Clone)]
pub enum PushEvent {
    /// A fresh opaque voip token to register with the cloud session.
    TokenUpdated(Bytes),
    /// A raw incoming-call wake payload.
    WakePayload(Vec<u8>),
}
