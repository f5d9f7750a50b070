//! Push wake-payload parsing.
//!
//! The push service delivers a JSON object whose top-level `data` object
//! carries three *string* fields: `callId` (UUID string), `displayName`,
//! and `videoCall` (`"true"` / `"false"`, not a boolean). The shape is
//! fixed by the push sender and must match exactly.

use serde::Deserialize;
use uuid::Uuid;

use crate::error::{CommError, Result};

/// Parsed view of one incoming-call wake payload. Ephemeral: used once to
/// drive the native incoming-call report, then discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingCallDescriptor {
    pub call_id: Uuid,
    pub caller_display_name: String,
    pub has_video: bool,
}

#[derive(Deserialize)]
struct WakeEnvelope {
    data: WakeData,
}

#[derive(Deserialize)]
struct WakeData {
    #[serde(rename = "callId")]
    call_id: String,
    #[serde(rename = "displayName")]
    display_name: String,
    #[serde(rename = "videoCall")]
    video_call: String,
}

/// Parse a raw wake payload into an [`IncomingCallDescriptor`].
pub fn parse_wake_payload(raw: &[u8]) -> Result<IncomingCallDescriptor> {
    let envelope: WakeEnvelope = serde_json::from_slice(raw)
        .map_err(|e| CommError::WakePayloadInvalid(e.to_string()))?;

    let call_id = Uuid::parse_str(&envelope.data.call_id)
        .map_err(|e| CommError::WakePayloadInvalid(format!("callId: {e}")))?;

    Ok(IncomingCallDescriptor {
        call_id,
        caller_display_name: envelope.data.display_name,
        has_video: envelope.data.video_call == "true",
    })
}
