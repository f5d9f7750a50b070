use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CommError;

/// Lifecycle stage of a single phone call, driven exclusively by
/// cloud-SDK call-state events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CallState {
    None,
    EarlyMedia,
    Connecting,
    Ringing,
    Connected,
    Held,
    Disconnecting,
    Disconnected,
}

impl CallState {
    /// A terminal state: the call is over and its resources must be gone.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Disconnected | CallState::None)
    }
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CallState::None => "None",
            CallState::EarlyMedia => "EarlyMedia",
            CallState::Connecting => "Connecting",
            CallState::Ringing => "Ringing",
            CallState::Connected => "Connected",
            CallState::Held => "Held",
            CallState::Disconnecting => "Disconnecting",
            CallState::Disconnected => "Disconnected",
        };
        write!(f, "{name}")
    }
}

/// Process-assigned unique identifier for an in-progress call.
///
/// At most one handle is active per device at a time (single call-group,
/// single call-per-group policy). Created when a call is initiated locally
/// or reported via push; destroyed once the call fully disconnects.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CallHandle(pub Uuid);

impl CallHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CallHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CallHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Participant identifier as seen at the cloud-service boundary.
///
/// The remote service hands back opaque identifier strings of more than one
/// kind; keeping the distinction in a sum type avoids scattering "which kind
/// is this" checks across call handling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Identity {
    /// A user of this communication service.
    Local(String),
    /// An identity federated in from outside the service.
    External(String),
    /// The service reported a kind we do not model.
    Unknown,
}

impl Identity {
    /// The raw identifier string, if one exists.
    pub fn raw(&self) -> Option<&str> {
        match self {
            Identity::Local(id) | Identity::External(id) => Some(id),
            Identity::Unknown => None,
        }
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Identity::Local(id) => write!(f, "{id}"),
            Identity::External(id) => write!(f, "external:{id}"),
            Identity::Unknown => write!(f, "<unknown>"),
        }
    }
}

/// Credentials for the cloud calling/chat services, obtained out-of-band
/// by the hosting application and passed to the engines' `Initialize`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub identifier: String,
    pub token: String,
    pub display_name: String,
    /// Service endpoint URL. Only the chat session needs it.
    pub endpoint: Option<String>,
}

impl Credentials {
    /// Reject empty identity/token/display-name before any session attempt.
    pub fn validate(&self) -> Result<(), CommError> {
        if self.identifier.is_empty() || self.token.is_empty() || self.display_name.is_empty() {
            return Err(CommError::CredentialsMissing);
        }
        Ok(())
    }
}

/// Delivery status of a chat message. Advances pending → sent → read and
/// never regresses.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChatMessageStatus {
    Pending = 0,
    Sent = 1,
    Read = 2,
}

impl ChatMessageStatus {
    /// Monotonic advance: returns the later of the two statuses.
    pub fn advance(self, to: ChatMessageStatus) -> ChatMessageStatus {
        self.max(to)
    }

    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            0 => Some(Self::Pending),
            1 => Some(Self::Sent),
            2 => Some(Self::Read),
            _ => None,
        }
    }
}

/// Kind of file that can ride along a chat message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FileType {
    Image,
    Pdf,
}

impl FileType {
    /// Wire value carried in message metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Image => "jpg",
            FileType::Pdf => "pdf",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "jpg" => Some(FileType::Image),
            "pdf" => Some(FileType::Pdf),
            _ => None,
        }
    }
}
