//! Protocol messages exchanged with the sync server.

use monster_sync_core::EntitySnapshot;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Server protocol version this client speaks. Compared for exact equality.
pub const REQUIRED_VERSION: &str = "0.1";

/// Canonical `type` discriminators, matched case-insensitively on receive.
const MESSAGE_TYPES: [&str; 6] = [
    "Push",
    "SetSession",
    "SetName",
    "LeaveSession",
    "ServerMsg",
    "SessionState",
];

/// All message kinds of the session protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SessionMessage {
    /// Leader → server → peers: entity snapshots or diffs
    #[serde(rename = "Push")]
    PushSnapshots(PushSnapshots),
    /// Join a session as leader or peer
    SetSession(SetSession),
    /// Announce a display name
    SetName(SetName),
    /// Leave the current session
    LeaveSession,
    /// Free-form notice from the server
    #[serde(rename = "ServerMsg")]
    ServerNotice(ServerNotice),
    /// Roster summary for the current session
    SessionState(SessionState),
}

/// Batched entity snapshots for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSnapshots {
    /// Session identifier
    pub session_id: String,
    /// Full snapshots or diffs, positionally encoded
    #[serde(rename = "data", with = "crate::positional")]
    pub entities: Vec<EntitySnapshot>,
}

/// Session registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetSession {
    /// Session identifier
    pub session_id: String,
    /// True when registering as the pushing side
    pub is_leader: bool,
}

/// Display name announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetName {
    /// Player name
    pub name: String,
}

/// Server notice meant for the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerNotice {
    /// Notice text
    pub text: String,
    /// Severity
    #[serde(default)]
    pub level: NoticeLevel,
}

/// Roster summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionState {
    /// Connected participants, including this one
    pub players_count: u32,
    /// Whether the leader is connected
    pub leader_connected: bool,
}

/// Severity of a [`ServerNotice`].
///
/// Accepts level names (any case) or the server's numeric codes; anything
/// unrecognized reads as `Info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "RawLevel")]
pub enum NoticeLevel {
    /// Trace
    Trace,
    /// Debug
    Debug,
    /// Info
    #[default]
    Info,
    /// Warning
    Warn,
    /// Error
    Error,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawLevel {
    Name(String),
    Code(i64),
}

impl From<RawLevel> for NoticeLevel {
    fn from(raw: RawLevel) -> Self {
        match raw {
            RawLevel::Name(name) => match name.to_ascii_lowercase().as_str() {
                "trace" => Self::Trace,
                "debug" => Self::Debug,
                "warn" | "warning" => Self::Warn,
                "error" => Self::Error,
                _ => Self::Info,
            },
            // Server enum order: Trace, Debug, Warn, Info, Error
            RawLevel::Code(code) => match code {
                0 => Self::Trace,
                1 => Self::Debug,
                2 => Self::Warn,
                4 => Self::Error,
                _ => Self::Info,
            },
        }
    }
}

impl SessionMessage {
    /// Wire discriminator of this message.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PushSnapshots(_) => "Push",
            Self::SetSession(_) => "SetSession",
            Self::SetName(_) => "SetName",
            Self::LeaveSession => "LeaveSession",
            Self::ServerNotice(_) => "ServerMsg",
            Self::SessionState(_) => "SessionState",
        }
    }

    /// Encode as a compact JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_json(&self) -> Result<String, MessageError> {
        serde_json::to_string(self).map_err(|e| MessageError::Serialize(e.to_string()))
    }

    /// Decode a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns error if the frame is not a JSON object, has no `type`, has an
    /// unknown `type`, or its fields do not match the message kind.
    pub fn from_json(text: &str) -> Result<Self, MessageError> {
        let mut value: Value =
            serde_json::from_str(text).map_err(|e| MessageError::Deserialize(e.to_string()))?;

        let Some(object) = value.as_object_mut() else {
            return Err(MessageError::Deserialize("frame is not a JSON object".to_string()));
        };

        let kind = object
            .get("type")
            .and_then(Value::as_str)
            .ok_or(MessageError::MissingType)?;
        let canonical = MESSAGE_TYPES
            .iter()
            .find(|known| known.eq_ignore_ascii_case(kind))
            .ok_or_else(|| MessageError::UnknownType(kind.to_string()))?;
        object.insert("type".to_string(), Value::String((*canonical).to_string()));

        serde_json::from_value(value).map_err(|e| MessageError::Deserialize(e.to_string()))
    }
}

impl From<PushSnapshots> for SessionMessage {
    fn from(msg: PushSnapshots) -> Self {
        Self::PushSnapshots(msg)
    }
}

impl From<SetSession> for SessionMessage {
    fn from(msg: SetSession) -> Self {
        Self::SetSession(msg)
    }
}

impl From<SetName> for SessionMessage {
    fn from(msg: SetName) -> Self {
        Self::SetName(msg)
    }
}

/// Errors for message serialization/deserialization.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MessageError {
    /// Serialization failed
    #[error("serialization failed: {0}")]
    Serialize(String),
    /// Deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialize(String),
    /// Frame has no `type` field
    #[error("message has no type")]
    MissingType,
    /// Frame has an unrecognized `type`
    #[error("unknown message type: {0}")]
    UnknownType(String),
}
