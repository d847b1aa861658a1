use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Wire events pushed by the game server.
///
/// Frames are UTF-8 JSON text tagged by a `type` field. Unrecognized tags are
/// forwarded as [`ChannelEvent::Unknown`] rather than dropped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    NumberDrawn { number: String },
    GameStarted,
    Winner { player_name: String, pattern: String },
    PlayerJoined,
}

impl ServerEvent {
    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::NumberDrawn { .. } => EventKind::NumberDrawn,
            Self::GameStarted => EventKind::GameStarted,
            Self::Winner { .. } => EventKind::Winner,
            Self::PlayerJoined => EventKind::PlayerJoined,
        }
    }

    fn recognizes(kind: &str) -> bool {
        matches!(
            kind,
            "number_drawn" | "game_started" | "winner" | "player_joined"
        )
    }
}

/// Event delivered to registered listeners.
///
/// `Connected` and `Disconnected` are synthesized locally when the transport
/// opens or closes; they are never decoded from the wire. A frame whose
/// `type` claims one of those names dispatches as [`ChannelEvent::Unknown`].
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Connected,
    Disconnected,
    Server(ServerEvent),
    /// Frame with a `type` the client does not model. The full decoded
    /// payload is preserved for forward compatibility.
    Unknown { kind: String, payload: Value },
}

impl ChannelEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connected => EventKind::Connected,
            Self::Disconnected => EventKind::Disconnected,
            Self::Server(event) => event.kind(),
            Self::Unknown { kind, .. } => EventKind::Other(kind.clone()),
        }
    }

    /// Decodes one inbound frame.
    ///
    /// Invalid JSON, a missing `type` field, and a bad payload under a
    /// recognized `type` are all decode errors; the caller drops the frame.
    pub(crate) fn decode(text: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(text)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(DecodeError::MissingType)?
            .to_string();

        match serde_json::from_value::<ServerEvent>(value.clone()) {
            Ok(event) => Ok(Self::Server(event)),
            Err(source) if ServerEvent::recognizes(&kind) => {
                Err(DecodeError::Payload { kind, source })
            }
            Err(_) => Ok(Self::Unknown {
                kind,
                payload: value,
            }),
        }
    }
}

/// Registry key a listener subscribes under.
///
/// One variant per dispatchable event, plus [`EventKind::Other`] for wire
/// types the client does not model.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    NumberDrawn,
    GameStarted,
    Winner,
    PlayerJoined,
    Other(String),
}

impl EventKind {
    /// Returns the wire-level `type` name for this kind.
    pub fn wire_name(&self) -> &str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::NumberDrawn => "number_drawn",
            Self::GameStarted => "game_started",
            Self::Winner => "winner",
            Self::PlayerJoined => "player_joined",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Errors produced while decoding an inbound frame.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Frame is not valid JSON.
    #[error("invalid json frame: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame has no string `type` field.
    #[error("frame is missing a string `type` field")]
    MissingType,

    /// Frame has a recognized `type` but a payload that does not match it.
    #[error("bad payload for `{kind}` frame: {source}")]
    Payload {
        kind: String,
        source: serde_json::Error,
    },
}
