//! Defines the JSON frame protocol spoken over the realtime channel.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Frames sent from the client to the backend.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// A finished utterance for the assistant to answer.
    VoiceInput {
        transcript: String,
        /// `null` until the backend has assigned an id to the conversation.
        conversation_id: Option<String>,
    },
    /// Keepalive; the backend answers with `pong`.
    Ping,
}

/// Frames sent from the backend to the client.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// An informational notice, e.g. the greeting sent right after connecting.
    System {
        message: Option<String>,
        timestamp: Option<String>,
    },
    /// The outcome of one voice turn. Every field is optional and handled on its own.
    VoiceResponse {
        transcript: Option<String>,
        response: Option<String>,
        conversation_id: Option<String>,
        timestamp: Option<String>,
    },
    /// Whether the assistant is currently composing a reply.
    Typing { status: Option<bool> },
    /// A failure while producing a reply.
    Error { message: Option<String> },
    /// Answer to a client `ping`.
    Pong { timestamp: Option<String> },
}

/// Reasons an inbound frame could not be turned into a [`ServerFrame`].
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("frame has no string `type` field")]
    MissingType,
    #[error("unknown frame type: {0}")]
    UnknownType(String),
}

impl ServerFrame {
    const KNOWN_TYPES: [&'static str; 5] = ["system", "voice_response", "typing", "error", "pong"];

    /// Parses one text frame.
    ///
    /// The tag is checked before the body so an unknown `type` is reported as
    /// such rather than as a generic deserialization failure.
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text)?;
        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(FrameError::MissingType)?;
        if !Self::KNOWN_TYPES.contains(&tag) {
            return Err(FrameError::UnknownType(tag.to_owned()));
        }
        Ok(serde_json::from_value(value)?)
    }
}

impl ClientFrame {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
