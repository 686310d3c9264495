//! Data models and structures shared by the relay and the client

use serde::{Deserialize, Serialize};

/// Who produced a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    #[serde(alias = "assistant")]
    Model,
}

impl Sender {
    /// Role name understood by the completion API
    pub fn role(self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Model => "assistant",
        }
    }
}

/// One utterance in a character conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub sender: Sender,
    pub text: String,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            sender: Sender::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            sender: Sender::Model,
            text: text.into(),
        }
    }
}

/// Body of `POST /chat`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub npc: String,
    pub history: Vec<ConversationTurn>,
}

/// JSON error body returned by the relay, both as a plain response and as an
/// `error` stream event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Payload of a relay `data:` frame carrying reply text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentFrame {
    pub content: String,
}

/// A decoded frame of the relay's event stream, as seen by the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayFrame {
    Content(String),
    Error(ErrorBody),
    Done,
}

/// Role-tagged entry sent to the completion API
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpstreamMessage {
    pub role: &'static str,
    pub content: String,
}

/// Streaming completion chunk, reduced to the fields the relay reads
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamChunk {
    #[serde(default)]
    pub choices: Vec<UpstreamChoice>,
    #[serde(default)]
    pub error: Option<UpstreamErrorPayload>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamChoice {
    #[serde(default)]
    pub delta: Option<UpstreamDelta>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamDelta {
    #[serde(default)]
    pub content: Option<String>,
}

/// In-band error object some providers emit mid-stream
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamErrorPayload {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<serde_json::Value>,
}

impl UpstreamErrorPayload {
    pub fn describe(&self) -> String {
        match (&self.message, &self.code) {
            (Some(message), Some(code)) => format!("{} ({})", message, code),
            (Some(message), None) => message.clone(),
            (None, Some(code)) => format!("upstream error code {}", code),
            (None, None) => "unspecified upstream error".to_string(),
        }
    }
}
