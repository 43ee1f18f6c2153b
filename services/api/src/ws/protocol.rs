//! Defines the WebSocket message protocol between the browser client and the API server.

use serde::{Deserialize, Serialize};

pub const MISSING_KEY_MESSAGE: &str =
    "Server error: Gemini API key not set. Please enter it in the UI.";
pub const INVALID_FORMAT_MESSAGE: &str = "Invalid message format.";
pub const TTS_FAILED_MESSAGE: &str = "I'm having trouble generating a voice response.";
pub const UNEXPECTED_ERROR_MESSAGE: &str = "An unexpected server error occurred.";

/// Messages sent from the client (browser) to the server.
#[derive(Deserialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// A finished speech transcript from the user.
    Transcript {
        #[serde(default)]
        text: Option<String>,
    },
    /// Forget this session's conversation.
    ClearHistory,
    /// Any other `type` value; ignored.
    #[serde(other)]
    Unknown,
}

/// Text messages sent from the server to the client (browser).
///
/// Synthesized audio is not part of this enum; it goes out as a raw binary frame.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A fragment of the streamed model reply.
    LlmChunk { text: String },
    /// A client-facing failure notice.
    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: &str) -> Self {
        ServerMessage::Error {
            message: message.to_string(),
        }
    }
}
