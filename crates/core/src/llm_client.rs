use crate::turn::Turn;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

/// Errors raised by the generation and speech adapters.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("request to the model API failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("model API returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("malformed model API response: {0}")]
    Malformed(String),
    #[error("audio payload was not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Represents the events that can be yielded from a streaming text response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmStreamEvent {
    TextChunk(String),
}

/// A lazy, finite stream of reply fragments. It cannot be restarted; dropping
/// it abandons the underlying request.
pub type LlmStream = Pin<Box<dyn Stream<Item = Result<LlmStreamEvent, LlmError>> + Send>>;

/// Server-side tools the model is allowed to use while answering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    GoogleSearch,
}

/// A client that streams a model reply for a conversation.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Starts a streaming generation.
    ///
    /// The request is the `system_prompt` as a leading user turn followed by
    /// `history` in order, with `tools` enabled.
    async fn stream_reply(
        &self,
        system_prompt: &str,
        history: &[Turn],
        tools: &[Tool],
    ) -> Result<LlmStream, LlmError>;
}

/// A client that turns text into a single audio payload.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesizes `text` with the named prebuilt voice, returning raw audio bytes.
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Bytes, LlmError>;
}
