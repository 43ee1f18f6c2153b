//! Gemini REST adapter.
//!
//! Talks to the `generativelanguage` API directly: `streamGenerateContent`
//! (Server-Sent Events) for chat replies and `generateContent` with an audio
//! response modality for speech.

use crate::{
    llm_client::{LlmClient, LlmError, LlmStream, LlmStreamEvent, SpeechSynthesizer, Tool},
    turn::{Role, Turn},
};
use async_stream::try_stream;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_CHAT_MODEL: &str = "gemini-2.5-flash-preview-05-20";
pub const DEFAULT_TTS_MODEL: &str = "gemini-2.5-flash-preview-tts";

/// Client for the Gemini HTTP API, used both for chat and for speech.
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    chat_model: String,
    tts_model: String,
}

impl GeminiClient {
    /// Creates a client with the default models and endpoint.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_API_BASE.to_string(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            tts_model: DEFAULT_TTS_MODEL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_chat_model(mut self, model: impl Into<String>) -> Self {
        self.chat_model = model.into();
        self
    }

    pub fn with_tts_model(mut self, model: impl Into<String>) -> Self {
        self.tts_model = model.into();
        self
    }

    /// Posts `body` to `{base}/models/{model}:{method}` and checks the status.
    async fn post<T: Serialize + ?Sized>(
        &self,
        model: &str,
        method: &str,
        query: &[(&str, &str)],
        body: &T,
    ) -> Result<reqwest::Response, LlmError> {
        let url = format!("{}/models/{}:{}", self.base_url, model, method);
        let response = self
            .client
            .post(url)
            .query(query)
            .query(&[("key", self.api_key.as_str())])
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read Gemini error body".to_string());
            return Err(api_error(status, &body));
        }
        Ok(response)
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn stream_reply(
        &self,
        system_prompt: &str,
        history: &[Turn],
        tools: &[Tool],
    ) -> Result<LlmStream, LlmError> {
        let request = chat_request(system_prompt, history, tools);
        debug!(model = %self.chat_model, turns = history.len(), "Starting Gemini stream");
        let response = self
            .post(
                &self.chat_model,
                "streamGenerateContent",
                &[("alt", "sse")],
                &request,
            )
            .await?;
        Ok(Box::pin(reply_events(sse_data(response.bytes_stream()))))
    }
}

#[async_trait]
impl SpeechSynthesizer for GeminiClient {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Bytes, LlmError> {
        let request = speech_request(text, voice);
        let response: GenerateContentResponse = self
            .post(&self.tts_model, "generateContent", &[], &request)
            .await?
            .json()
            .await?;
        let audio = response
            .audio()
            .ok_or_else(|| LlmError::Malformed("response carried no audio data".to_string()))?;
        Ok(Bytes::from(BASE64_STANDARD.decode(audio)?))
    }
}

// --- Wire types ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<Role>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct ToolSpec {
    google_search: EmptyObject,
}

#[derive(Serialize)]
struct EmptyObject {}

impl From<Tool> for ToolSpec {
    fn from(tool: Tool) -> Self {
        match tool {
            Tool::GoogleSearch => ToolSpec {
                google_search: EmptyObject {},
            },
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    response_modalities: Vec<&'static str>,
    speech_config: SpeechConfig<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig<'a> {
    voice_config: VoiceConfig<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig<'a> {
    prebuilt_voice_config: PrebuiltVoiceConfig<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig<'a> {
    voice_name: &'a str,
}

#[derive(Deserialize, Debug, Default)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize, Debug)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

#[derive(Deserialize, Debug)]
struct InlineData {
    data: String,
}

#[derive(Deserialize)]
struct ErrorWrapper {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    status: Option<String>,
}

impl GenerateContentResponse {
    fn parts(&self) -> impl Iterator<Item = &ResponsePart> {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .into_iter()
            .flat_map(|content| content.parts.iter())
    }

    /// Text carried by this response, or `None` if it has none.
    fn text(&self) -> Option<String> {
        let text: String = self.parts().filter_map(|p| p.text.as_deref()).collect();
        (!text.is_empty()).then_some(text)
    }

    /// Base64 audio of the first inline-data part.
    fn audio(&self) -> Option<&str> {
        self.parts()
            .find_map(|p| p.inline_data.as_ref())
            .map(|blob| blob.data.as_str())
    }
}

fn chat_request<'a>(
    system_prompt: &'a str,
    history: &'a [Turn],
    tools: &[Tool],
) -> GenerateContentRequest<'a> {
    let mut contents = Vec::with_capacity(history.len() + 1);
    contents.push(Content {
        role: Some(Role::User),
        parts: vec![Part {
            text: system_prompt,
        }],
    });
    contents.extend(history.iter().map(|turn| Content {
        role: Some(turn.role),
        parts: vec![Part { text: &turn.text }],
    }));

    GenerateContentRequest {
        contents,
        tools: tools.iter().copied().map(ToolSpec::from).collect(),
        generation_config: None,
    }
}

fn speech_request<'a>(text: &'a str, voice: &'a str) -> GenerateContentRequest<'a> {
    GenerateContentRequest {
        contents: vec![Content {
            role: None,
            parts: vec![Part { text }],
        }],
        tools: Vec::new(),
        generation_config: Some(GenerationConfig {
            response_modalities: vec!["AUDIO"],
            speech_config: SpeechConfig {
                voice_config: VoiceConfig {
                    prebuilt_voice_config: PrebuiltVoiceConfig { voice_name: voice },
                },
            },
        }),
    }
}

fn api_error(status: StatusCode, body: &str) -> LlmError {
    let message = serde_json::from_str::<ErrorWrapper>(body)
        .map(|wrapper| {
            let msg = wrapper.error.message.unwrap_or_else(|| body.to_string());
            match wrapper.error.status {
                Some(status_text) if !status_text.is_empty() => format!("{status_text}: {msg}"),
                _ => msg,
            }
        })
        .unwrap_or_else(|_| body.to_string());
    LlmError::Api {
        status: status.as_u16(),
        message,
    }
}

/// Splits an SSE byte stream into the payloads of its `data:` lines.
///
/// Lines are reassembled across chunk boundaries before decoding, so
/// multi-byte characters split between chunks survive intact.
fn sse_data<S, B, E>(body: S) -> impl Stream<Item = Result<String, LlmError>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<LlmError> + Send + 'static,
{
    try_stream! {
        let mut body = Box::pin(body);
        let mut buffer = BytesMut::new();
        // Bytes of `buffer` already known to contain no newline.
        let mut scanned = 0;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(Into::<LlmError>::into)?;
            buffer.extend_from_slice(chunk.as_ref());
            while let Some(offset) = buffer[scanned..].iter().position(|&b| b == b'\n') {
                let line = buffer.split_to(scanned + offset + 1);
                scanned = 0;
                if let Some(data) = data_field(&line) {
                    yield data;
                }
            }
            scanned = buffer.len();
        }
        if let Some(data) = data_field(&buffer) {
            yield data;
        }
    }
}

fn data_field(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let data = line.trim_end_matches(['\r', '\n']).strip_prefix("data:")?;
    let data = data.strip_prefix(' ').unwrap_or(data);
    (!data.is_empty()).then(|| data.to_string())
}

/// Maps SSE payloads to text fragments. Payloads that don't parse or carry
/// no text are skipped.
fn reply_events<S>(data: S) -> impl Stream<Item = Result<LlmStreamEvent, LlmError>> + Send
where
    S: Stream<Item = Result<String, LlmError>> + Send,
{
    data.filter_map(|event| async move {
        match event {
            Ok(payload) => match serde_json::from_str::<GenerateContentResponse>(&payload) {
                Ok(response) => response.text().map(|t| Ok(LlmStreamEvent::TextChunk(t))),
                Err(e) => {
                    warn!(error = %e, "Skipping unparseable Gemini stream event");
                    None
                }
            },
            Err(e) => Some(Err(e)),
        }
    })
}
