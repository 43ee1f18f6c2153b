//! The transcript → reply → speech pipeline for a single user turn.

use crate::{
    state::{AppState, Backend},
    ws::{
        protocol::{ServerMessage, TTS_FAILED_MESSAGE},
        session::send_msg,
    },
};
use anyhow::{Context, Result};
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{error, info, warn};
use voice_agent_core::{
    llm_client::{LlmStreamEvent, Tool},
    persona::SYSTEM_PROMPT,
    turn::Turn,
};

/// Handles a single user transcript.
///
/// This involves:
/// 1.  Recording the user turn and sending the whole history to the model.
/// 2.  Forwarding every text fragment to the client as it arrives.
/// 3.  Recording the complete reply as a model turn.
/// 4.  Synthesizing the reply once and sending the audio as a binary frame.
///
/// A speech failure is reported to the client but keeps the recorded reply.
/// Any other error is returned and ends the connection. If a send to the
/// client fails mid-stream the model stream is dropped, and the partial reply
/// is not recorded.
pub async fn handle_transcript(
    socket: &mut WebSocket,
    state: &AppState,
    backend: &Backend,
    session_id: &str,
    transcript: String,
) -> Result<()> {
    info!(transcript = %transcript, "Received transcript");
    let history = state.sessions.append(session_id, Turn::user(transcript));

    let mut stream = backend
        .llm
        .stream_reply(SYSTEM_PROMPT, &history, &[Tool::GoogleSearch])
        .await
        .context("Failed to start LLM stream")?;

    let mut full_response = String::new();
    while let Some(event) = stream.next().await {
        let LlmStreamEvent::TextChunk(chunk) = event.context("LLM stream failed")?;
        if chunk.is_empty() {
            continue;
        }
        full_response.push_str(&chunk);
        send_msg(socket, ServerMessage::LlmChunk { text: chunk }).await?;
    }

    if full_response.is_empty() {
        warn!("LLM stream produced no text; skipping speech.");
        return Ok(());
    }

    state
        .sessions
        .append(session_id, Turn::model(full_response.as_str()));

    info!(chars = full_response.len(), "Starting TTS synthesis...");
    match backend
        .tts
        .synthesize(&full_response, &state.config.tts_voice)
        .await
    {
        Ok(audio) => {
            let len = audio.len();
            socket
                .send(Message::Binary(audio))
                .await
                .context("Failed to send audio to client")?;
            info!(bytes = len, "TTS audio sent.");
        }
        Err(e) => {
            error!(error = %e, "TTS API request failed");
            send_msg(socket, ServerMessage::error(TTS_FAILED_MESSAGE)).await?;
        }
    }

    Ok(())
}
