//! Manages the WebSocket connection lifecycle for a voice agent session.

use super::{
    cycle::handle_transcript,
    protocol::{
        ClientMessage, INVALID_FORMAT_MESSAGE, MISSING_KEY_MESSAGE, ServerMessage,
        UNEXPECTED_ERROR_MESSAGE,
    },
};
use crate::state::{AppState, Backend};
use anyhow::{Context, Result};
use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::SinkExt;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Query parameters accepted on `/ws`.
#[derive(Deserialize, Debug, Default)]
pub struct WsParams {
    pub session_id: Option<String>,
}

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params.session_id))
}

/// Main handler for an individual WebSocket connection.
///
/// Refuses the connection if no Gemini key is configured, then resolves the
/// session and runs the message loop until the client leaves or an
/// unrecoverable error occurs. Session history outlives the connection.
#[instrument(name = "ws_session", skip_all, fields(conn_id, session_id))]
async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>, requested_id: Option<String>) {
    let conn_id: u32 = rand::random();
    tracing::Span::current().record("conn_id", conn_id);
    info!("WebSocket connection established.");

    let (credentials, backend) = state.connection_snapshot().await;
    for provider in credentials.missing() {
        warn!(%provider, "{} API key not set on server.", provider.env_var());
    }

    let Some(backend) = backend else {
        let _ = send_msg(&mut socket, ServerMessage::error(MISSING_KEY_MESSAGE)).await;
        let _ = socket.send(Message::Close(None)).await;
        info!("WebSocket connection closed.");
        return;
    };

    let session_id = requested_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    tracing::Span::current().record("session_id", session_id.as_str());
    state.sessions.ensure(&session_id);

    if let Err(e) = run_session(&mut socket, &state, &backend, &session_id).await {
        error!(error = ?e, "WebSocket session terminated with error.");
        let _ = send_msg(&mut socket, ServerMessage::error(UNEXPECTED_ERROR_MESSAGE)).await;
    }
    info!("WebSocket connection closed.");
}

/// The main message loop for an active WebSocket session.
///
/// Malformed JSON and messages of the wrong shape are reported and skipped.
/// Any error returned from here ends the connection.
async fn run_session(
    socket: &mut WebSocket,
    state: &AppState,
    backend: &Backend,
    session_id: &str,
) -> Result<()> {
    while let Some(msg_result) = socket.recv().await {
        let text = match msg_result.context("Error receiving from client WebSocket")? {
            Message::Text(text) => text,
            Message::Close(_) => {
                info!("Client sent close frame.");
                break;
            }
            Message::Binary(_) | Message::Ping(_) | Message::Pong(_) => continue,
        };
        if text.is_empty() {
            continue;
        }

        let value: serde_json::Value = match serde_json::from_str(text.as_str()) {
            Ok(value) => value,
            Err(e) => {
                error!(error = %e, "Failed to decode JSON message.");
                send_msg(socket, ServerMessage::error(INVALID_FORMAT_MESSAGE)).await?;
                continue;
            }
        };

        if value.is_object() && value.get("type").is_none() {
            debug!("Ignoring client message without a type.");
            continue;
        }

        match serde_json::from_value::<ClientMessage>(value) {
            Ok(ClientMessage::Transcript { text: Some(transcript) }) if !transcript.is_empty() => {
                handle_transcript(socket, state, backend, session_id, transcript).await?;
            }
            Ok(ClientMessage::Transcript { .. }) => debug!("Ignoring empty transcript."),
            Ok(ClientMessage::ClearHistory) => {
                state.sessions.clear(session_id);
                info!("Chat history cleared.");
            }
            Ok(ClientMessage::Unknown) => debug!("Ignoring unrecognized client message."),
            Err(e) => {
                error!(error = %e, "Client message has an invalid shape.");
                send_msg(socket, ServerMessage::error(INVALID_FORMAT_MESSAGE)).await?;
            }
        }
    }
    Ok(())
}

/// A helper function to serialize and send a `ServerMessage` to the client.
pub(crate) async fn send_msg(socket: &mut WebSocket, msg: ServerMessage) -> Result<()> {
    let serialized = serde_json::to_string(&msg)?;
    socket.send(Message::Text(serialized.into())).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Config,
        credentials::Provider,
        router::create_router,
        state::BackendConnector,
    };
    use bytes::Bytes;
    use futures::{SinkExt as _, StreamExt, stream};
    use serde_json::{Value, json};
    use std::{
        collections::VecDeque,
        net::SocketAddr,
        sync::{
            Mutex,
            atomic::{AtomicBool, AtomicUsize, Ordering},
        },
        time::Duration,
    };
    use tokio::sync::Notify;
    use tokio_tungstenite::{
        MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message as WsMessage,
    };
    use voice_agent_core::{
        llm_client::{LlmClient, LlmError, LlmStream, LlmStreamEvent, SpeechSynthesizer, Tool},
        turn::Turn,
    };

    type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

    enum Script {
        Reply(Vec<&'static str>),
        Fail,
        /// Yields one chunk, waits for `resume`, then keeps yielding until dropped.
        Endless {
            resume: Arc<Notify>,
            dropped: Arc<AtomicBool>,
        },
    }

    /// Sets its flag when the stream holding it is dropped.
    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    fn endless_stream(resume: Arc<Notify>, dropped: Arc<AtomicBool>) -> LlmStream {
        let guard = DropFlag(dropped);
        Box::pin(stream::unfold(
            (0usize, guard, resume),
            |(n, guard, resume)| async move {
                match n {
                    0 => {}
                    1 => resume.notified().await,
                    _ => tokio::time::sleep(Duration::from_millis(10)).await,
                }
                let chunk = if n == 0 { "partial" } else { " more" };
                Some((
                    Ok::<_, LlmError>(LlmStreamEvent::TextChunk(chunk.to_string())),
                    (n + 1, guard, resume),
                ))
            },
        ))
    }

    /// Replays scripted replies and records every history it was sent.
    #[derive(Default)]
    struct ScriptedLlm {
        scripts: Mutex<VecDeque<Script>>,
        requests: Mutex<Vec<Vec<Turn>>>,
    }

    impl ScriptedLlm {
        fn with(scripts: Vec<Script>) -> Self {
            Self {
                scripts: Mutex::new(scripts.into()),
                requests: Mutex::default(),
            }
        }

        fn requests(&self) -> Vec<Vec<Turn>> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl LlmClient for ScriptedLlm {
        async fn stream_reply(
            &self,
            system_prompt: &str,
            history: &[Turn],
            tools: &[Tool],
        ) -> Result<LlmStream, LlmError> {
            assert!(system_prompt.contains("Elara"));
            assert_eq!(tools, &[Tool::GoogleSearch]);
            self.requests.lock().unwrap().push(history.to_vec());
            let script = self
                .scripts
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Script::Reply(vec!["ok"]));
            match script {
                Script::Reply(chunks) => Ok(Box::pin(stream::iter(
                    chunks
                        .into_iter()
                        .map(|c| Ok(LlmStreamEvent::TextChunk(c.to_string()))),
                ))),
                Script::Fail => Err(LlmError::Malformed("scripted failure".to_string())),
                Script::Endless { resume, dropped } => Ok(endless_stream(resume, dropped)),
            }
        }
    }

    #[derive(Default)]
    struct FakeTts {
        fail: bool,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl SpeechSynthesizer for FakeTts {
        async fn synthesize(&self, text: &str, voice: &str) -> Result<Bytes, LlmError> {
            assert_eq!(voice, "Fenrir");
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(LlmError::Api {
                    status: 500,
                    message: "boom".to_string(),
                });
            }
            Ok(Bytes::from(format!("audio:{text}")))
        }
    }

    struct FakeConnector {
        llm: Arc<ScriptedLlm>,
        tts: Arc<FakeTts>,
    }

    impl BackendConnector for FakeConnector {
        fn connect(&self, _api_key: &str) -> Backend {
            Backend {
                llm: self.llm.clone(),
                tts: self.tts.clone(),
            }
        }
    }

    fn test_state_with(llm: Arc<ScriptedLlm>, tts: Arc<FakeTts>, with_key: bool) -> Arc<AppState> {
        let mut config = Config::default();
        if with_key {
            config.credentials.set(Provider::Gemini, "test-key");
        }
        Arc::new(AppState::new(config, Arc::new(FakeConnector { llm, tts })))
    }

    fn test_state(llm: Arc<ScriptedLlm>, tts_fails: bool, with_key: bool) -> Arc<AppState> {
        let tts = Arc::new(FakeTts {
            fail: tts_fails,
            ..Default::default()
        });
        test_state_with(llm, tts, with_key)
    }

    async fn spawn_server(state: Arc<AppState>) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, create_router(state)).await.unwrap();
        });
        addr
    }

    async fn connect(addr: SocketAddr, session_id: &str) -> Client {
        let url = format!("ws://{addr}/ws?session_id={session_id}");
        let (client, _) = connect_async(url).await.expect("WebSocket handshake");
        client
    }

    async fn send_json(client: &mut Client, value: Value) {
        client
            .send(WsMessage::Text(value.to_string().into()))
            .await
            .unwrap();
    }

    async fn next_frame(client: &mut Client) -> WsMessage {
        tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("websocket error")
    }

    async fn next_json(client: &mut Client) -> Value {
        match next_frame(client).await {
            WsMessage::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("expected a text frame, got {other:?}"),
        }
    }

    async fn next_binary(client: &mut Client) -> Vec<u8> {
        match next_frame(client).await {
            WsMessage::Binary(data) => data.to_vec(),
            other => panic!("expected a binary frame, got {other:?}"),
        }
    }

    async fn assert_silent(client: &mut Client) {
        let result = tokio::time::timeout(Duration::from_millis(200), client.next()).await;
        assert!(result.is_err(), "expected no frame, got {result:?}");
    }

    #[tokio::test]
    async fn test_transcript_streams_chunks_then_audio() {
        let llm = Arc::new(ScriptedLlm::with(vec![Script::Reply(vec!["It's ", "sunny."])]));
        let state = test_state(llm.clone(), false, true);
        let addr = spawn_server(state.clone()).await;
        let mut client = connect(addr, "weather").await;

        send_json(&mut client, json!({"type": "transcript", "text": "What's the weather?"})).await;

        assert_eq!(next_json(&mut client).await, json!({"type": "llm_chunk", "text": "It's "}));
        assert_eq!(next_json(&mut client).await, json!({"type": "llm_chunk", "text": "sunny."}));
        assert_eq!(next_binary(&mut client).await, b"audio:It's sunny.".to_vec());

        assert_eq!(
            state.sessions.history("weather"),
            vec![Turn::user("What's the weather?"), Turn::model("It's sunny.")]
        );
        assert_eq!(llm.requests(), vec![vec![Turn::user("What's the weather?")]]);
    }

    #[tokio::test]
    async fn test_tts_failure_reports_error_and_keeps_history() {
        let llm = Arc::new(ScriptedLlm::with(vec![Script::Reply(vec!["Hello!"])]));
        let state = test_state(llm, true, true);
        let addr = spawn_server(state.clone()).await;
        let mut client = connect(addr, "tts-down").await;

        send_json(&mut client, json!({"type": "transcript", "text": "hi"})).await;

        assert_eq!(next_json(&mut client).await, json!({"type": "llm_chunk", "text": "Hello!"}));
        assert_eq!(
            next_json(&mut client).await,
            json!({"type": "error", "message": "I'm having trouble generating a voice response."})
        );
        assert_eq!(
            state.sessions.history("tts-down"),
            vec![Turn::user("hi"), Turn::model("Hello!")]
        );

        // The connection stays usable.
        send_json(&mut client, json!({"type": "transcript", "text": "again"})).await;
        assert_eq!(next_json(&mut client).await["type"], "llm_chunk");
    }

    #[tokio::test]
    async fn test_history_order_across_turns() {
        let llm = Arc::new(ScriptedLlm::with(vec![
            Script::Reply(vec!["first reply"]),
            Script::Reply(vec!["second ", "reply"]),
        ]));
        let state = test_state(llm.clone(), false, true);
        let addr = spawn_server(state.clone()).await;
        let mut client = connect(addr, "ordered").await;

        send_json(&mut client, json!({"type": "transcript", "text": "one"})).await;
        next_json(&mut client).await;
        next_binary(&mut client).await;

        send_json(&mut client, json!({"type": "transcript", "text": "two"})).await;
        next_json(&mut client).await;
        next_json(&mut client).await;
        next_binary(&mut client).await;

        let expected = vec![
            Turn::user("one"),
            Turn::model("first reply"),
            Turn::user("two"),
            Turn::model("second reply"),
        ];
        assert_eq!(state.sessions.history("ordered"), expected);
        assert_eq!(llm.requests()[1], expected[..3].to_vec());
    }

    #[tokio::test]
    async fn test_malformed_json_is_reported_once_and_loop_survives() {
        let llm = Arc::new(ScriptedLlm::default());
        let state = test_state(llm, false, true);
        let addr = spawn_server(state).await;
        let mut client = connect(addr, "malformed").await;

        client
            .send(WsMessage::Text("{not json".into()))
            .await
            .unwrap();
        assert_eq!(
            next_json(&mut client).await,
            json!({"type": "error", "message": "Invalid message format."})
        );
        assert_silent(&mut client).await;

        send_json(&mut client, json!({"type": "transcript", "text": "still there?"})).await;
        assert_eq!(next_json(&mut client).await, json!({"type": "llm_chunk", "text": "ok"}));
        assert_eq!(next_binary(&mut client).await, b"audio:ok".to_vec());
    }

    #[tokio::test]
    async fn test_wrongly_shaped_messages_are_reported() {
        let llm = Arc::new(ScriptedLlm::default());
        let state = test_state(llm.clone(), false, true);
        let addr = spawn_server(state.clone()).await;
        let mut client = connect(addr, "shapes").await;

        let invalid = json!({"type": "error", "message": "Invalid message format."});
        for frame in [json!([1, 2]), json!({"type": "transcript", "text": 42}), json!("hello")] {
            send_json(&mut client, frame).await;
            assert_eq!(next_json(&mut client).await, invalid);
        }
        assert_silent(&mut client).await;
        assert!(state.sessions.history("shapes").is_empty());
        assert!(llm.requests().is_empty());

        send_json(&mut client, json!({"type": "transcript", "text": "valid now"})).await;
        assert_eq!(next_json(&mut client).await, json!({"type": "llm_chunk", "text": "ok"}));
    }

    #[tokio::test]
    async fn test_client_disconnect_cancels_reply() {
        let resume = Arc::new(Notify::new());
        let dropped = Arc::new(AtomicBool::new(false));
        let llm = Arc::new(ScriptedLlm::with(vec![Script::Endless {
            resume: resume.clone(),
            dropped: dropped.clone(),
        }]));
        let tts = Arc::new(FakeTts::default());
        let state = test_state_with(llm, tts.clone(), true);
        let addr = spawn_server(state.clone()).await;
        let mut client = connect(addr, "gone").await;

        send_json(&mut client, json!({"type": "transcript", "text": "tell me a story"})).await;
        assert_eq!(
            next_json(&mut client).await,
            json!({"type": "llm_chunk", "text": "partial"})
        );
        drop(client);
        resume.notify_one();

        tokio::time::timeout(Duration::from_secs(5), async {
            while !dropped.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("reply stream should be dropped after the client leaves");

        assert_eq!(
            state.sessions.history("gone"),
            vec![Turn::user("tell me a story")]
        );
        assert_eq!(tts.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_transcript_is_ignored() {
        let llm = Arc::new(ScriptedLlm::default());
        let state = test_state(llm.clone(), false, true);
        let addr = spawn_server(state.clone()).await;
        let mut client = connect(addr, "quiet").await;

        send_json(&mut client, json!({"type": "transcript", "text": ""})).await;
        send_json(&mut client, json!({"type": "transcript"})).await;
        send_json(&mut client, json!({"type": "something_else"})).await;
        send_json(&mut client, json!({"text": "no type"})).await;
        assert_silent(&mut client).await;

        assert!(state.sessions.history("quiet").is_empty());
        assert!(llm.requests().is_empty());
    }

    #[tokio::test]
    async fn test_clear_history_only_affects_own_session() {
        let llm = Arc::new(ScriptedLlm::default());
        let state = test_state(llm.clone(), false, true);
        let addr = spawn_server(state.clone()).await;
        let mut alice = connect(addr, "alice").await;
        let mut bob = connect(addr, "bob").await;

        for (client, text) in [(&mut alice, "from alice"), (&mut bob, "from bob")] {
            send_json(client, json!({"type": "transcript", "text": text})).await;
            next_json(client).await;
            next_binary(client).await;
        }

        send_json(&mut alice, json!({"type": "clear_history"})).await;
        send_json(&mut alice, json!({"type": "transcript", "text": "fresh start"})).await;
        next_json(&mut alice).await;
        next_binary(&mut alice).await;

        assert_eq!(
            llm.requests().last().unwrap(),
            &vec![Turn::user("fresh start")]
        );
        assert_eq!(
            state.sessions.history("alice"),
            vec![Turn::user("fresh start"), Turn::model("ok")]
        );
        assert_eq!(
            state.sessions.history("bob"),
            vec![Turn::user("from bob"), Turn::model("ok")]
        );
    }

    #[tokio::test]
    async fn test_missing_key_sends_one_error_and_closes() {
        let llm = Arc::new(ScriptedLlm::default());
        let state = test_state(llm, false, false);
        let addr = spawn_server(state.clone()).await;
        let mut client = connect(addr, "nokey").await;

        assert_eq!(
            next_json(&mut client).await,
            json!({
                "type": "error",
                "message": "Server error: Gemini API key not set. Please enter it in the UI."
            })
        );
        match tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("connection should close")
        {
            None | Some(Err(_)) | Some(Ok(WsMessage::Close(_))) => {}
            Some(Ok(other)) => panic!("unexpected frame after error: {other:?}"),
        }
        assert!(!state.sessions.contains("nokey"));
    }

    #[tokio::test]
    async fn test_key_supplied_later_allows_connection() {
        let llm = Arc::new(ScriptedLlm::default());
        let state = test_state(llm, false, false);
        state
            .update_credentials([(Provider::Gemini, "late-key".to_string())])
            .await;
        let addr = spawn_server(state).await;
        let mut client = connect(addr, "late").await;

        send_json(&mut client, json!({"type": "transcript", "text": "hello"})).await;
        assert_eq!(next_json(&mut client).await["type"], "llm_chunk");
    }

    #[tokio::test]
    async fn test_llm_failure_sends_generic_error_and_closes() {
        let llm = Arc::new(ScriptedLlm::with(vec![Script::Fail]));
        let state = test_state(llm, false, true);
        let addr = spawn_server(state.clone()).await;
        let mut client = connect(addr, "broken").await;

        send_json(&mut client, json!({"type": "transcript", "text": "hi"})).await;
        assert_eq!(
            next_json(&mut client).await,
            json!({"type": "error", "message": "An unexpected server error occurred."})
        );
        match tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("connection should close")
        {
            None | Some(Err(_)) | Some(Ok(WsMessage::Close(_))) => {}
            Some(Ok(other)) => panic!("unexpected frame after error: {other:?}"),
        }
        // The user turn was recorded before the failure and survives for a reconnect.
        assert_eq!(state.sessions.history("broken"), vec![Turn::user("hi")]);
    }

    #[tokio::test]
    async fn test_session_survives_reconnect() {
        let llm = Arc::new(ScriptedLlm::default());
        let state = test_state(llm.clone(), false, true);
        let addr = spawn_server(state).await;

        let mut first = connect(addr, "sticky").await;
        send_json(&mut first, json!({"type": "transcript", "text": "remember me"})).await;
        next_json(&mut first).await;
        next_binary(&mut first).await;
        first.close(None).await.unwrap();

        let mut second = connect(addr, "sticky").await;
        send_json(&mut second, json!({"type": "transcript", "text": "still me"})).await;
        next_json(&mut second).await;

        assert_eq!(
            llm.requests().last().unwrap(),
            &vec![
                Turn::user("remember me"),
                Turn::model("ok"),
                Turn::user("still me")
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_session_id_mints_one() {
        let llm = Arc::new(ScriptedLlm::default());
        let state = test_state(llm, false, true);
        let addr = spawn_server(state.clone()).await;
        let (mut client, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();

        send_json(&mut client, json!({"type": "transcript", "text": "who am i"})).await;
        next_json(&mut client).await;
        next_binary(&mut client).await;

        assert_eq!(state.sessions.len(), 1);
    }
}
