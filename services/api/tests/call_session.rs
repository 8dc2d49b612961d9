//! End-to-end tests for the call WebSocket and the plain HTTP endpoints.
//!
//! The router is served on an ephemeral port and driven with a real WebSocket
//! client; the completion backend is replaced by a scripted client.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use callbridge_api::{config::Config, router::create_router, state::AppState};
use callbridge_core::{
    frame::{Modality, WireSchema},
    llm_client::{CompletionClient, CompletionError},
    registry::SessionRegistry,
    session::{DEFAULT_FALLBACK, DEFAULT_GREETING, DEFAULT_PERSONA},
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::{
    collections::VecDeque,
    net::SocketAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::{net::TcpStream, time::timeout};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Message, protocol::frame::coding::CloseCode},
};
use tower::ServiceExt;
use tracing::Level;

type CallSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

/// Answers from a fixed script, optionally after a delay.
struct ScriptedClient {
    replies: Mutex<VecDeque<Result<String, CompletionError>>>,
    calls: AtomicUsize,
    delay: Duration,
}

impl ScriptedClient {
    fn new(replies: Vec<Result<String, CompletionError>>) -> Arc<Self> {
        Self::with_delay(replies, Duration::ZERO)
    }

    fn with_delay(replies: Vec<Result<String, CompletionError>>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            calls: AtomicUsize::new(0),
            delay,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn complete(&self, _persona: &str, _utterance: &str) -> Result<String, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(CompletionError::EmptyContent))
    }
}

fn test_config() -> Config {
    Config {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        openai_api_key: "test-key".into(),
        openai_api_base: "http://127.0.0.1:9".into(),
        chat_model: "test-model".into(),
        log_level: Level::INFO,
        persona: DEFAULT_PERSONA.into(),
        persona_path: None,
        greeting: DEFAULT_GREETING.into(),
        fallback: DEFAULT_FALLBACK.into(),
        send_greeting: true,
        modalities: vec![Modality::Audio, Modality::Text],
        send_turn_end: false,
        wire_schema: WireSchema::Realtime,
        max_malformed_frames: 3,
        idle_timeout: None,
        completion_timeout: Duration::from_secs(5),
        delta_chunk_chars: None,
    }
}

fn app_state(client: Arc<ScriptedClient>, config: Config) -> Arc<AppState> {
    Arc::new(AppState {
        completion_client: client,
        session_settings: Arc::new(config.session_settings()),
        registry: Arc::new(SessionRegistry::new()),
        config: Arc::new(config),
    })
}

async fn spawn_app(state: Arc<AppState>) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = create_router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn connect(addr: SocketAddr, call_id: &str) -> CallSocket {
    let (ws, _) = timeout(WAIT, connect_async(format!("ws://{}/chat/{}", addr, call_id)))
        .await
        .expect("connect timed out")
        .expect("connect failed");
    ws
}

async fn next_message(ws: &mut CallSocket) -> Message {
    timeout(WAIT, ws.next())
        .await
        .expect("timed out waiting for a frame")
        .expect("connection ended")
        .expect("websocket error")
}

async fn next_json(ws: &mut CallSocket) -> Value {
    loop {
        match next_message(ws).await {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected a text frame, got {:?}", other),
        }
    }
}

async fn send_json(ws: &mut CallSocket, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

/// Reads the session-ready frame and the greeting sequence.
async fn skip_handshake(ws: &mut CallSocket) {
    for _ in 0..4 {
        next_json(ws).await;
    }
}

async fn wait_until(condition: impl Fn() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

fn question(text: &str) -> Value {
    json!({"interaction_type": "response_required", "message": text})
}

#[tokio::test]
async fn test_session_starts_with_ready_and_greeting() {
    let addr = spawn_app(app_state(ScriptedClient::new(vec![]), test_config())).await;
    let mut ws = connect(addr, "call_greeting").await;

    assert_eq!(
        next_json(&mut ws).await,
        json!({"type": "session.update", "status": "ready", "modalities": ["audio", "text"]})
    );
    assert_eq!(
        next_json(&mut ws).await,
        json!({"type": "response.create", "response_id": "greeting", "modalities": ["audio", "text"]})
    );
    assert_eq!(
        next_json(&mut ws).await,
        json!({"type": "response.output_text.delta", "response_id": "greeting", "delta": DEFAULT_GREETING})
    );
    assert_eq!(
        next_json(&mut ws).await,
        json!({"type": "response.output_text.done", "response_id": "greeting"})
    );
}

#[tokio::test]
async fn test_caller_turn_gets_exactly_one_reply() {
    let client = ScriptedClient::new(vec![Ok("We're open 9 to 5.".into())]);
    let addr = spawn_app(app_state(client.clone(), test_config())).await;
    let mut ws = connect(addr, "call_hours").await;
    skip_handshake(&mut ws).await;

    send_json(
        &mut ws,
        json!({"interaction_type": "update_only", "transcript": [{"role": "user", "content": "What are"}]}),
    )
    .await;
    send_json(&mut ws, question("What are your hours?")).await;

    assert_eq!(
        next_json(&mut ws).await,
        json!({"type": "response.create", "response_id": "reply_1", "modalities": ["audio", "text"]})
    );
    assert_eq!(
        next_json(&mut ws).await,
        json!({"type": "response.output_text.delta", "response_id": "reply_1", "delta": "We're open 9 to 5."})
    );
    assert_eq!(
        next_json(&mut ws).await,
        json!({"type": "response.output_text.done", "response_id": "reply_1"})
    );
    assert_eq!(client.calls(), 1);
}

#[tokio::test]
async fn test_backend_failure_speaks_fallback_and_session_continues() {
    let client = ScriptedClient::new(vec![
        Err(CompletionError::Unreachable("connection refused".into())),
        Ok("Second answer.".into()),
    ]);
    let addr = spawn_app(app_state(client.clone(), test_config())).await;
    let mut ws = connect(addr, "call_fallback").await;
    skip_handshake(&mut ws).await;

    send_json(&mut ws, question("Hello?")).await;
    assert_eq!(next_json(&mut ws).await["response_id"], "reply_1");
    assert_eq!(next_json(&mut ws).await["delta"], DEFAULT_FALLBACK);
    assert_eq!(next_json(&mut ws).await["type"], "response.output_text.done");

    send_json(&mut ws, question("Are you there?")).await;
    assert_eq!(next_json(&mut ws).await["response_id"], "reply_2");
    assert_eq!(next_json(&mut ws).await["delta"], "Second answer.");
}

#[tokio::test]
async fn test_malformed_frame_does_not_close_connection() {
    let client = ScriptedClient::new(vec![Ok("Still here.".into())]);
    let addr = spawn_app(app_state(client, test_config())).await;
    let mut ws = connect(addr, "call_malformed").await;
    skip_handshake(&mut ws).await;

    ws.send(Message::Text("{definitely not json".to_string().into()))
        .await
        .unwrap();
    send_json(&mut ws, question("Can you hear me?")).await;

    assert_eq!(next_json(&mut ws).await["type"], "response.create");
    assert_eq!(next_json(&mut ws).await["delta"], "Still here.");
}

#[tokio::test]
async fn test_registry_tracks_call_lifetime() {
    let state = app_state(ScriptedClient::new(vec![]), test_config());
    let addr = spawn_app(state.clone()).await;
    let mut ws = connect(addr, "call_registry").await;
    skip_handshake(&mut ws).await;

    assert!(state.registry.contains("call_registry"));

    ws.close(None).await.unwrap();
    let registry = state.registry.clone();
    wait_until(move || !registry.contains("call_registry")).await;
}

#[tokio::test]
async fn test_hang_up_during_completion_discards_reply() {
    let client =
        ScriptedClient::with_delay(vec![Ok("Too late.".into())], Duration::from_millis(200));
    let state = app_state(client.clone(), test_config());
    let addr = spawn_app(state.clone()).await;
    let mut ws = connect(addr, "call_hangup").await;
    skip_handshake(&mut ws).await;

    send_json(&mut ws, question("Quick question")).await;
    wait_until(|| client.calls() == 1).await;
    ws.close(None).await.unwrap();

    let registry = state.registry.clone();
    wait_until(move || registry.is_empty()).await;

    // Nothing but the close handshake may follow.
    while let Ok(Some(Ok(msg))) = timeout(Duration::from_millis(500), ws.next()).await {
        assert!(
            matches!(msg, Message::Close(_)),
            "unexpected frame after hang-up: {:?}",
            msg
        );
    }
}

#[tokio::test]
async fn test_hang_up_behind_frame_burst_discards_reply() {
    let client =
        ScriptedClient::with_delay(vec![Ok("Too late.".into())], Duration::from_millis(500));
    let state = app_state(client.clone(), test_config());
    let addr = spawn_app(state.clone()).await;
    let mut ws = connect(addr, "call_burst_hangup").await;
    skip_handshake(&mut ws).await;

    send_json(&mut ws, question("Quick question")).await;
    wait_until(|| client.calls() == 1).await;
    // More partial transcripts than the session queue holds.
    for i in 0..100 {
        send_json(
            &mut ws,
            json!({"interaction_type": "update_only", "transcript": format!("partial {}", i)}),
        )
        .await;
    }
    ws.close(None).await.unwrap();

    let registry = state.registry.clone();
    wait_until(move || registry.is_empty()).await;

    while let Ok(Some(Ok(msg))) = timeout(Duration::from_millis(500), ws.next()).await {
        assert!(
            matches!(msg, Message::Close(_)),
            "unexpected frame after hang-up: {:?}",
            msg
        );
    }
    assert_eq!(client.calls(), 1);
}

#[tokio::test]
async fn test_duplicate_call_id_is_refused() {
    let state = app_state(ScriptedClient::new(vec![]), test_config());
    let addr = spawn_app(state.clone()).await;
    let mut first = connect(addr, "call_dup").await;
    skip_handshake(&mut first).await;

    let mut second = connect(addr, "call_dup").await;
    match next_message(&mut second).await {
        Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Policy),
        other => panic!("expected a policy close, got {:?}", other),
    }
    assert_eq!(state.registry.len(), 1);
}

#[tokio::test]
async fn test_idle_call_is_closed() {
    let mut config = test_config();
    config.idle_timeout = Some(Duration::from_millis(200));
    let state = app_state(ScriptedClient::new(vec![]), config);
    let addr = spawn_app(state.clone()).await;
    let mut ws = connect(addr, "call_idle").await;
    skip_handshake(&mut ws).await;

    assert!(matches!(next_message(&mut ws).await, Message::Close(_)));
    let registry = state.registry.clone();
    wait_until(move || registry.is_empty()).await;
}

#[tokio::test]
async fn test_legacy_wire_schema() {
    let mut config = test_config();
    config.wire_schema = WireSchema::Legacy;
    config.send_turn_end = true;
    let client = ScriptedClient::new(vec![Ok("We're open 9 to 5.".into())]);
    let addr = spawn_app(app_state(client, config)).await;
    let mut ws = connect(addr, "call_legacy").await;

    assert_eq!(
        next_json(&mut ws).await,
        json!({"type": "session.update", "status": "ready"})
    );
    assert_eq!(
        next_json(&mut ws).await,
        json!({"type": "response.output_text", "text": DEFAULT_GREETING})
    );

    send_json(&mut ws, question("What are your hours?")).await;
    assert_eq!(
        next_json(&mut ws).await,
        json!({"type": "response.output_text", "text": "We're open 9 to 5."})
    );
}

async fn call_http(state: Arc<AppState>, request: Request<Body>) -> (StatusCode, Value) {
    let response = create_router(state).oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

fn chat_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/chat")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_http_chat_uses_completion_client() {
    let client = ScriptedClient::new(vec![Ok("We're open 9 to 5.".into())]);
    let state = app_state(client.clone(), test_config());

    let (status, body) = call_http(
        state.clone(),
        chat_request(json!({"message": "What are your hours?"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"reply": "We're open 9 to 5.", "source": "completion"})
    );

    let (_, body) = call_http(state.clone(), chat_request(json!({"message": "Hi"}))).await;
    assert_eq!(body, json!({"reply": DEFAULT_FALLBACK, "source": "fallback"}));

    let (_, body) = call_http(state, chat_request(json!({"message": ""}))).await;
    assert_eq!(
        body,
        json!({"reply": DEFAULT_GREETING, "source": "empty_utterance"})
    );
    assert_eq!(client.calls(), 2);
}

#[tokio::test]
async fn test_http_chat_rejects_oversized_message() {
    let state = app_state(ScriptedClient::new(vec![]), test_config());
    let (status, body) = call_http(
        state,
        chat_request(json!({"message": "a".repeat(20 * 1024)})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("exceeds"));
}

#[tokio::test]
async fn test_health_and_root() {
    let state = app_state(ScriptedClient::new(vec![]), test_config());
    let _registration = state
        .registry
        .register("call_live", uuid::Uuid::new_v4())
        .unwrap();

    let (status, body) = call_http(
        state.clone(),
        Request::get("/health").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok", "active_calls": 1}));

    let (status, body) = call_http(
        state.clone(),
        Request::get("/calls").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["call_id"], "call_live");

    let (status, body) =
        call_http(state, Request::get("/").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["message"].is_string());
}
