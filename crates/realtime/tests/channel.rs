use docvoice_core::{ClientFrame, ConversationState, ConversationStore, Role};
use docvoice_realtime::{ChannelConfig, ChannelHandle, ChannelState, connect};
use futures_util::{SinkExt, StreamExt};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::{
    net::{TcpListener, TcpStream},
    time::{Instant, timeout},
};
use tokio_tungstenite::{
    WebSocketStream, accept_async, accept_hdr_async,
    tungstenite::{
        Message,
        handshake::server::{ErrorResponse, Request, Response},
    },
};

const RECONNECT_DELAY: Duration = Duration::from_millis(50);
const PATIENCE: Duration = Duration::from_secs(5);

async fn bind() -> (TcpListener, ChannelConfig) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut config = ChannelConfig::new(format!("ws://{}", listener.local_addr().unwrap()));
    config.reconnect_delay = RECONNECT_DELAY;
    (listener, config)
}

async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = timeout(PATIENCE, listener.accept())
        .await
        .expect("client never connected")
        .unwrap();
    accept_async(stream).await.unwrap()
}

async fn wait_for_channel(handle: &ChannelHandle, wanted: ChannelState) {
    let mut state = handle.state();
    timeout(PATIENCE, state.wait_for(|s| *s == wanted))
        .await
        .expect("timed out waiting for channel state")
        .unwrap();
}

/// Like [`wait_for_channel`], but only after the supervisor has left its
/// initial state, so a `Disconnected` match means a connection attempt ran.
async fn wait_for_channel_after_attempt(handle: &ChannelHandle, wanted: ChannelState) {
    let mut state = handle.state();
    timeout(PATIENCE, async {
        state.changed().await.unwrap();
        state.wait_for(|s| *s == wanted).await.unwrap();
    })
    .await
    .expect("timed out waiting for channel state");
}

async fn wait_for_conversation(
    store: &ConversationStore,
    pred: impl Fn(&ConversationState) -> bool,
) -> ConversationState {
    let mut view = store.view();
    timeout(PATIENCE, async {
        loop {
            let state = view.snapshot();
            if pred(&state) {
                return state;
            }
            view.changed().await.expect("store dropped");
        }
    })
    .await
    .expect("timed out waiting for conversation state")
}

async fn send_text(ws: &mut WebSocketStream<TcpStream>, text: &str) {
    ws.send(Message::Text(text.to_string().into())).await.unwrap();
}

async fn next_text(ws: &mut WebSocketStream<TcpStream>) -> String {
    loop {
        let msg = timeout(PATIENCE, ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = msg {
            return text.as_str().to_owned();
        }
    }
}

#[tokio::test]
async fn test_connects_to_client_endpoint() {
    let (listener, config) = bind().await;
    let store = ConversationStore::new();
    let _handle = connect(config, "client-42", store.clone());

    let path = Arc::new(Mutex::new(String::new()));
    let seen = path.clone();
    let (stream, _) = timeout(PATIENCE, listener.accept()).await.unwrap().unwrap();
    let _ws = accept_hdr_async(
        stream,
        move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            *seen.lock().unwrap() = req.uri().path().to_string();
            Ok(resp)
        },
    )
    .await
    .unwrap();

    assert_eq!(path.lock().unwrap().as_str(), "/ws/client-42");
    let state = wait_for_conversation(&store, |s| s.is_connected).await;
    assert!(state.messages.is_empty());
}

#[tokio::test]
async fn test_inbound_frames_update_conversation() {
    let (listener, config) = bind().await;
    let store = ConversationStore::new();
    let _handle = connect(config, "c1", store.clone());
    let mut ws = accept(&listener).await;

    send_text(&mut ws, r#"{"type":"system","message":"Connected to AI Voice Assistant"}"#).await;
    send_text(&mut ws, r#"{"type":"typing","status":true}"#).await;
    send_text(
        &mut ws,
        r#"{"type":"voice_response","transcript":"what is this","response":"A report.","conversation_id":"conv-9"}"#,
    )
    .await;
    send_text(&mut ws, r#"{"type":"typing","status":false}"#).await;

    let state = wait_for_conversation(&store, |s| s.messages.len() == 3 && !s.is_typing).await;

    let summary: Vec<(Role, &str)> = state
        .messages
        .iter()
        .map(|m| (m.role, m.content.as_str()))
        .collect();
    assert_eq!(
        summary,
        vec![
            (Role::System, "Connected to AI Voice Assistant"),
            (Role::User, "what is this"),
            (Role::Assistant, "A report."),
        ]
    );
    assert_eq!(state.conversation_id.as_deref(), Some("conv-9"));
}

#[tokio::test]
async fn test_bad_frames_are_dropped_and_connection_survives() {
    let (listener, config) = bind().await;
    let store = ConversationStore::new();
    let handle = connect(config, "c1", store.clone());
    let mut ws = accept(&listener).await;

    send_text(&mut ws, "this is not json").await;
    send_text(&mut ws, r#"{"type":"mystery","message":"?"}"#).await;
    send_text(&mut ws, r#"{"type":"pong"}"#).await;
    ws.send(Message::Binary(vec![1u8, 2, 3].into())).await.unwrap();
    send_text(&mut ws, r#"{"type":"system","message":"still here"}"#).await;

    let state = wait_for_conversation(&store, |s| !s.messages.is_empty()).await;
    assert_eq!(state.messages.len(), 1);
    assert_eq!(state.messages[0].content, "still here");
    assert_eq!(*handle.state().borrow(), ChannelState::Connected);
}

#[tokio::test]
async fn test_send_reaches_backend_when_open() {
    let (listener, config) = bind().await;
    let store = ConversationStore::new();
    let handle = connect(config, "c1", store.clone());
    let mut ws = accept(&listener).await;
    wait_for_channel(&handle, ChannelState::Connected).await;
    assert!(handle.is_open());

    handle.send(&ClientFrame::VoiceInput {
        transcript: "summarize the second chapter".to_string(),
        conversation_id: Some("conv-1".to_string()),
    });

    let received: serde_json::Value = serde_json::from_str(&next_text(&mut ws).await).unwrap();
    assert_eq!(
        received,
        serde_json::json!({
            "type": "voice_input",
            "transcript": "summarize the second chapter",
            "conversation_id": "conv-1"
        })
    );
}

#[tokio::test]
async fn test_send_while_disconnected_is_dropped() {
    // Reserve a port, then free it so every connection attempt is refused.
    let (listener, config) = bind().await;
    drop(listener);

    let store = ConversationStore::new();
    let mut handle = connect(config, "c1", store.clone());
    assert!(!handle.is_open());

    handle.send(&ClientFrame::VoiceInput {
        transcript: "hello?".to_string(),
        conversation_id: None,
    });

    assert_eq!(store.snapshot(), ConversationState::default());
    handle.disconnect().await;
}

#[tokio::test]
async fn test_reconnects_once_after_unplanned_close() {
    let (listener, config) = bind().await;
    let store = ConversationStore::new();
    let handle = connect(config, "c1", store.clone());

    let mut first = accept(&listener).await;
    wait_for_conversation(&store, |s| s.is_connected).await;
    first.close(None).await.unwrap();
    drop(first);

    wait_for_conversation(&store, |s| !s.is_connected).await;
    let _second = accept(&listener).await;
    wait_for_conversation(&store, |s| s.is_connected).await;
    wait_for_channel(&handle, ChannelState::Connected).await;

    // While connected nothing else should be trying to connect.
    let extra = timeout(RECONNECT_DELAY * 6, listener.accept()).await;
    assert!(extra.is_err(), "a second reconnect timer fired");
}

#[tokio::test]
async fn test_repeated_closes_never_stack_reconnects() {
    let (listener, config) = bind().await;
    let store = ConversationStore::new();
    let handle = connect(config, "c1", store.clone());

    let mut ws = accept(&listener).await;
    for _ in 0..3 {
        wait_for_conversation(&store, |s| s.is_connected).await;
        let closed_at = Instant::now();
        ws.close(None).await.unwrap();
        drop(ws);

        ws = accept(&listener).await;
        assert!(
            closed_at.elapsed() >= RECONNECT_DELAY,
            "reconnected before the delay elapsed"
        );
    }
    wait_for_channel(&handle, ChannelState::Connected).await;

    // Three closes, three reconnects, and nothing left pending.
    let extra = timeout(RECONNECT_DELAY * 6, listener.accept()).await;
    assert!(extra.is_err(), "a stale reconnect timer fired");
    assert!(handle.is_open());
}

#[tokio::test]
async fn test_keeps_retrying_until_backend_appears() {
    let (listener, config) = bind().await;
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let store = ConversationStore::new();
    let handle = connect(config, "c1", store.clone());
    tokio::time::sleep(RECONNECT_DELAY * 3).await;
    assert!(!store.snapshot().is_connected);

    let listener = TcpListener::bind(addr).await.unwrap();
    let _ws = accept(&listener).await;
    wait_for_channel(&handle, ChannelState::Connected).await;
    assert!(store.snapshot().is_connected);
}

#[tokio::test]
async fn test_disconnect_is_planned_and_idempotent() {
    let (listener, config) = bind().await;
    let store = ConversationStore::new();
    let mut handle = connect(config, "c1", store.clone());
    let mut ws = accept(&listener).await;
    wait_for_channel(&handle, ChannelState::Connected).await;

    handle.disconnect().await;
    assert_eq!(*handle.state().borrow(), ChannelState::Closed);
    assert!(!handle.is_open());
    assert!(!store.snapshot().is_connected);

    // The backend sees a close frame (or the end of the stream).
    let closing = timeout(PATIENCE, ws.next()).await.unwrap();
    assert!(matches!(closing, Some(Ok(Message::Close(_))) | None | Some(Err(_))));

    let reconnect = timeout(RECONNECT_DELAY * 6, listener.accept()).await;
    assert!(reconnect.is_err(), "channel reconnected after teardown");

    handle.disconnect().await;
    assert_eq!(*handle.state().borrow(), ChannelState::Closed);
}

#[tokio::test]
async fn test_disconnect_cancels_pending_reconnect() {
    let (listener, mut config) = bind().await;
    drop(listener);
    config.reconnect_delay = Duration::from_secs(30);

    let store = ConversationStore::new();
    let mut handle = connect(config, "c1", store.clone());
    wait_for_channel_after_attempt(&handle, ChannelState::Disconnected).await;

    timeout(Duration::from_secs(1), handle.disconnect())
        .await
        .expect("teardown waited for the reconnect timer");
    assert_eq!(*handle.state().borrow(), ChannelState::Closed);
}

#[tokio::test]
async fn test_keepalive_sends_ping() {
    let (listener, mut config) = bind().await;
    config.keepalive = Some(Duration::from_millis(50));
    let store = ConversationStore::new();
    let _handle = connect(config, "c1", store);
    let mut ws = accept(&listener).await;

    assert_eq!(next_text(&mut ws).await, r#"{"type":"ping"}"#);
}
