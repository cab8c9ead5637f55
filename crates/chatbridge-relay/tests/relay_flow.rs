use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chatbridge_relay::{
    app,
    config::Config,
    event::AttachmentRef,
    fetch::{AttachmentFetcher, FetchError},
    link::LinkManager,
    pump::{DeliveryPump, PumpError, PumpSettings},
    AppState,
};
use chatbridge_routing::{ContainerId, ConversationRouter, PlatformError, TargetPlatform};
use chatbridge_types::{Attachment, Direction, Envelope, Frame};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use tower::ServiceExt;

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const PNG_BASE64: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

#[derive(Debug, Clone)]
struct SentMessage {
    container: String,
    content: String,
    attachments: Vec<(String, String, usize)>,
}

#[derive(Default)]
struct MockPlatform {
    channels: Mutex<HashMap<String, String>>,
    sent: Mutex<Vec<SentMessage>>,
    /// Per-content artificial delay, to provoke reordering.
    delays: Mutex<HashMap<String, Duration>>,
}

impl MockPlatform {
    fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl TargetPlatform for MockPlatform {
    async fn find_container(&self, name: &str) -> Result<Option<ContainerId>, PlatformError> {
        Ok(self
            .channels
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .map(ContainerId))
    }

    async fn create_container(&self, name: &str) -> Result<ContainerId, PlatformError> {
        let mut channels = self.channels.lock().unwrap();
        let id = format!("chan-{}", channels.len() + 1);
        channels.insert(name.to_string(), id.clone());
        Ok(ContainerId(id))
    }

    async fn send(
        &self,
        container: &ContainerId,
        content: &str,
        attachments: &[Attachment],
    ) -> Result<(), PlatformError> {
        let delay = self.delays.lock().unwrap().get(content).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.sent.lock().unwrap().push(SentMessage {
            container: container.to_string(),
            content: content.to_string(),
            attachments: attachments
                .iter()
                .map(|a| (a.name.clone(), a.mime_type.clone(), a.len()))
                .collect(),
        });
        Ok(())
    }
}

/// Serves `https://cdn.test/<name>` from memory; anything else fails.
#[derive(Default)]
struct MockFetcher {
    files: HashMap<String, Vec<u8>>,
}

#[async_trait]
impl AttachmentFetcher for MockFetcher {
    async fn fetch(&self, reference: &AttachmentRef) -> Result<Attachment, FetchError> {
        let name = reference.url.trim_start_matches("https://cdn.test/");
        match self.files.get(name) {
            Some(bytes) => Ok(Attachment::new(
                reference.name.clone().unwrap_or_else(|| name.to_string()),
                reference
                    .content_type
                    .clone()
                    .unwrap_or_else(|| "application/octet-stream".to_string()),
                bytes.clone(),
            )),
            None => Err(FetchError::Status(404)),
        }
    }
}

struct Harness {
    addr: SocketAddr,
    platform: Arc<MockPlatform>,
    state: AppState,
}

async fn start(fetcher: MockFetcher) -> Harness {
    let platform = Arc::new(MockPlatform::default());
    let link = LinkManager::new();
    let pump = DeliveryPump::new(
        ConversationRouter::new(platform.clone()),
        Arc::new(fetcher),
        link.clone(),
        PumpSettings {
            self_id: Some("relay-bot".to_string()),
            request_timeout: Duration::from_secs(2),
            fetch_timeout: Duration::from_secs(2),
            lane_idle: Duration::from_secs(30),
        },
    );
    let state = AppState::new(link, pump, &Config::default());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app(state.clone());
    tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    Harness {
        addr,
        platform,
        state,
    }
}

async fn connect(addr: SocketAddr) -> Ws {
    let (ws, _) = connect_async(format!("ws://{}/ws", addr))
        .await
        .expect("failed to connect");
    ws
}

async fn send_json(ws: &mut Ws, value: Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .expect("failed to send frame");
}

async fn next_json(ws: &mut Ws) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("read error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("frame is not json");
        }
    }
}

async fn wait_for<F: Fn() -> bool>(cond: F) {
    for _ in 0..100 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not met in time");
}

async fn wait_connected(state: &AppState) {
    for _ in 0..100 {
        if state.link.is_connected().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("agent never attached");
}

async fn post_event(state: &AppState, body: Value) -> (StatusCode, Value) {
    let response = app(state.clone())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/platform/events")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn ping_is_answered_with_pong() {
    let harness = start(MockFetcher::default()).await;
    let mut ws = connect(harness.addr).await;

    send_json(&mut ws, json!({ "kind": "ping" })).await;
    assert_eq!(next_json(&mut ws).await, json!({ "kind": "pong" }));

    // Exactly one pong, and no conversation was touched.
    let extra = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
    assert!(extra.is_err(), "unexpected frame after pong: {:?}", extra);
    assert!(harness.platform.sent().is_empty());
    assert!(harness.platform.channels.lock().unwrap().is_empty());
}

#[tokio::test]
async fn forward_text_creates_container_and_sends() {
    let harness = start(MockFetcher::default()).await;
    let mut ws = connect(harness.addr).await;

    send_json(
        &mut ws,
        json!({
            "direction": "source_to_target",
            "type": "text",
            "sender": "Jane Doe",
            "content": "Hello there"
        }),
    )
    .await;

    let platform = harness.platform.clone();
    wait_for(|| !platform.sent().is_empty()).await;

    let sent = harness.platform.sent();
    assert_eq!(sent[0].container, "chan-1");
    assert_eq!(sent[0].content, "Hello there");
    assert!(harness.platform.channels.lock().unwrap().contains_key("jane-doe"));
}

#[tokio::test]
async fn forward_file_is_one_message_with_caption() {
    let harness = start(MockFetcher::default()).await;
    let mut ws = connect(harness.addr).await;

    send_json(
        &mut ws,
        json!({
            "direction": "source_to_target",
            "type": "file",
            "sender": "jane-doe",
            "content": "look",
            "files": [
                { "name": "a.png", "mime": "image/png", "base64": PNG_BASE64 },
                { "name": "b.png", "mime": "image/png", "base64": PNG_BASE64 }
            ]
        }),
    )
    .await;

    let platform = harness.platform.clone();
    wait_for(|| !platform.sent().is_empty()).await;

    let sent = harness.platform.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].content, "look");
    assert_eq!(sent[0].attachments.len(), 2);
    assert_eq!(sent[0].attachments[0].0, "a.png");
    assert_eq!(sent[0].attachments[0].1, "image/png");
}

#[tokio::test]
async fn same_conversation_is_delivered_in_order() {
    let harness = start(MockFetcher::default()).await;
    harness
        .platform
        .delays
        .lock()
        .unwrap()
        .insert("first".to_string(), Duration::from_millis(150));
    let mut ws = connect(harness.addr).await;

    for content in ["first", "second", "third"] {
        send_json(
            &mut ws,
            json!({
                "direction": "source_to_target",
                "type": "text",
                "sender": "jane-doe",
                "content": content
            }),
        )
        .await;
    }

    let platform = harness.platform.clone();
    wait_for(|| platform.sent().len() == 3).await;

    let order: Vec<_> = harness
        .platform
        .sent()
        .into_iter()
        .map(|m| m.content)
        .collect();
    assert_eq!(order, vec!["first", "second", "third"]);
    assert_eq!(harness.platform.channels.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn malformed_frames_are_dropped_and_link_survives() {
    let harness = start(MockFetcher::default()).await;
    let mut ws = connect(harness.addr).await;

    ws.send(Message::Text("not json".into())).await.unwrap();
    send_json(&mut ws, json!({ "direction": "sideways", "type": "text" })).await;
    send_json(
        &mut ws,
        json!({ "direction": "source_to_target", "type": "file", "sender": "x", "files": [] }),
    )
    .await;

    send_json(&mut ws, json!({ "kind": "ping" })).await;
    assert_eq!(next_json(&mut ws).await, json!({ "kind": "pong" }));
    assert!(harness.platform.sent().is_empty());
}

#[tokio::test]
async fn reverse_message_reaches_agent() {
    let fetcher = MockFetcher {
        files: HashMap::from([("report.pdf".to_string(), b"%PDF-1.4".to_vec())]),
    };
    let harness = start(fetcher).await;
    let mut ws = connect(harness.addr).await;
    wait_connected(&harness.state).await;

    let (status, body) = post_event(
        &harness.state,
        json!({
            "author": { "id": "operator" },
            "container": { "id": "chan-1", "name": "jane-doe" },
            "content": "see attached",
            "attachments": [
                { "url": "https://cdn.test/report.pdf", "filename": "report.pdf", "contentType": "application/pdf" },
                { "url": "https://cdn.test/missing.png" }
            ]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["queued"], true);

    let frame = next_json(&mut ws).await;
    assert_eq!(frame["direction"], "target_to_source");
    assert_eq!(frame["type"], "file");
    assert_eq!(frame["recipient"], "jane-doe");
    assert_eq!(frame["content"], "see attached");
    let files = frame["files"].as_array().unwrap();
    assert_eq!(files.len(), 1, "failed fetch must be skipped");
    assert_eq!(files[0]["name"], "report.pdf");
    assert_eq!(files[0]["mime"], "application/pdf");

    match Frame::decode(&frame.to_string()).unwrap() {
        Frame::Envelope(envelope) => {
            assert_eq!(&*envelope.attachments[0].payload, b"%PDF-1.4");
        }
        other => panic!("unexpected frame {:?}", other),
    }
}

#[tokio::test]
async fn reverse_message_degrades_to_text_when_all_fetches_fail() {
    let harness = start(MockFetcher::default()).await;
    let mut ws = connect(harness.addr).await;
    wait_connected(&harness.state).await;

    post_event(
        &harness.state,
        json!({
            "author": { "id": "operator" },
            "container": { "id": "chan-1", "name": "Jane Doe" },
            "content": "photo",
            "attachments": [{ "url": "https://cdn.test/gone.png" }]
        }),
    )
    .await;

    let frame = next_json(&mut ws).await;
    assert_eq!(frame["type"], "text");
    assert_eq!(frame["recipient"], "jane-doe");
    assert_eq!(frame["content"], "photo");
}

#[tokio::test]
async fn own_and_bot_messages_are_not_echoed() {
    let harness = start(MockFetcher::default()).await;

    let (status, body) = post_event(
        &harness.state,
        json!({
            "author": { "id": "relay-bot" },
            "container": { "id": "chan-1", "name": "jane-doe" },
            "content": "echo"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reason"], "own message");

    let (_, body) = post_event(
        &harness.state,
        json!({
            "author": { "id": "other", "bot": true },
            "container": { "id": "chan-1", "name": "jane-doe" },
            "content": "beep"
        }),
    )
    .await;
    assert_eq!(body["queued"], false);
    assert_eq!(body["reason"], "bot author");
}

#[tokio::test]
async fn new_connection_supersedes_old_one() {
    let harness = start(MockFetcher::default()).await;
    let mut old = connect(harness.addr).await;
    wait_connected(&harness.state).await;
    let mut new = connect(harness.addr).await;

    // The old socket is closed by the relay.
    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match old.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "superseded socket was not closed");

    // The new session is live and receives reverse traffic.
    send_json(&mut new, json!({ "kind": "ping" })).await;
    assert_eq!(next_json(&mut new).await, json!({ "kind": "pong" }));

    let envelope = Envelope::text(Direction::TargetToSource, "jane-doe", "hi");
    assert!(
        harness
            .state
            .link
            .send(Frame::Envelope(envelope).encode().unwrap())
            .await
    );
    assert_eq!(next_json(&mut new).await["content"], "hi");
}

#[tokio::test]
async fn reverse_message_without_agent_is_dropped() {
    let harness = start(MockFetcher::default()).await;
    let (status, _) = post_event(
        &harness.state,
        json!({
            "author": { "id": "operator" },
            "container": { "id": "chan-1", "name": "jane-doe" },
            "content": "anyone?"
        }),
    )
    .await;
    // Accepted for processing; the pump logs and drops it.
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(!harness.state.link.is_connected().await);
}

#[tokio::test]
async fn health_reports_agent_presence() {
    let harness = start(MockFetcher::default()).await;

    let health = |state: AppState| async move {
        let response = app(state)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice::<Value>(&bytes).unwrap()
    };

    assert_eq!(health(harness.state.clone()).await["agentConnected"], false);
    let _ws = connect(harness.addr).await;
    wait_connected(&harness.state).await;
    let json = health(harness.state.clone()).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["agentConnected"], true);
}

/// Never answers container lookups.
struct StalledPlatform;

#[async_trait]
impl TargetPlatform for StalledPlatform {
    async fn find_container(&self, _name: &str) -> Result<Option<ContainerId>, PlatformError> {
        futures_util::future::pending().await
    }

    async fn create_container(&self, _name: &str) -> Result<ContainerId, PlatformError> {
        futures_util::future::pending().await
    }

    async fn send(
        &self,
        _container: &ContainerId,
        _content: &str,
        _attachments: &[Attachment],
    ) -> Result<(), PlatformError> {
        Ok(())
    }
}

#[tokio::test]
async fn stalled_container_lookup_times_out() {
    let pump = DeliveryPump::new(
        ConversationRouter::new(Arc::new(StalledPlatform)),
        Arc::new(MockFetcher::default()),
        LinkManager::new(),
        PumpSettings {
            request_timeout: Duration::from_millis(100),
            ..PumpSettings::default()
        },
    );

    let envelope = Envelope::text(Direction::SourceToTarget, "Jane Doe", "hello");
    let result = tokio::time::timeout(Duration::from_secs(2), pump.deliver_to_target(envelope))
        .await
        .expect("container resolution was not bounded");

    assert!(
        matches!(result, Err(PumpError::Platform(PlatformError::Timeout(_)))),
        "unexpected result: {:?}",
        result
    );
}
