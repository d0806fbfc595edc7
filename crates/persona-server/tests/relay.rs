//! End-to-end relay tests over a real WebSocket.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use persona_core::{CharacterId, ContentProvider};
use persona_integrations::LogMailer;
use persona_llm::{MockProvider, MockResponse, OfflineProvider};
use persona_server::server::{start, ServerHandle, Services};
use persona_server::ServerConfig;
use persona_store::{CharacterRepo, Database};

const TIMEOUT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(300);

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct TestServer {
    handle: ServerHandle,
    repo: CharacterRepo,
}

impl TestServer {
    fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.handle.addr())
    }

    fn http_url(&self, path: &str) -> String {
        format!("http://{}{path}", self.handle.addr())
    }
}

async fn boot_with(provider: Arc<dyn ContentProvider>, tweak: impl FnOnce(&mut ServerConfig)) -> TestServer {
    let db = Database::in_memory().unwrap();
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO characters (id, name, role, description, progress)
             VALUES (42, 'Julian Carter', 'Protagonist', 'A brooding young scholar', 40)",
            [],
        )?;
        Ok(())
    })
    .unwrap();

    let mut config = ServerConfig {
        port: 0,
        ..Default::default()
    };
    tweak(&mut config);

    let services = Services {
        db: db.clone(),
        provider,
        exporter: None,
        mailer: Arc::new(LogMailer),
    };
    let handle = start(config, services).await.unwrap();
    TestServer {
        handle,
        repo: CharacterRepo::new(db),
    }
}

async fn boot() -> TestServer {
    boot_with(Arc::new(OfflineProvider::new()), |_| {}).await
}

async fn connect(server: &TestServer) -> WsStream {
    let (ws, _) = connect_async(server.ws_url()).await.unwrap();
    ws
}

async fn send(ws: &mut WsStream, frame: Value) {
    ws.send(Message::text(frame.to_string())).await.unwrap();
}

async fn read_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for frame")
            .expect("stream closed")
            .expect("ws error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Assert no text frame arrives within a short window.
async fn assert_quiet(ws: &mut WsStream) {
    let deadline = tokio::time::Instant::now() + QUIET;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match timeout(remaining, ws.next()).await {
            Err(_) => return,
            Ok(Some(Ok(Message::Text(text)))) => panic!("unexpected frame: {text}"),
            Ok(Some(Ok(_))) => continue,
            Ok(other) => panic!("connection ended: {other:?}"),
        }
    }
}

/// Join and wait until the server has processed it. Frames on one
/// connection are handled in order, so the pong proves the join landed.
async fn join(ws: &mut WsStream, id: Value) {
    send(ws, json!({"type": "join", "characterId": id})).await;
    send(ws, json!({"type": "ping"})).await;
    assert_eq!(read_json(ws).await["type"], "pong");
}

#[tokio::test]
async fn update_fans_out_to_every_member() {
    let server = boot().await;
    let mut a = connect(&server).await;
    let mut b = connect(&server).await;
    join(&mut a, json!("42")).await;
    join(&mut b, json!("42")).await;

    send(
        &mut a,
        json!({"type": "update", "characterId": "42", "characterData": {"progress": 50}}),
    )
    .await;

    let first = read_json(&mut a).await;
    assert_eq!(first["type"], "character-updated");
    assert_eq!(first["character"]["progress"], 50);
    assert_eq!(first["character"]["name"], "Julian Carter");
    let second = read_json(&mut a).await;
    assert_eq!(second["type"], "update-success");
    assert_eq!(second["message"], "Character updated successfully");

    let seen = read_json(&mut b).await;
    assert_eq!(seen["type"], "character-updated");
    assert_eq!(seen["character"]["progress"], 50);
    assert_quiet(&mut b).await;

    let stored = server.repo.get(CharacterId::new(42)).unwrap();
    assert_eq!(stored.progress, 50);
    assert_eq!(stored.description.as_deref(), Some("A brooding young scholar"));

    server.handle.shutdown().await;
}

#[tokio::test]
async fn update_does_not_leak_to_other_sessions() {
    let server = boot().await;
    let mut a = connect(&server).await;
    let mut outsider = connect(&server).await;
    join(&mut a, json!(42)).await;
    join(&mut outsider, json!(43)).await;

    send(
        &mut a,
        json!({"type": "update", "characterId": 42, "characterData": {"name": "Foo"}}),
    )
    .await;
    assert_eq!(read_json(&mut a).await["type"], "character-updated");
    assert_eq!(read_json(&mut a).await["type"], "update-success");
    assert_quiet(&mut outsider).await;
    assert_eq!(server.repo.get(CharacterId::new(42)).unwrap().name, "Foo");

    server.handle.shutdown().await;
}

#[tokio::test]
async fn update_with_null_clears_field() {
    let server = boot().await;
    let mut a = connect(&server).await;
    join(&mut a, json!(42)).await;

    send(
        &mut a,
        json!({"type": "update", "characterId": 42, "characterData": {"description": null}}),
    )
    .await;
    let frame = read_json(&mut a).await;
    assert_eq!(frame["type"], "character-updated");
    assert_eq!(frame["character"]["description"], Value::Null);
    assert_eq!(frame["character"]["progress"], 40);
    assert_eq!(read_json(&mut a).await["type"], "update-success");

    let stored = server.repo.get(CharacterId::new(42)).unwrap();
    assert_eq!(stored.description, None);
    assert_eq!(stored.name, "Julian Carter");

    server.handle.shutdown().await;
}

#[tokio::test]
async fn chat_to_missing_character() {
    let server = boot().await;
    let mut a = connect(&server).await;
    join(&mut a, json!("7")).await;

    send(&mut a, json!({"type": "chat", "characterId": "7", "message": "hi"})).await;
    let frame = read_json(&mut a).await;
    assert_eq!(frame, json!({"type": "error", "message": "Character not found"}));
    assert_quiet(&mut a).await;

    server.handle.shutdown().await;
}

#[tokio::test]
async fn chat_reply_goes_to_sender_only() {
    let provider = Arc::new(MockProvider::new(vec![MockResponse::text("Knowledge is a lantern.")]));
    let server = boot_with(provider.clone(), |_| {}).await;
    let mut a = connect(&server).await;
    let mut b = connect(&server).await;
    join(&mut a, json!(42)).await;
    join(&mut b, json!(42)).await;
    let before = server.repo.get(CharacterId::new(42)).unwrap();

    send(&mut a, json!({"type": "chat", "characterId": 42, "message": "What drives you?"})).await;
    let frame = read_json(&mut a).await;
    assert_eq!(frame["type"], "chat-response");
    assert_eq!(frame["characterId"], "42");
    assert_eq!(frame["originalMessage"], "What drives you?");
    assert_eq!(frame["response"], "Knowledge is a lantern.");
    assert!(frame["timestamp"].is_string());
    assert_quiet(&mut b).await;

    assert_eq!(server.repo.get(CharacterId::new(42)).unwrap(), before);
    assert!(provider.calls()[0].system.contains("Julian Carter"));

    server.handle.shutdown().await;
}

#[tokio::test]
async fn ping_gets_one_pong() {
    let server = boot().await;
    let mut a = connect(&server).await;
    join(&mut a, json!(42)).await;

    send(&mut a, json!({"type": "ping"})).await;
    assert_eq!(read_json(&mut a).await, json!({"type": "pong"}));
    assert_quiet(&mut a).await;
    assert_eq!(server.handle.registry().members(CharacterId::new(42)).len(), 1);

    server.handle.shutdown().await;
}

#[tokio::test]
async fn garbage_frame_errors_only_the_sender() {
    let server = boot().await;
    let mut a = connect(&server).await;
    let mut b = connect(&server).await;
    join(&mut a, json!(42)).await;
    join(&mut b, json!(42)).await;

    a.send(Message::text("this is not json")).await.unwrap();
    let frame = read_json(&mut a).await;
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["message"], "Invalid message format");
    assert_quiet(&mut a).await;
    assert_quiet(&mut b).await;

    // The connection is still usable.
    send(&mut a, json!({"type": "ping"})).await;
    assert_eq!(read_json(&mut a).await["type"], "pong");
    assert_eq!(server.handle.registry().members(CharacterId::new(42)).len(), 2);

    server.handle.shutdown().await;
}

#[tokio::test]
async fn rejoin_moves_between_sessions() {
    let server = boot().await;
    let mut a = connect(&server).await;
    join(&mut a, json!(1)).await;
    join(&mut a, json!(42)).await;

    let registry = server.handle.registry();
    assert!(registry.members(CharacterId::new(1)).is_empty());
    assert_eq!(registry.members(CharacterId::new(42)).len(), 1);
    assert_eq!(registry.session_count(), 1);

    server.handle.shutdown().await;
}

#[tokio::test]
async fn disconnect_prunes_session() {
    let server = boot().await;
    let mut a = connect(&server).await;
    join(&mut a, json!(42)).await;
    assert_eq!(server.handle.registry().session_count(), 1);

    a.close(None).await.unwrap();
    drop(a);

    let registry = Arc::clone(server.handle.registry());
    timeout(TIMEOUT, async {
        while registry.connection_count() > 0 || registry.session_count() > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("connection was not cleaned up");

    server.handle.shutdown().await;
}

#[tokio::test]
async fn slow_provider_hits_deadline() {
    let provider = Arc::new(MockProvider::new(vec![MockResponse::delayed(
        Duration::from_secs(10),
        MockResponse::text("too late"),
    )]));
    let server = boot_with(provider, |config| config.provider_timeout_secs = 1).await;
    let mut a = connect(&server).await;

    send(&mut a, json!({"type": "chat", "characterId": 42, "message": "hello?"})).await;
    let frame = read_json(&mut a).await;
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["message"], "The character took too long to respond");

    send(&mut a, json!({"type": "ping"})).await;
    assert_eq!(read_json(&mut a).await["type"], "pong");

    server.handle.shutdown().await;
}

#[tokio::test]
async fn silent_client_is_closed_by_heartbeat() {
    let server = boot_with(Arc::new(OfflineProvider::new()), |config| {
        config.heartbeat_interval_secs = 1;
        config.heartbeat_timeout_secs = 1;
    })
    .await;
    let mut a = connect(&server).await;
    join(&mut a, json!(42)).await;

    // Not reading means tungstenite never answers the server's pings.
    tokio::time::sleep(Duration::from_secs(4)).await;

    let registry = Arc::clone(server.handle.registry());
    assert_eq!(registry.connection_count(), 0);
    assert_eq!(registry.session_count(), 0);

    let closed = timeout(TIMEOUT, async {
        loop {
            match a.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok());

    server.handle.shutdown().await;
}

#[tokio::test]
async fn stalled_handshake_is_dropped() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let server = boot_with(Arc::new(OfflineProvider::new()), |config| {
        config.handshake_timeout_secs = 1;
    })
    .await;

    let mut stream = tokio::net::TcpStream::connect(server.handle.addr()).await.unwrap();
    stream
        .write_all(b"GET /ws HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\n")
        .await
        .unwrap();

    // The request head never completes, so the server hangs up on its own.
    let mut rest = Vec::new();
    let finished = timeout(TIMEOUT, stream.read_to_end(&mut rest)).await;
    assert!(finished.is_ok());
    assert!(!String::from_utf8_lossy(&rest).contains("101"));
    assert_eq!(server.handle.registry().connection_count(), 0);

    server.handle.shutdown().await;
}

#[tokio::test]
async fn health_counts_live_sessions() {
    let server = boot().await;
    let mut a = connect(&server).await;
    join(&mut a, json!(42)).await;

    let body: Value = reqwest::get(server.http_url("/health")).await.unwrap().json().await.unwrap();
    assert_eq!(body, json!({"status": "healthy", "sessions": 1, "connections": 1}));

    server.handle.shutdown().await;
}

#[tokio::test]
async fn rest_patch_reaches_relay_members() {
    let server = boot().await;
    let mut a = connect(&server).await;
    join(&mut a, json!(42)).await;

    let response = reqwest::Client::new()
        .patch(server.http_url("/api/characters/42"))
        .json(&json!({"voice": "Soft and deliberate"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let frame = read_json(&mut a).await;
    assert_eq!(frame["type"], "character-updated");
    assert_eq!(frame["character"]["voice"], "Soft and deliberate");

    server.handle.shutdown().await;
}

#[tokio::test]
async fn shutdown_closes_open_sockets() {
    let server = boot().await;
    let mut a = connect(&server).await;
    join(&mut a, json!(42)).await;

    server.handle.shutdown().await;

    let closed = timeout(TIMEOUT, async {
        loop {
            match a.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok());
}
