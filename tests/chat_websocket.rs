//! Chat over a real websocket, through the axum router

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use livegate::chat::{ChatConfig, Emotes};
use livegate::http::{HttpConfig, HttpServer};
use livegate::shutdown::{self, ShutdownTrigger};
use livegate::{ChatRoom, RelayConfig, StreamRegistry, StreamStats};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Server {
    url: String,
    chat: Arc<ChatRoom>,
    trigger: ShutdownTrigger,
    task: JoinHandle<std::io::Result<()>>,
}

async fn start_server(join_timeout: Duration) -> Server {
    let stats = Arc::new(StreamStats::new());
    let chat = Arc::new(ChatRoom::with_emotes(
        ChatConfig::default(),
        "hunter2".into(),
        Emotes::default(),
        Arc::clone(&stats),
    ));
    let registry = Arc::new(StreamRegistry::new("secret", RelayConfig::default(), stats));
    let (trigger, token) = shutdown::channel();

    let config = HttpConfig {
        join_timeout,
        ..HttpConfig::default()
    }
    .bind(SocketAddr::from(([127, 0, 0, 1], 0)));
    let server = HttpServer::new(config, Arc::clone(&chat), registry, token);
    let listener = server.bind().await.unwrap();
    let addr = listener.local_addr().unwrap();
    let task = tokio::spawn(server.serve(listener));

    Server {
        url: format!("ws://{addr}/ws"),
        chat,
        trigger,
        task,
    }
}

async fn connect(server: &Server) -> Ws {
    let (ws, _) = tokio_tungstenite::connect_async(server.url.as_str())
        .await
        .unwrap();
    ws
}

async fn send_frame(ws: &mut Ws, frame: Value) {
    ws.send(WsMessage::Text(frame.to_string())).await.unwrap();
}

async fn join(ws: &mut Ws, name: &str) {
    send_frame(ws, json!({"type": "join", "name": name})).await;
}

/// Next chat event, skipping control frames
async fn next_event(ws: &mut Ws) -> Value {
    loop {
        let message = timeout(Duration::from_secs(3), ws.next())
            .await
            .expect("no event in time")
            .expect("socket closed")
            .unwrap();
        match message {
            WsMessage::Text(text) => return serde_json::from_str(&text).unwrap(),
            WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
            other => panic!("unexpected frame {other:?}"),
        }
    }
}

async fn expect_closed(ws: &mut Ws) {
    loop {
        match timeout(Duration::from_secs(3), ws.next())
            .await
            .expect("socket left open")
        {
            Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => return,
            Some(Ok(WsMessage::Text(text))) => panic!("unexpected event {text}"),
            Some(Ok(_)) => continue,
        }
    }
}

#[tokio::test]
async fn join_chat_and_shut_down() {
    let server = start_server(Duration::from_secs(30)).await;

    let mut alice = connect(&server).await;
    join(&mut alice, "alice").await;
    let welcome = next_event(&mut alice).await;
    assert_eq!(welcome["type"], "welcome");
    assert_eq!(welcome["name"], "alice");
    assert_eq!(welcome["role"], "user");

    // A taken name is refused and the socket may try again
    let mut bob = connect(&server).await;
    join(&mut bob, "ALICE").await;
    let refused = next_event(&mut bob).await;
    assert_eq!(refused["type"], "error");
    assert!(refused["text"].as_str().unwrap().contains("already taken"));

    join(&mut bob, "bob").await;
    let welcome = next_event(&mut bob).await;
    assert_eq!(welcome["type"], "welcome");
    assert_eq!(welcome["users"], json!(["alice", "bob"]));

    let joined = next_event(&mut alice).await;
    assert_eq!(joined["type"], "joined");
    assert_eq!(joined["name"], "bob");

    // Malformed frames and late joins are ignored, messages reach everyone
    bob.send(WsMessage::Text("not json".into())).await.unwrap();
    join(&mut bob, "robert").await;
    send_frame(&mut bob, json!({"type": "message", "text": "hello <b>all</b>"})).await;
    for ws in [&mut alice, &mut bob] {
        let message = next_event(ws).await;
        assert_eq!(message["type"], "message");
        assert_eq!(message["from"], "bob");
        assert_eq!(message["text"], "hello &lt;b&gt;all&lt;/b&gt;");
    }

    // Command answers go to the sender only
    send_frame(&mut alice, json!({"type": "message", "text": "/help"})).await;
    assert_eq!(next_event(&mut alice).await["type"], "reply");

    server.trigger.trigger();
    for ws in [&mut alice, &mut bob] {
        let notice = next_event(ws).await;
        assert_eq!(notice["type"], "shutdown");
        expect_closed(ws).await;
    }

    timeout(Duration::from_secs(3), server.task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(server.chat.is_closed().await);
}

#[tokio::test]
async fn silent_socket_is_closed_after_join_timeout() {
    let server = start_server(Duration::from_millis(300)).await;

    let mut silent = connect(&server).await;
    expect_closed(&mut silent).await;
    assert!(server.chat.users().await.is_empty());

    // A socket that joins in time is unaffected
    let mut carol = connect(&server).await;
    join(&mut carol, "carol").await;
    assert_eq!(next_event(&mut carol).await["type"], "welcome");
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(server.chat.users().await, vec!["carol".to_string()]);

    server.trigger.trigger();
    assert_eq!(next_event(&mut carol).await["type"], "shutdown");
    expect_closed(&mut carol).await;
}

#[tokio::test]
async fn closing_the_socket_leaves_the_room() {
    let server = start_server(Duration::from_secs(30)).await;

    let mut alice = connect(&server).await;
    join(&mut alice, "alice").await;
    next_event(&mut alice).await;

    let mut dave = connect(&server).await;
    join(&mut dave, "dave").await;
    next_event(&mut dave).await;
    assert_eq!(next_event(&mut alice).await["type"], "joined");

    dave.close(None).await.unwrap();
    let left = next_event(&mut alice).await;
    assert_eq!(left["type"], "left");
    assert_eq!(left["name"], "dave");
    assert_eq!(server.chat.users().await, vec!["alice".to_string()]);

    server.trigger.trigger();
    assert_eq!(next_event(&mut alice).await["type"], "shutdown");
}
