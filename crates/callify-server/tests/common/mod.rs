#![allow(dead_code)]

use callify_common::ServerEvent;
use callify_server::config::ServerConfig;
use callify_server::server::ServerState;
use callify_server::store::{MemoryStore, RoomStore};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub const ORIGIN: &str = "http://localhost:3000";

pub fn test_config(listen: SocketAddr) -> ServerConfig {
    ServerConfig {
        listen,
        metrics_addr: "127.0.0.1:0".parse().unwrap(),
        allowed_origin: ORIGIN.to_string(),
        store_dir: None,
        store_timeout_ms: 500,
        max_conns: 64,
        max_message_size: 64 * 1024,
        outbox_capacity: 64,
        ping_interval: 30,
        idle_timeout: 120,
    }
}

pub struct TestClient {
    pub ws_tx: futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>,
    pub ws_rx: futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>,
}

impl TestClient {
    pub async fn connect(addr: &SocketAddr) -> Self {
        let mut req = format!("ws://{addr}").into_client_request().unwrap();
        req.headers_mut().insert("Origin", ORIGIN.parse().unwrap());
        req.headers_mut()
            .insert("Sec-WebSocket-Protocol", "callify.v1".parse().unwrap());
        let (ws, _) = tokio_tungstenite::connect_async(req).await.unwrap();
        let (ws_tx, ws_rx) = ws.split();
        Self { ws_tx, ws_rx }
    }

    /// Connect and join `room`, consuming the join acknowledgement.
    pub async fn joined(addr: &SocketAddr, peer: &str, name: &str, room: &str) -> Self {
        let mut client = Self::connect(addr).await;
        client
            .send("join", json!({"uuid": peer, "displayName": name, "room": room}))
            .await;
        match client.recv().await {
            ServerEvent::JoinSuccess(ack) => assert_eq!(ack.uuid, peer),
            other => panic!("expected join-success, got {other:?}"),
        }
        client
    }

    pub async fn send(&mut self, event: &str, data: Value) {
        self.send_raw(json!({"event": event, "data": data}).to_string())
            .await;
    }

    pub async fn send_raw(&mut self, text: String) {
        self.ws_tx.send(Message::Text(text)).await.unwrap();
    }

    pub async fn recv(&mut self) -> ServerEvent {
        self.recv_timeout(Duration::from_secs(5))
            .await
            .expect("timeout waiting for envelope")
    }

    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<ServerEvent> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let msg = tokio::time::timeout_at(deadline, self.ws_rx.next())
                .await
                .ok()?
                .expect("connection closed")
                .unwrap();
            match msg {
                Message::Text(text) => return Some(serde_json::from_str(&text).unwrap()),
                Message::Ping(_) | Message::Pong(_) => {}
                other => panic!("expected text frame, got {other:?}"),
            }
        }
    }

    /// Assert nothing arrives for a short while.
    pub async fn assert_silent(&mut self) {
        if let Some(event) = self.recv_timeout(Duration::from_millis(200)).await {
            panic!("expected no envelope, got {event:?}");
        }
    }

    pub async fn close(mut self) {
        let _ = self.ws_tx.send(Message::Close(None)).await;
    }
}

pub async fn start_server() -> (SocketAddr, Arc<ServerState>) {
    start_server_with_store(Arc::new(MemoryStore::new())).await
}

pub async fn start_server_with_store(store: Arc<dyn RoomStore>) -> (SocketAddr, Arc<ServerState>) {
    start_server_with(store, |_| {}).await
}

pub async fn start_server_with_config(
    tweak: impl FnOnce(&mut ServerConfig),
) -> (SocketAddr, Arc<ServerState>) {
    start_server_with(Arc::new(MemoryStore::new()), tweak).await
}

async fn start_server_with(
    store: Arc<dyn RoomStore>,
    tweak: impl FnOnce(&mut ServerConfig),
) -> (SocketAddr, Arc<ServerState>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let mut config = test_config(addr);
    tweak(&mut config);
    let state = Arc::new(ServerState::new(config, store));

    let state_clone = state.clone();
    tokio::spawn(async move {
        if let Err(e) = callify_server::run(listener, state_clone).await {
            eprintln!("server error in test: {e}");
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    (addr, state)
}

/// Poll until `cond` holds or a few seconds pass.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached");
}
