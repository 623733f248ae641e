#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use lobby_core::net::bus::BusMessage;
use lobby_core::net::messages::{ClientMessage, ServerMessage};
use lobby_core::net::protocol::{decode_server_message, encode_client_message};
use lobby_core::test_helpers::node_announcement;

use lobby_node::bus::{LocalBus, MessageBus};
use lobby_node::config::{AuthFileConfig, LobbyConfig};
use lobby_node::handoff::{LOBBY_AUDIENCE, LobbyClaims, TokenSigner};
use lobby_node::lobby::{Lobby, SharedLobby};
use lobby_node::state::AppState;
use lobby_node::store::{GameStore, MemoryGameStore, spawn_store_writer};
use lobby_node::{build_app, spawn_background};

pub const TEST_SECRET: &str = "integration-secret";
pub const TEST_ISSUER: &str = "lobby";

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Config for a lobby node named `node_name` signing with [`TEST_SECRET`].
pub fn test_config(node_name: &str) -> LobbyConfig {
    LobbyConfig {
        node_name: node_name.to_string(),
        listen_addr: "127.0.0.1:0".to_string(),
        auth: AuthFileConfig {
            token_secret: TEST_SECRET.to_string(),
            issuer: TEST_ISSUER.to_string(),
            ..AuthFileConfig::default()
        },
        ..LobbyConfig::default()
    }
}

/// Build a node on `bus` with an in-memory store and start its background tasks.
fn build_node(
    config: LobbyConfig,
    bus: Arc<LocalBus>,
) -> (axum::Router, AppState, Arc<MemoryGameStore>) {
    let store = Arc::new(MemoryGameStore::new());
    let (handle, _task) = spawn_store_writer(Arc::clone(&store) as Arc<dyn GameStore>);
    let (app, state) = build_app(config, bus as Arc<dyn MessageBus>, handle);
    spawn_background(&state);
    (app, state, store)
}

/// A lobby node with background tasks running but no HTTP listener.
pub struct TestNode {
    pub state: AppState,
    pub store: Arc<MemoryGameStore>,
}

impl TestNode {
    pub fn start(config: LobbyConfig, bus: Arc<LocalBus>) -> Self {
        let (_app, state, store) = build_node(config, bus);
        Self { state, store }
    }

    pub fn lobby(&self) -> &SharedLobby {
        &self.state.lobby
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub bus: Arc<LocalBus>,
    pub state: AppState,
    pub store: Arc<MemoryGameStore>,
    _shutdown: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Start a test server with no REST auth.
    pub async fn new() -> Self {
        Self::from_config(test_config("lobby-test")).await
    }

    /// Start a test server whose REST API requires `token`.
    pub async fn with_auth(token: &str) -> Self {
        let mut config = test_config("lobby-test");
        config.auth.bearer_token = Some(token.to_string());
        Self::from_config(config).await
    }

    pub async fn from_config(config: LobbyConfig) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let bus = Arc::new(LocalBus::new());
        let (app, state, store) = build_node(config, Arc::clone(&bus));

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Give the server a moment to start accepting
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            addr,
            bus,
            state,
            store,
            _shutdown: handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// WebSocket URL, authenticated as `name` when given.
    pub fn ws_url(&self, name: Option<&str>) -> String {
        match name {
            Some(name) => format!(
                "ws://{}/ws?access_token={}",
                self.addr,
                lobby_token(name, &[])
            ),
            None => format!("ws://{}/ws", self.addr),
        }
    }

    /// Publish an execution-node hello on this server's bus and wait until the
    /// lobby has applied it.
    pub async fn announce_node(&self, name: &str, port: u16) {
        let envelope = BusMessage::NodeHello(node_announcement(name, port))
            .encode(name)
            .unwrap();
        self.bus.publish(envelope).unwrap();
        let name = name.to_string();
        eventually(&self.state.lobby, move |lobby| lobby.nodes().get(&name).is_some()).await;
    }
}

/// A signed lobby token for `name` blocking `blocked`.
pub fn lobby_token(name: &str, blocked: &[&str]) -> String {
    let claims = LobbyClaims {
        name: name.to_string(),
        block_list: blocked.iter().map(|b| b.to_string()).collect(),
        user_data: String::new(),
    };
    TokenSigner::new(TEST_SECRET, TEST_ISSUER)
        .sign(claims, LOBBY_AUDIENCE, Duration::from_secs(60))
        .unwrap()
}

/// Poll `check` against the lobby until it holds (5s timeout).
pub async fn eventually(lobby: &SharedLobby, check: impl Fn(&Lobby) -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if check(&*lobby.read().await) {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "Timed out waiting for lobby state"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Connect a WebSocket client to the given URL.
pub async fn ws_connect(url: &str) -> WsStream {
    let (stream, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    stream
}

/// Connect as `name` and consume the initial user and game lists.
pub async fn ws_login(server: &TestServer, name: &str) -> WsStream {
    let mut stream = ws_connect(&server.ws_url(Some(name))).await;
    match ws_read_server_msg(&mut stream).await {
        ServerMessage::UserList(_) => {},
        other => panic!("Expected UserList, got: {other:?}"),
    }
    match ws_read_server_msg(&mut stream).await {
        ServerMessage::GameList(_) => {},
        other => panic!("Expected GameList, got: {other:?}"),
    }
    stream
}

/// Read raw binary data from a WebSocket stream (5s timeout).
pub async fn ws_read_raw(stream: &mut WsStream) -> Vec<u8> {
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Binary(data))) => return data.to_vec(),
                Some(Ok(Message::Close(_))) => panic!("WebSocket closed unexpectedly"),
                Some(Err(e)) => panic!("WebSocket error: {e}"),
                None => panic!("WebSocket stream ended"),
                _ => continue,
            }
        }
    })
    .await
    .expect("Timed out waiting for WebSocket message")
}

/// Try to read raw binary data, returning None on timeout.
pub async fn ws_try_read_raw(stream: &mut WsStream, timeout_ms: u64) -> Option<Vec<u8>> {
    let deadline = Duration::from_millis(timeout_ms);
    tokio::time::timeout(deadline, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Binary(data))) => return data.to_vec(),
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    panic!("WebSocket error or closed")
                },
                _ => continue,
            }
        }
    })
    .await
    .ok()
}

/// Read the next ServerMessage from a WebSocket stream (5s timeout).
pub async fn ws_read_server_msg(stream: &mut WsStream) -> ServerMessage {
    let data = ws_read_raw(stream).await;
    decode_server_message(&data).unwrap()
}

/// Read messages until one satisfies `pred`, discarding the rest.
pub async fn ws_read_until(
    stream: &mut WsStream,
    pred: impl Fn(&ServerMessage) -> bool,
) -> ServerMessage {
    loop {
        let msg = ws_read_server_msg(stream).await;
        if pred(&msg) {
            return msg;
        }
    }
}

/// Send a ClientMessage from a WS stream.
pub async fn ws_send_client_msg(stream: &mut WsStream, msg: &ClientMessage) {
    let encoded = encode_client_message(msg).unwrap();
    stream.send(Message::Binary(encoded.into())).await.unwrap();
}
