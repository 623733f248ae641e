use std::sync::Arc;
use std::sync::atomic::Ordering;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use lobby_core::net::messages::{ClientMessage, ServerMessage};
use lobby_core::net::protocol::{MAX_MESSAGE_SIZE, decode_client_message};
use lobby_core::user::User;

use crate::error::LobbyResult;
use crate::handoff::LobbyClaims;
use crate::hub::Outbound;
use crate::lobby::Lobby;
use crate::state::{AppState, ConnectionGuard};

/// Reason sent to anonymous connections that try to act.
const LOGIN_REQUIRED: &str = "You must be logged in to do that.";

#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    pub access_token: Option<String>,
}

pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    ws: WebSocketUpgrade,
) -> Result<Response, StatusCode> {
    let max_ws = state.config.limits.max_ws_connections;
    let current = state.ws_connection_count.load(Ordering::Relaxed);
    if current >= max_ws {
        tracing::warn!(current, max = max_ws, "WS connection limit reached");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    let claims = match params.access_token.as_deref() {
        Some(token) => {
            let verified = state.lobby.read().await.authenticate(token);
            match verified {
                Ok(claims) => Some(claims),
                Err(e) => {
                    tracing::warn!(error = %e, "Rejected lobby token");
                    return Err(StatusCode::UNAUTHORIZED);
                },
            }
        },
        None => None,
    };

    Ok(ws
        .on_upgrade(move |socket| handle_socket(socket, state, claims))
        .into_response())
}

fn user_from_claims(connection_id: &str, claims: LobbyClaims) -> User {
    let mut user = User::new(connection_id, claims.name).with_blocked(claims.block_list);
    user.user_data = claims.user_data;
    user
}

async fn handle_socket(socket: WebSocket, state: AppState, claims: Option<LobbyClaims>) {
    let _guard = ConnectionGuard::new(Arc::clone(&state.ws_connection_count));
    let connection_id = uuid::Uuid::new_v4().to_string();
    let (ws_sender, mut ws_receiver) = socket.split();

    let (tx, rx) = mpsc::channel::<Bytes>(state.config.limits.client_message_buffer);
    state.hub.write().await.register(connection_id.clone(), tx);
    spawn_writer(ws_sender, rx);

    let (registered, welcome) = {
        let mut lobby = state.lobby.write().await;
        let registered = match claims {
            Some(claims) => match lobby.register_user(user_from_claims(&connection_id, claims)) {
                Ok(_) => true,
                Err(e) => {
                    tracing::warn!(%connection_id, error = %e, "Failed to register user");
                    false
                },
            },
            None => false,
        };
        (registered, lobby.welcome(&connection_id))
    };
    state.hub.read().await.deliver(&welcome);
    tracing::info!(%connection_id, registered, "Client connected");

    read_loop(&mut ws_receiver, &state, &connection_id, registered).await;

    // Client gone, release its registrations
    state.hub.write().await.unregister(&connection_id);
    if registered {
        let result = state.lobby.write().await.unregister_user(&connection_id);
        match result {
            Ok(outbound) => state.hub.read().await.deliver(&outbound),
            Err(e) => tracing::warn!(%connection_id, error = %e, "Failed to unregister user"),
        }
    }
    tracing::info!(%connection_id, "Client disconnected");
}

fn spawn_writer(
    mut ws_sender: futures::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Bytes>,
) {
    tokio::spawn(async move {
        while let Some(data) = rx.recv().await {
            if ws_sender.send(Message::Binary(data)).await.is_err() {
                break;
            }
        }
    });
}

/// Per-connection rate limiter (token bucket).
struct RateLimiter {
    tokens: f64,
    last_refill: tokio::time::Instant,
    max_tokens: f64,
    refill_rate: f64, // tokens per second
}

impl RateLimiter {
    fn new(max_tokens: f64, refill_rate: f64) -> Self {
        Self {
            tokens: max_tokens,
            last_refill: tokio::time::Instant::now(),
            max_tokens,
            refill_rate,
        }
    }

    /// Returns true if the message is allowed; false if rate-limited.
    fn allow(&mut self) -> bool {
        let now = tokio::time::Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

async fn read_loop(
    ws_receiver: &mut futures::stream::SplitStream<WebSocket>,
    state: &AppState,
    connection_id: &str,
    registered: bool,
) {
    let rate = state.config.limits.ws_rate_limit_per_sec;
    let mut rate_limiter = RateLimiter::new(rate, rate);

    while let Some(Ok(msg)) = ws_receiver.next().await {
        let data = match msg {
            Message::Binary(d) => d,
            Message::Close(_) => break,
            _ => continue,
        };

        if !rate_limiter.allow() {
            tracing::warn!(connection_id, "Rate limited");
            continue;
        }
        if data.is_empty() || data.len() > MAX_MESSAGE_SIZE {
            continue;
        }

        let action = match decode_client_message(&data) {
            Ok(action) => action,
            Err(e) => {
                tracing::debug!(connection_id, error = %e, "Dropping undecodable client frame");
                continue;
            },
        };

        if !registered {
            let hub = state.hub.read().await;
            hub.send(connection_id, &ServerMessage::join_failed(LOGIN_REQUIRED));
            continue;
        }

        let result = {
            let mut lobby = state.lobby.write().await;
            dispatch(&mut lobby, connection_id, action)
        };
        let hub = state.hub.read().await;
        match result {
            Ok(outbound) => hub.deliver(&outbound),
            Err(e) => {
                tracing::debug!(connection_id, error = %e, "Client action rejected");
                hub.send(connection_id, &ServerMessage::join_failed(e.client_reason()));
            },
        }
    }
}

/// Route one client action to the lobby.
fn dispatch(
    lobby: &mut Lobby,
    connection_id: &str,
    action: ClientMessage,
) -> LobbyResult<Vec<Outbound>> {
    match action {
        ClientMessage::NewGame(m) => lobby
            .create_game(connection_id, m.request)
            .map(|(_, outbound)| outbound),
        ClientMessage::JoinGame(m) => {
            lobby.join_game(connection_id, m.game_id, m.password.as_deref().unwrap_or(""))
        },
        ClientMessage::WatchGame(m) => {
            lobby.watch_game(connection_id, m.game_id, m.password.as_deref().unwrap_or(""))
        },
        ClientMessage::LeaveGame(_) => lobby.leave_game(connection_id),
        ClientMessage::StartGame(_) => lobby.start_game(connection_id),
        // Chat reaches clients through replication, including on this node.
        ClientMessage::SendChat(m) => lobby
            .post_chat(connection_id, &m.message)
            .map(|_| Vec::new()),
        ClientMessage::RemoveChat(m) => lobby
            .remove_chat(connection_id, m.message_id)
            .map(|()| Vec::new()),
    }
}
