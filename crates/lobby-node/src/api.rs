use axum::extract::{Path, State};
use axum::response::Json;
use serde::Serialize;

use lobby_core::game::{GameId, GameListSummary, GameStateSummary};
use lobby_core::node::NodeStatus;

use crate::error::AppError;
use crate::state::AppState;

/// Response for `GET /api/v1/status`.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub node_name: String,
    pub users: usize,
    pub games: usize,
    pub started_games: usize,
    pub chat_messages: usize,
    pub nodes: Vec<NodeStatus>,
}

/// GET /api/v1/status: replica sizes and execution-node table.
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let lobby = state.lobby.read().await;
    Json(StatusResponse {
        node_name: lobby.node_name().to_string(),
        users: lobby.directory().len(),
        games: lobby.games().len(),
        started_games: lobby.games().started_count(),
        chat_messages: lobby.chat().len(),
        nodes: lobby.nodes().statuses(),
    })
}

/// GET /api/v1/games: every game in the local replica, unfiltered.
pub async fn list_games(State(state): State<AppState>) -> Json<Vec<GameListSummary>> {
    let lobby = state.lobby.read().await;
    Json(lobby.visible_games(None))
}

/// GET /api/v1/games/{game_id}
pub async fn get_game(
    State(state): State<AppState>,
    Path(game_id): Path<String>,
) -> Result<Json<GameStateSummary>, AppError> {
    let id: GameId = game_id
        .parse()
        .map_err(|_| AppError::BadRequest(format!("invalid game id: {game_id}")))?;
    let lobby = state.lobby.read().await;
    lobby
        .games()
        .get(id)
        .map(|game| Json(game.state_summary()))
        .ok_or_else(|| AppError::NotFound(format!("game {id} not found")))
}

/// GET /api/v1/nodes: execution nodes with load and liveness.
pub async fn list_nodes(State(state): State<AppState>) -> Json<Vec<NodeStatus>> {
    let lobby = state.lobby.read().await;
    Json(lobby.nodes().statuses())
}
