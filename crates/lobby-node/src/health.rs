use std::sync::atomic::Ordering;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Serialize;

use crate::state::AppState;

/// Structured health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub node_name: String,
    pub connections: ConnectionInfo,
    pub games: GameInfo,
    pub execution_nodes: NodeInfo,
}

#[derive(Serialize)]
pub struct ConnectionInfo {
    pub websocket: usize,
    /// Users known to this node, local and replicated.
    pub users: usize,
}

#[derive(Serialize)]
pub struct GameInfo {
    pub active: usize,
    pub started: usize,
}

#[derive(Serialize)]
pub struct NodeInfo {
    pub known: usize,
    pub available: usize,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let websocket = state.ws_connection_count.load(Ordering::Relaxed);
    let lobby = state.lobby.read().await;

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        node_name: lobby.node_name().to_string(),
        connections: ConnectionInfo {
            websocket,
            users: lobby.directory().len(),
        },
        games: GameInfo {
            active: lobby.games().len(),
            started: lobby.games().started_count(),
        },
        execution_nodes: NodeInfo {
            known: lobby.nodes().len(),
            available: lobby.nodes().available_count(),
        },
    })
}

/// Ready once at least one execution node can take a started game.
pub async fn readiness_check(State(state): State<AppState>) -> (StatusCode, &'static str) {
    let available = state.lobby.read().await.nodes().available_count();
    if available == 0 {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "not ready: no execution nodes available",
        );
    }
    (StatusCode::OK, "ready")
}
