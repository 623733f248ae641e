pub mod api;
pub mod auth;
pub mod bus;
pub mod chat;
pub mod config;
pub mod directory;
pub mod error;
pub mod handoff;
pub mod health;
pub mod hub;
pub mod lobby;
pub mod monitor;
pub mod nats;
pub mod registry;
pub mod replication;
pub mod state;
pub mod store;
pub mod tombstones;
pub mod tracker;
pub mod ws;

use std::sync::Arc;

use axum::Router;
use axum::middleware;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use bus::MessageBus;
use config::LobbyConfig;
use state::AppState;
use store::StoreHandle;

/// Build the Axum router and application state from a config.
pub fn build_app(
    config: LobbyConfig,
    bus: Arc<dyn MessageBus>,
    store: StoreHandle,
) -> (Router<()>, AppState) {
    let state = AppState::new(config, bus, store);

    // API routes (behind bearer auth middleware)
    let api_routes = Router::new()
        .route("/status", axum::routing::get(api::get_status))
        .route("/games", axum::routing::get(api::list_games))
        .route("/games/{game_id}", axum::routing::get(api::get_game))
        .route("/nodes", axum::routing::get(api::list_nodes))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            bearer_auth_layer,
        ));

    let app = Router::new()
        .route("/ws", axum::routing::get(ws::ws_handler))
        .route("/health", axum::routing::get(health::health_check))
        .route("/ready", axum::routing::get(health::readiness_check))
        .nest("/api/v1", api_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    (app, state)
}

/// Replication and node monitor tasks of a running node.
pub struct Background {
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Background {
    pub fn token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Cancel the tasks and wait for them, so nothing touches the lobby afterwards.
    pub async fn stop(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Background task ended abnormally");
            }
        }
    }
}

/// Start replication and the node monitor, then announce this node on the bus.
pub fn spawn_background(state: &AppState) -> Background {
    let shutdown = CancellationToken::new();
    let tasks = vec![
        replication::spawn_replication(state.clone(), shutdown.clone()),
        monitor::spawn_node_monitor(state.clone(), shutdown.clone()),
    ];

    let lobby = Arc::clone(&state.lobby);
    tokio::spawn(async move {
        lobby.read().await.announce();
    });
    Background { shutdown, tasks }
}

/// Middleware wrapper that injects AuthConfig into request extensions for the
/// bearer auth middleware.
async fn bearer_auth_layer(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut request: axum::extract::Request,
    next: middleware::Next,
) -> Result<axum::response::Response, axum::http::StatusCode> {
    request.extensions_mut().insert(state.auth.clone());
    auth::bearer_auth_middleware(request.headers().clone(), request, next).await
}
