use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use lobby_node::bus::{LocalBus, MessageBus};
use lobby_node::config::LobbyConfig;
use lobby_node::nats::NatsBus;
use lobby_node::store::{FileGameStore, GameStore, MemoryGameStore, spawn_store_writer};
use lobby_node::{build_app, spawn_background};

const STORE_DRAIN_SECS: u64 = 5;

#[tokio::main]
async fn main() {
    let json_logs = std::env::var("LOBBY_LOG_JSON").is_ok_and(|v| v == "1");
    if json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .init();
    }

    let config = LobbyConfig::load();
    config.validate();
    tracing::info!(node = %config.node_name, "Lobby node starting");

    let store: Arc<dyn GameStore> = match &config.store.path {
        Some(path) => match FileGameStore::open(path) {
            Ok(store) => {
                tracing::info!(%path, "Using file game store");
                Arc::new(store)
            },
            Err(e) => {
                tracing::error!(%path, error = %e, "Failed to open game store");
                std::process::exit(1);
            },
        },
        None => Arc::new(MemoryGameStore::new()),
    };
    let recovered = match store.active_games() {
        Ok(games) => games,
        Err(e) => {
            tracing::error!(error = %e, "Failed to read active games, starting empty");
            Vec::new()
        },
    };
    let (store_handle, store_task) = spawn_store_writer(store);
    let store_closer = store_handle.clone();

    let capacity = config.limits.bus_capacity;
    let bus: Arc<dyn MessageBus> = match &config.bus.nats_url {
        Some(url) => match NatsBus::connect(url, &config.bus.subject_prefix, capacity).await {
            Ok(bus) => Arc::new(bus),
            Err(e) => {
                tracing::error!(%url, error = %e, "Failed to connect to NATS");
                std::process::exit(1);
            },
        },
        None => {
            tracing::warn!("No bus.nats_url configured, replication stays in this process");
            Arc::new(LocalBus::with_capacity(capacity))
        },
    };
    let addr = config.listen_addr.clone();
    let (app, state) = build_app(config, bus, store_handle);

    let restored = state.lobby.write().await.restore_games(recovered);
    if restored > 0 {
        tracing::info!(restored, "Recovered started games from store");
    }
    let background = spawn_background(&state);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "Failed to bind");
            std::process::exit(1);
        },
    };
    tracing::info!("Lobby node listening on {addr}");

    let graceful = background.token();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown requested");
            graceful.cancel();
        })
        .await;
    if let Err(e) = served {
        tracing::error!(error = %e, "Server error");
    }
    background.stop().await;

    store_closer.close();
    match tokio::time::timeout(Duration::from_secs(STORE_DRAIN_SECS), store_task).await {
        Ok(Ok(())) => {},
        Ok(Err(e)) => tracing::error!(error = %e, "Store writer ended abnormally"),
        Err(_) => tracing::warn!("Store writer did not drain in time, pending writes lost"),
    }
    tracing::info!("Lobby node stopped");
}
