use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::RwLock;

use crate::auth::AuthConfig;
use crate::bus::MessageBus;
use crate::config::LobbyConfig;
use crate::hub::ClientHub;
use crate::lobby::{Lobby, LobbySettings, SharedLobby};
use crate::store::StoreHandle;

pub type SharedHub = Arc<RwLock<ClientHub>>;

#[derive(Clone)]
pub struct AppState {
    pub lobby: SharedLobby,
    pub hub: SharedHub,
    pub bus: Arc<dyn MessageBus>,
    pub auth: AuthConfig,
    pub config: Arc<LobbyConfig>,
    pub ws_connection_count: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(config: LobbyConfig, bus: Arc<dyn MessageBus>, store: StoreHandle) -> Self {
        let auth = AuthConfig {
            bearer_token: config.auth.bearer_token.clone(),
        };
        let lobby = Lobby::new(LobbySettings::from(&config), Arc::clone(&bus), store);
        Self {
            lobby: Arc::new(RwLock::new(lobby)),
            hub: Arc::new(RwLock::new(ClientHub::new())),
            bus,
            auth,
            config: Arc::new(config),
            ws_connection_count: Arc::new(AtomicUsize::new(0)),
        }
    }
}

/// Counts one open WebSocket for as long as it lives.
pub struct ConnectionGuard {
    count: Arc<AtomicUsize>,
}

impl ConnectionGuard {
    pub fn new(count: Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::Relaxed);
        Self { count }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_tracks_open_connections() {
        let count = Arc::new(AtomicUsize::new(0));
        let first = ConnectionGuard::new(Arc::clone(&count));
        let second = ConnectionGuard::new(Arc::clone(&count));
        assert_eq!(count.load(Ordering::Relaxed), 2);
        drop(first);
        assert_eq!(count.load(Ordering::Relaxed), 1);
        drop(second);
        assert_eq!(count.load(Ordering::Relaxed), 0);
    }
}
