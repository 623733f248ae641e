//! Durable record of started games, kept for crash recovery.
//!
//! Writes never happen on the caller's task. `Lobby` sends commands through a
//! [`StoreHandle`]; a spawned writer applies them to the backing [`GameStore`].

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use lobby_core::game::{GameId, GameSession};

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Serialize(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "store I/O error: {e}"),
            Self::Serialize(e) => write!(f, "store serialization error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Id-indexed persistence of started sessions.
pub trait GameStore: Send + Sync {
    /// Write the session record and add its id to the active set.
    fn save(&self, game: &GameSession) -> Result<(), StoreError>;

    /// Delete the session record and drop its id from the active set. Idempotent.
    fn remove(&self, id: GameId) -> Result<(), StoreError>;

    /// Every session in the active set.
    fn active_games(&self) -> Result<Vec<GameSession>, StoreError>;
}

#[derive(Default)]
pub struct MemoryGameStore {
    games: Mutex<BTreeMap<GameId, GameSession>>,
}

impl MemoryGameStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GameStore for MemoryGameStore {
    fn save(&self, game: &GameSession) -> Result<(), StoreError> {
        let mut games = self.games.lock().unwrap_or_else(PoisonError::into_inner);
        games.insert(game.id, game.clone());
        Ok(())
    }

    fn remove(&self, id: GameId) -> Result<(), StoreError> {
        let mut games = self.games.lock().unwrap_or_else(PoisonError::into_inner);
        games.remove(&id);
        Ok(())
    }

    fn active_games(&self) -> Result<Vec<GameSession>, StoreError> {
        let games = self.games.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(games.values().cloned().collect())
    }
}

/// JSON files under a directory: one `game-<id>.json` record per session plus a
/// `games.json` index holding the active id set.
pub struct FileGameStore {
    dir: PathBuf,
    // Serializes index read-modify-write cycles.
    index_lock: Mutex<()>,
}

impl FileGameStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            index_lock: Mutex::new(()),
        })
    }

    fn record_path(&self, id: GameId) -> PathBuf {
        self.dir.join(format!("game-{id}.json"))
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join("games.json")
    }

    fn read_index(&self) -> Result<BTreeSet<GameId>, StoreError> {
        match std::fs::read(self.index_path()) {
            Ok(bytes) => {
                serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialize(e.to_string()))
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeSet::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_index(&self, index: &BTreeSet<GameId>) -> Result<(), StoreError> {
        let bytes =
            serde_json::to_vec(index).map_err(|e| StoreError::Serialize(e.to_string()))?;
        write_atomic(&self.index_path(), &bytes)
    }
}

/// Write to a sibling temp file, then rename over the target.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

impl GameStore for FileGameStore {
    fn save(&self, game: &GameSession) -> Result<(), StoreError> {
        let bytes =
            serde_json::to_vec_pretty(game).map_err(|e| StoreError::Serialize(e.to_string()))?;
        write_atomic(&self.record_path(game.id), &bytes)?;

        let _guard = self.index_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut index = self.read_index()?;
        if index.insert(game.id) {
            self.write_index(&index)?;
        }
        Ok(())
    }

    fn remove(&self, id: GameId) -> Result<(), StoreError> {
        let _guard = self.index_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut index = self.read_index()?;
        if index.remove(&id) {
            self.write_index(&index)?;
        }
        match std::fs::remove_file(self.record_path(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn active_games(&self) -> Result<Vec<GameSession>, StoreError> {
        let index = {
            let _guard = self.index_lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.read_index()?
        };
        let mut games = Vec::with_capacity(index.len());
        for id in index {
            match std::fs::read(self.record_path(id)) {
                Ok(bytes) => match serde_json::from_slice(&bytes) {
                    Ok(game) => games.push(game),
                    Err(e) => {
                        tracing::warn!(game_id = %id, error = %e, "Skipping unreadable game record");
                    },
                },
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::warn!(game_id = %id, "Indexed game record is missing");
                },
                Err(e) => return Err(e.into()),
            }
        }
        Ok(games)
    }
}

#[derive(Debug)]
pub enum StoreCommand {
    Save(Box<GameSession>),
    Remove(GameId),
    /// Finish the commands queued before this one, then stop.
    Close,
}

/// Non-blocking sender half used by `Lobby`.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::UnboundedSender<StoreCommand>,
}

impl StoreHandle {
    /// A handle and the receiver its commands arrive on.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<StoreCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn save(&self, game: &GameSession) {
        self.send(StoreCommand::Save(Box::new(game.clone())));
    }

    pub fn remove(&self, id: GameId) {
        self.send(StoreCommand::Remove(id));
    }

    /// Ask the writer to stop once everything already queued is written.
    pub fn close(&self) {
        self.send(StoreCommand::Close);
    }

    fn send(&self, command: StoreCommand) {
        if let Err(e) = self.tx.send(command) {
            tracing::warn!(command = ?e.0, "Store writer is gone, dropping command");
        }
    }
}

/// Spawn the writer task. It exits on [`StoreHandle::close`] or once every
/// handle is dropped.
pub fn spawn_store_writer(store: Arc<dyn GameStore>) -> (StoreHandle, JoinHandle<()>) {
    let (handle, mut rx) = StoreHandle::channel();
    let task = tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            let store = Arc::clone(&store);
            let result = tokio::task::spawn_blocking(move || match command {
                StoreCommand::Save(game) => store.save(&game).map(|()| Some(game.id)),
                StoreCommand::Remove(id) => store.remove(id).map(|()| Some(id)),
                StoreCommand::Close => Ok(None),
            })
            .await;
            match result {
                Ok(Ok(Some(id))) => tracing::debug!(game_id = %id, "Store updated"),
                Ok(Ok(None)) => break,
                Ok(Err(e)) => tracing::error!(error = %e, "Failed to persist game"),
                Err(e) => tracing::error!(error = %e, "Store write task panicked"),
            }
        }
        tracing::info!("Store writer stopped");
    });
    (handle, task)
}
