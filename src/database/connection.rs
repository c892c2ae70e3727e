use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::database::models::*;
use crate::database::schema::{DatabaseSchema, LibraryState};

pub type DatabaseResult<T> = Result<T, DatabaseError>;

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

const STATE_FILE_NAME: &str = "library.json";

/// Document store holding the whole library in memory.
///
/// Every write goes through [`LibraryDatabase::mutate`]: the change is applied
/// to a copy, the copy is flushed to disk, and only then does it replace the
/// live state. A failed flush leaves the in-memory library untouched, so
/// callers never observe rows that were not persisted. The mutex is the
/// single-writer guard for the process.
pub struct LibraryDatabase {
    state: Mutex<LibraryState>,
    state_path: Option<PathBuf>,
}

impl LibraryDatabase {
    /// Opens (or creates) the library document at `state_path`.
    pub async fn open<P: AsRef<Path>>(state_path: P) -> DatabaseResult<Self> {
        let state_path = state_path.as_ref().to_path_buf();
        tracing::info!(path = %state_path.display(), "Opening library database");

        let state = match tokio::fs::read_to_string(&state_path).await {
            Ok(raw) => DatabaseSchema::parse(&raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => LibraryState::default(),
            Err(e) => {
                tracing::warn!(error = %e, "Library state unreadable, starting empty");
                LibraryState::default()
            }
        };

        Self::write_state(Some(&state_path), &state).await?;

        Ok(Self {
            state: Mutex::new(state),
            state_path: Some(state_path),
        })
    }

    /// A library that never touches the disk.
    pub fn in_memory(state: LibraryState) -> Self {
        Self {
            state: Mutex::new(state),
            state_path: None,
        }
    }

    /// Clone of the full library.
    pub async fn state(&self) -> LibraryState {
        self.state.lock().await.clone()
    }

    pub async fn games(&self) -> Vec<Game> {
        self.state.lock().await.games.clone()
    }

    pub async fn game(&self, game_id: &str) -> Option<Game> {
        self.state
            .lock()
            .await
            .games
            .iter()
            .find(|g| g.id == game_id)
            .cloned()
    }

    pub async fn save_locations(&self, game_id: &str) -> Vec<SaveLocation> {
        self.state
            .lock()
            .await
            .save_locations
            .iter()
            .filter(|l| l.game_id == game_id)
            .cloned()
            .collect()
    }

    pub async fn save_location(&self, location_id: &str) -> Option<SaveLocation> {
        self.state
            .lock()
            .await
            .save_locations
            .iter()
            .find(|l| l.id == location_id)
            .cloned()
    }

    /// Snapshots, newest first, optionally restricted to one game.
    pub async fn snapshots(&self, game_id: Option<&str>) -> Vec<Snapshot> {
        let mut snapshots: Vec<Snapshot> = self
            .state
            .lock()
            .await
            .snapshots
            .iter()
            .filter(|s| game_id.map_or(true, |id| s.game_id == id))
            .cloned()
            .collect();
        snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        snapshots
    }

    pub async fn snapshot(&self, snapshot_id: &str) -> Option<Snapshot> {
        self.state
            .lock()
            .await
            .snapshots
            .iter()
            .find(|s| s.id == snapshot_id)
            .cloned()
    }

    pub async fn snapshot_files(&self, snapshot_id: &str) -> Vec<SnapshotFile> {
        self.state
            .lock()
            .await
            .snapshot_files
            .iter()
            .filter(|f| f.snapshot_id == snapshot_id)
            .cloned()
            .collect()
    }

    /// Event logs, newest first, optionally restricted to one game.
    pub async fn event_logs(&self, game_id: Option<&str>) -> Vec<EventLog> {
        let mut logs: Vec<EventLog> = self
            .state
            .lock()
            .await
            .event_logs
            .iter()
            .filter(|l| game_id.map_or(true, |id| l.game_id.as_deref() == Some(id)))
            .cloned()
            .collect();
        logs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        logs
    }

    /// Applies `change` to a copy of the library, persists it, then swaps it in.
    pub async fn mutate<R, F>(&self, change: F) -> DatabaseResult<R>
    where
        F: FnOnce(&mut LibraryState) -> R,
    {
        let mut guard = self.state.lock().await;
        let mut next = guard.clone();
        let result = change(&mut next);
        Self::write_state(self.state_path.as_deref(), &next).await?;
        *guard = next;
        Ok(result)
    }

    pub async fn upsert_game(&self, game: Game) -> DatabaseResult<()> {
        self.mutate(move |state| upsert_by(&mut state.games, game, |g| g.id.clone()))
            .await
    }

    pub async fn upsert_save_location(&self, location: SaveLocation) -> DatabaseResult<()> {
        self.mutate(move |state| upsert_by(&mut state.save_locations, location, |l| l.id.clone()))
            .await
    }

    pub async fn upsert_snapshot(&self, snapshot: Snapshot) -> DatabaseResult<()> {
        self.mutate(move |state| upsert_by(&mut state.snapshots, snapshot, |s| s.id.clone()))
            .await
    }

    pub async fn upsert_snapshot_file(&self, file: SnapshotFile) -> DatabaseResult<()> {
        self.mutate(move |state| upsert_by(&mut state.snapshot_files, file, |f| f.id.clone()))
            .await
    }

    /// Inserts a snapshot together with its files in one persisted step.
    pub async fn insert_snapshot(
        &self,
        snapshot: Snapshot,
        files: Vec<SnapshotFile>,
    ) -> DatabaseResult<()> {
        self.mutate(move |state| {
            upsert_by(&mut state.snapshots, snapshot, |s| s.id.clone());
            state.snapshot_files.extend(files);
        })
        .await
    }

    /// Removes a snapshot row and its file rows. Returns the number of file
    /// rows removed, or `None` when the snapshot was unknown.
    pub async fn delete_snapshot(&self, snapshot_id: &str) -> DatabaseResult<Option<usize>> {
        let snapshot_id = snapshot_id.to_string();
        self.mutate(move |state| remove_snapshot_rows(state, &snapshot_id))
            .await
    }

    pub async fn set_game_status(&self, game_id: &str, status: GameStatus) -> DatabaseResult<bool> {
        let game_id = game_id.to_string();
        self.mutate(move |state| match state.games.iter_mut().find(|g| g.id == game_id) {
            Some(game) => {
                game.status = status;
                true
            }
            None => false,
        })
        .await
    }

    pub async fn append_event(&self, event: EventLog) -> DatabaseResult<()> {
        self.mutate(move |state| state.event_logs.push(event)).await
    }

    /// Flushes the current state to disk.
    pub async fn persist(&self) -> DatabaseResult<()> {
        let guard = self.state.lock().await;
        Self::write_state(self.state_path.as_deref(), &guard).await
    }

    async fn write_state(path: Option<&Path>, state: &LibraryState) -> DatabaseResult<()> {
        let Some(path) = path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(state)?;
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, content).await?;
        tokio::fs::rename(&tmp_path, path).await?;
        Ok(())
    }
}

/// Shared by explicit deletion, retention and the disk scan.
pub(crate) fn remove_snapshot_rows(state: &mut LibraryState, snapshot_id: &str) -> Option<usize> {
    let before = state.snapshots.len();
    state.snapshots.retain(|s| s.id != snapshot_id);
    if state.snapshots.len() == before {
        return None;
    }
    let files_before = state.snapshot_files.len();
    state.snapshot_files.retain(|f| f.snapshot_id != snapshot_id);
    Some(files_before - state.snapshot_files.len())
}

fn upsert_by<T, K, F>(rows: &mut Vec<T>, row: T, key: F)
where
    K: PartialEq,
    F: Fn(&T) -> K,
{
    let id = key(&row);
    match rows.iter_mut().find(|existing| key(existing) == id) {
        Some(existing) => *existing = row,
        None => rows.push(row),
    }
}

// Data directory management
pub struct DatabasePaths;

impl DatabasePaths {
    pub fn default_app_data_dir() -> PathBuf {
        if cfg!(target_os = "windows") {
            // %APPDATA%/GameSaver
            std::env::var("APPDATA")
                .map(|app_data| PathBuf::from(app_data).join("GameSaver"))
                .unwrap_or_else(|_| PathBuf::from("./data"))
        } else if cfg!(target_os = "macos") {
            // ~/Library/Application Support/GameSaver
            std::env::var("HOME")
                .map(|home| PathBuf::from(home)
                     .join("Library")
                     .join("Application Support")
                     .join("GameSaver"))
                .unwrap_or_else(|_| PathBuf::from("./data"))
        } else {
            // Linux: ~/.local/share/gamesaver
            std::env::var("HOME")
                .map(|home| PathBuf::from(home)
                     .join(".local")
                     .join("share")
                     .join("gamesaver"))
                .unwrap_or_else(|_| PathBuf::from("./data"))
        }
    }

    pub fn state_file(data_root: &Path) -> PathBuf {
        data_root.join("AppState").join(STATE_FILE_NAME)
    }

    pub fn settings_file(data_root: &Path) -> PathBuf {
        data_root.join("settings.json")
    }

    pub fn backup_directory(data_root: &Path) -> PathBuf {
        data_root.join("Backups")
    }

    pub fn log_directory(data_root: &Path) -> PathBuf {
        data_root.join("logs")
    }
}
