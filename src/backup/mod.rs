pub mod copier;
pub mod create;
pub mod hashing;
pub mod manifest;
pub mod restore;
pub mod retention;
pub mod scan;
pub mod verify;

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, OwnedMutexGuard, RwLock};

use crate::database::models::*;
use crate::database::{DatabaseError, LibraryDatabase};
use crate::settings::Settings;

pub use restore::RestoreReport;

const PROGRESS_CHANNEL_CAPACITY: usize = 256;

/// Stage of a snapshot build as seen by progress subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStage {
    Started,
    Progress,
    Completed,
    Failed,
}

/// Progress of one snapshot build
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupProgress {
    pub stage: ProgressStage,
    pub game_id: String,
    pub reason: SnapshotReason,
    pub snapshot_id: Option<String>,
    pub total_files: usize,
    pub completed_files: usize,
    pub total_bytes: u64,
    /// Bytes of files already processed, skipped files included.
    pub copied_bytes: u64,
    pub percent: u8,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VerifyResult {
    pub ok: bool,
    pub issues: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupScanResult {
    pub added_snapshots: usize,
    pub removed_snapshots: usize,
    pub removed_snapshot_files: usize,
    pub skipped_unknown_games: usize,
    pub skipped_invalid_snapshots: usize,
}

/// Result type for backup operations
pub type BackupResult<T> = Result<T, BackupError>;

// Error types for backup operations
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("File system error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Game not found: {0}")]
    GameNotFound(String),

    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    #[error("Snapshot manifest is missing or invalid.")]
    ManifestInvalid(std::path::PathBuf),

    #[error("Snapshot file path resolves outside its allowed root.")]
    PathEscape,

    #[error("Restore failed: no files could be restored to destination paths.")]
    NothingRestored,
}

impl From<BackupError> for String {
    fn from(error: BackupError) -> String {
        error.to_string()
    }
}

/// Entry point for snapshot operations.
///
/// Owns the library handle, the current settings and the progress channel.
/// Operations on one game are serialized by a per-game mutex; different
/// games proceed concurrently. A disk scan touches every game and therefore
/// excludes all other operations while it runs.
pub struct BackupEngine {
    db: Arc<LibraryDatabase>,
    settings: RwLock<Settings>,
    progress: broadcast::Sender<BackupProgress>,
    game_locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
    scan_gate: RwLock<()>,
}

impl BackupEngine {
    pub fn new(db: Arc<LibraryDatabase>, settings: Settings) -> Self {
        let (tx, _) = broadcast::channel(PROGRESS_CHANNEL_CAPACITY);
        Self {
            db,
            settings: RwLock::new(settings),
            progress: tx,
            game_locks: std::sync::Mutex::new(HashMap::new()),
            scan_gate: RwLock::new(()),
        }
    }

    pub fn database(&self) -> &Arc<LibraryDatabase> {
        &self.db
    }

    pub async fn settings(&self) -> Settings {
        self.settings.read().await.clone()
    }

    pub async fn update_settings(&self, settings: Settings) {
        *self.settings.write().await = settings;
    }

    /// Subscribe to backup progress. Dropping the receiver unsubscribes.
    ///
    /// Events are broadcast without back-pressure: a subscriber that falls
    /// more than the channel capacity behind loses the oldest events.
    pub fn subscribe_progress(&self) -> broadcast::Receiver<BackupProgress> {
        self.progress.subscribe()
    }

    /// Create a snapshot of the game's enabled save locations.
    ///
    /// Returns `Ok(None)` when there was nothing to back up (no enabled
    /// locations, no files, or every copy failed); the game is then marked
    /// `warning` and the reason is recorded in the event log.
    pub async fn backup_game(
        &self,
        game_id: &str,
        reason: SnapshotReason,
    ) -> BackupResult<Option<Snapshot>> {
        let _gate = self.scan_gate.read().await;
        let _game = self.lock_game(game_id).await;
        let settings = self.settings().await;
        self.create_snapshot(&settings, game_id, reason, None).await
    }

    /// Restore a snapshot over the game's live save locations.
    pub async fn restore_snapshot(&self, snapshot_id: &str) -> BackupResult<RestoreReport> {
        let _gate = self.scan_gate.read().await;
        let snapshot = self.require_snapshot(snapshot_id).await?;
        let _game = self.lock_game(&snapshot.game_id).await;
        let settings = self.settings().await;
        self.restore_unlocked(&settings, &snapshot).await
    }

    /// Recompute every file checksum of a snapshot against its rows.
    pub async fn verify_snapshot(&self, snapshot_id: &str) -> BackupResult<VerifyResult> {
        let _gate = self.scan_gate.read().await;
        let snapshot = self.require_snapshot(snapshot_id).await?;
        let _game = self.lock_game(&snapshot.game_id).await;
        self.verify_unlocked(&snapshot).await
    }

    /// Delete a snapshot directory and then its rows. If the directory
    /// cannot be removed the rows are kept and the error is returned.
    pub async fn delete_snapshot(&self, snapshot_id: &str) -> BackupResult<()> {
        let _gate = self.scan_gate.read().await;
        let snapshot = self.require_snapshot(snapshot_id).await?;
        let _game = self.lock_game(&snapshot.game_id).await;
        self.delete_unlocked(&snapshot).await
    }

    /// Reconcile the library with the snapshot folders found on disk.
    pub async fn scan_snapshots_from_disk(&self) -> BackupResult<BackupScanResult> {
        let _gate = self.scan_gate.write().await;
        let settings = self.settings().await;
        self.scan_unlocked(&settings).await
    }

    async fn require_snapshot(&self, snapshot_id: &str) -> BackupResult<Snapshot> {
        self.db
            .snapshot(snapshot_id)
            .await
            .ok_or_else(|| BackupError::SnapshotNotFound(snapshot_id.to_string()))
    }

    async fn lock_game(&self, game_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .game_locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            locks
                .entry(game_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    fn emit(&self, event: BackupProgress) {
        // No subscribers is not an error
        let _ = self.progress.send(event);
    }
}
