use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Game {
    pub id: String,
    pub name: String,
    pub install_path: String,
    pub exe_path: String,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub status: GameStatus,
    /// Sanitized directory name under the storage root.
    pub folder_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveLocation {
    pub id: String,
    pub game_id: String,
    pub path: String,
    #[serde(rename = "type")]
    pub location_type: SaveLocationType,
    pub auto_detected: bool,
    pub enabled: bool,
}

impl SaveLocation {
    /// Probes the filesystem; never stored.
    pub fn exists(&self) -> bool {
        std::path::Path::new(&self.path).exists()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub game_id: String,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
    /// Digest of the snapshot's manifest summary. This tags the manifest and
    /// row set for consistency checks; it is not a hash of file contents.
    pub checksum: String,
    pub storage_path: String,
    pub reason: SnapshotReason,
}

/// One file captured by a snapshot.
///
/// `location_id` is a soft reference: the save location may have been removed
/// or replaced since the snapshot was taken, so restore resolves it through a
/// fallback chain instead of assuming it still exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotFile {
    pub id: String,
    pub snapshot_id: String,
    pub location_id: String,
    pub relative_path: String,
    pub size_bytes: u64,
    pub checksum: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLog {
    pub id: String,
    pub game_id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: EventLogType,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

// Response types for callers
#[derive(Debug, Clone, Serialize)]
pub struct SaveLocationView {
    #[serde(flatten)]
    pub location: SaveLocation,
    pub exists: bool,
}

impl From<SaveLocation> for SaveLocationView {
    fn from(location: SaveLocation) -> Self {
        let exists = location.exists();
        Self { location, exists }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GameSummary {
    #[serde(flatten)]
    pub game: Game,
    pub last_backup_at: Option<DateTime<Utc>>,
    pub last_snapshot_reason: Option<SnapshotReason>,
    pub issue_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct GameDetail {
    pub game: Game,
    pub save_locations: Vec<SaveLocationView>,
    pub snapshots: Vec<Snapshot>,
    pub event_logs: Vec<EventLog>,
}

// Request types for operations
#[derive(Debug, Clone, Deserialize)]
pub struct AddGameRequest {
    pub name: String,
    pub exe_path: String,
    pub install_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    Protected,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveLocationType {
    Folder,
    File,
}

impl SaveLocationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Folder => "folder",
            Self::File => "file",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SnapshotReason {
    #[serde(rename = "auto")]
    Auto,
    #[serde(rename = "manual")]
    Manual,
    #[serde(rename = "pre-restore")]
    PreRestore,
}

impl SnapshotReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
            Self::PreRestore => "pre-restore",
        }
    }
}

impl std::fmt::Display for SnapshotReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLogType {
    Backup,
    Restore,
    Error,
}
