//! On-disk layout of the backup storage root:
//!
//! ```text
//! <storage_root>/<game folder>/metadata.json
//! <storage_root>/<game folder>/Snapshots/<timestamp folder>/snapshot.manifest.json
//! <storage_root>/<game folder>/Snapshots/<timestamp folder>/<storage folder>/<files...>
//! ```

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::database::models::Game;

pub const SNAPSHOTS_DIR_NAME: &str = "Snapshots";
pub const METADATA_FILE_NAME: &str = "metadata.json";

static INVALID_NAME_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[\\/:*?"<>|]"#).unwrap());
static TRAILING_DOTS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.+$").unwrap());
static WHITESPACE_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Identity written next to a game's snapshots so the library can be rebuilt
/// from the storage root alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameMetadata {
    pub id: String,
    pub name: String,
    pub install_path: String,
    pub exe_path: String,
    pub created_at: DateTime<Utc>,
}

impl From<&Game> for GameMetadata {
    fn from(game: &Game) -> Self {
        Self {
            id: game.id.clone(),
            name: game.name.clone(),
            install_path: game.install_path.clone(),
            exe_path: game.exe_path.clone(),
            created_at: game.created_at,
        }
    }
}

pub fn game_root(storage_root: &Path, folder_name: &str) -> PathBuf {
    storage_root.join(folder_name)
}

pub fn snapshots_root(storage_root: &Path, folder_name: &str) -> PathBuf {
    game_root(storage_root, folder_name).join(SNAPSHOTS_DIR_NAME)
}

pub fn snapshot_root(storage_root: &Path, folder_name: &str, snapshot_folder: &str) -> PathBuf {
    snapshots_root(storage_root, folder_name).join(snapshot_folder)
}

pub fn metadata_path(game_root: &Path) -> PathBuf {
    game_root.join(METADATA_FILE_NAME)
}

/// Turns a display name into a directory name that is valid on every host.
pub fn to_safe_folder_name(name: &str) -> String {
    let cleaned = INVALID_NAME_CHARS.replace_all(name.trim(), "");
    let cleaned = TRAILING_DOTS.replace(&cleaned, "");
    let cleaned = cleaned.trim();
    let base = if cleaned.is_empty() { "Game" } else { cleaned };
    WHITESPACE_RUNS.replace_all(base, " ").into_owned()
}

/// Creates the game folder and (re)writes its `metadata.json`.
pub async fn write_game_metadata(storage_root: &Path, game: &Game) -> std::io::Result<()> {
    let root = game_root(storage_root, &game.folder_name);
    tokio::fs::create_dir_all(&root).await?;
    let content = serde_json::to_string_pretty(&GameMetadata::from(game))
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    tokio::fs::write(metadata_path(&root), content).await
}

/// Reads `metadata.json` from a game folder; `None` when missing or malformed.
pub async fn read_game_metadata(game_root: &Path) -> Option<GameMetadata> {
    let raw = tokio::fs::read_to_string(metadata_path(game_root)).await.ok()?;
    match serde_json::from_str::<GameMetadata>(&raw) {
        Ok(metadata) if !metadata.id.trim().is_empty() && !metadata.name.trim().is_empty() => {
            Some(metadata)
        }
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(path = %game_root.display(), error = %e, "Ignoring malformed game metadata");
            None
        }
    }
}
