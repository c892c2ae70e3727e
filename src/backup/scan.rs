//! Reconciles the library with the snapshot directories on disk.
//!
//! Disk is authoritative: snapshot folders with a valid manifest are imported
//! when the library does not know them, and library rows whose directory is
//! gone are dropped. All changes are collected first and persisted once.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use super::copier::{to_slash_path, walk_files};
use super::hashing::hash_file;
use super::manifest::{self, SnapshotManifest};
use super::{BackupEngine, BackupResult, BackupScanResult};
use crate::database::connection::remove_snapshot_rows;
use crate::database::models::*;
use crate::game_manager::locations::normalize_location_path;
use crate::game_manager::storage::{self, GameMetadata};
use crate::settings::Settings;

#[derive(Default)]
struct ScanChanges {
    games: Vec<Game>,
    locations: Vec<SaveLocation>,
    snapshots: Vec<(Snapshot, Vec<SnapshotFile>)>,
    repointed: Vec<(String, String)>,
    stale: Vec<String>,
}

impl ScanChanges {
    fn is_empty(&self) -> bool {
        self.games.is_empty()
            && self.locations.is_empty()
            && self.snapshots.is_empty()
            && self.repointed.is_empty()
            && self.stale.is_empty()
    }
}

impl BackupEngine {
    pub(crate) async fn scan_unlocked(&self, settings: &Settings) -> BackupResult<BackupScanResult> {
        let state = self.db.state().await;
        let mut result = BackupScanResult::default();
        let mut changes = ScanChanges::default();

        let mut games = state.games.clone();
        let mut locations = state.save_locations.clone();
        let mut known_snapshots: HashSet<String> =
            state.snapshots.iter().map(|s| s.id.clone()).collect();
        let mut seen_on_disk: HashSet<String> = HashSet::new();

        let root_available = tokio::fs::try_exists(&settings.storage_root)
            .await
            .unwrap_or(false);

        for game_dir in list_dirs(&settings.storage_root).await {
            let folder_name = dir_name(&game_dir);
            let game = match match_game(&games, &folder_name) {
                Some(game) => game.clone(),
                None => match storage::read_game_metadata(&game_dir).await {
                    Some(metadata) => match games.iter().find(|g| g.id == metadata.id) {
                        Some(game) => game.clone(),
                        None => {
                            let game = recovered_game(metadata, &folder_name, &games);
                            tracing::info!(game_id = %game.id, name = %game.name, "Recovered game from disk");
                            games.push(game.clone());
                            changes.games.push(game.clone());
                            game
                        }
                    },
                    None => {
                        tracing::warn!(folder = %game_dir.display(), "Skipping folder of unknown game");
                        result.skipped_unknown_games += 1;
                        continue;
                    }
                },
            };

            for snapshot_dir in list_dirs(&game_dir.join(storage::SNAPSHOTS_DIR_NAME)).await {
                let manifest = match manifest::load_manifest(&snapshot_dir).await {
                    Ok(manifest) => manifest,
                    Err(e) => {
                        tracing::warn!(folder = %snapshot_dir.display(), error = %e, "Skipping invalid snapshot folder");
                        result.skipped_invalid_snapshots += 1;
                        continue;
                    }
                };

                let snapshot_id = manifest.snapshot_id.clone();
                let storage_path = snapshot_dir.to_string_lossy().into_owned();
                seen_on_disk.insert(snapshot_id.clone());

                if known_snapshots.contains(&snapshot_id) {
                    if let Some(existing) = state.snapshots.iter().find(|s| s.id == snapshot_id) {
                        let recorded = Path::new(&existing.storage_path);
                        if recorded != snapshot_dir.as_path()
                            && !tokio::fs::try_exists(recorded).await.unwrap_or(false)
                        {
                            changes.repointed.push((snapshot_id.clone(), storage_path));
                        }
                    }
                    continue;
                }

                let (snapshot, files) = match import_snapshot(&game.id, &snapshot_dir, &manifest).await {
                    Ok(imported) => imported,
                    Err(e) => {
                        tracing::warn!(folder = %snapshot_dir.display(), error = %e, "Could not import snapshot");
                        result.skipped_invalid_snapshots += 1;
                        continue;
                    }
                };

                for (location_id, recorded) in &manifest.locations {
                    let wanted = normalize_location_path(&recorded.path).to_lowercase();
                    let exists = locations.iter().any(|l| {
                        l.id == *location_id
                            || (l.game_id == game.id
                                && normalize_location_path(&l.path).to_lowercase() == wanted)
                    });
                    if !exists {
                        let location = SaveLocation {
                            id: location_id.clone(),
                            game_id: game.id.clone(),
                            path: recorded.path.clone(),
                            location_type: recorded.location_type,
                            auto_detected: recorded.auto_detected,
                            enabled: recorded.enabled,
                        };
                        locations.push(location.clone());
                        changes.locations.push(location);
                    }
                }

                tracing::info!(snapshot_id = %snapshot.id, game_id = %game.id, "Imported snapshot from disk");
                known_snapshots.insert(snapshot_id);
                changes.snapshots.push((snapshot, files));
                result.added_snapshots += 1;
            }
        }

        if root_available {
            for snapshot in &state.snapshots {
                if seen_on_disk.contains(&snapshot.id) {
                    continue;
                }
                if !tokio::fs::try_exists(&snapshot.storage_path).await.unwrap_or(false) {
                    changes.stale.push(snapshot.id.clone());
                }
            }
        } else {
            tracing::warn!(
                root = %settings.storage_root.display(),
                "Storage root unavailable, keeping existing snapshot rows"
            );
        }

        if changes.is_empty() {
            return Ok(result);
        }

        let (removed_snapshots, removed_files) = self
            .db
            .mutate(move |state| {
                state.games.extend(changes.games);
                state.save_locations.extend(changes.locations);
                for (id, path) in changes.repointed {
                    if let Some(row) = state.snapshots.iter_mut().find(|s| s.id == id) {
                        row.storage_path = path;
                    }
                }
                for (snapshot, files) in changes.snapshots {
                    state.snapshots.push(snapshot);
                    state.snapshot_files.extend(files);
                }
                let mut removed = (0, 0);
                for id in &changes.stale {
                    if let Some(files) = remove_snapshot_rows(state, id) {
                        removed.0 += 1;
                        removed.1 += files;
                    }
                }
                removed
            })
            .await?;

        result.removed_snapshots = removed_snapshots;
        result.removed_snapshot_files = removed_files;
        tracing::info!(?result, "Snapshot scan completed");
        Ok(result)
    }
}

fn match_game<'a>(games: &'a [Game], dir_name: &str) -> Option<&'a Game> {
    let lowered = dir_name.to_lowercase();
    games
        .iter()
        .find(|g| g.folder_name.to_lowercase() == lowered)
        .or_else(|| games.iter().find(|g| g.id == dir_name))
}

fn recovered_game(metadata: GameMetadata, dir_name: &str, games: &[Game]) -> Game {
    let taken = games
        .iter()
        .any(|g| g.name.to_lowercase() == metadata.name.to_lowercase());
    let name = if taken {
        format!("{} (Recovered)", metadata.name)
    } else {
        metadata.name
    };

    Game {
        id: metadata.id,
        name,
        install_path: metadata.install_path,
        exe_path: metadata.exe_path,
        created_at: metadata.created_at,
        last_seen_at: None,
        status: GameStatus::Protected,
        folder_name: dir_name.to_string(),
    }
}

/// Builds rows for a snapshot folder from its manifest and the files found
/// under each storage folder. Sizes and checksums come from disk.
async fn import_snapshot(
    game_id: &str,
    snapshot_dir: &Path,
    manifest: &SnapshotManifest,
) -> BackupResult<(Snapshot, Vec<SnapshotFile>)> {
    let manifest_file = manifest::manifest_path(snapshot_dir);
    let mut files = Vec::new();

    for location_id in manifest.locations.keys() {
        let storage_dir = manifest::resolve_within(snapshot_dir, manifest.storage_folder_for(location_id))?;
        for path in walk_files(&storage_dir).await {
            if path == manifest_file {
                continue;
            }
            let Ok(relative) = path.strip_prefix(&storage_dir) else {
                continue;
            };
            let size_bytes = tokio::fs::metadata(&path).await?.len();
            files.push(SnapshotFile {
                id: uuid::Uuid::new_v4().to_string(),
                snapshot_id: manifest.snapshot_id.clone(),
                location_id: location_id.clone(),
                relative_path: to_slash_path(relative),
                size_bytes,
                checksum: hash_file(&path).await?,
            });
        }
    }

    let snapshot = Snapshot {
        id: manifest.snapshot_id.clone(),
        game_id: game_id.to_string(),
        created_at: manifest.created_at,
        size_bytes: files.iter().map(|f| f.size_bytes).sum(),
        checksum: manifest.checksum(&files),
        storage_path: snapshot_dir.to_string_lossy().into_owned(),
        reason: manifest.reason,
    };
    Ok((snapshot, files))
}

async fn list_dirs(path: &Path) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    let Ok(mut entries) = tokio::fs::read_dir(path).await else {
        return dirs;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    dirs
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
