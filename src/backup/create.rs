use chrono::{DateTime, Local, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use super::copier::{self, DEFAULT_COPY_RETRIES};
use super::hashing::hash_file;
use super::manifest::{self, ManifestLocation, SnapshotManifest};
use super::{BackupEngine, BackupError, BackupProgress, BackupResult, ProgressStage};
use crate::database::models::*;
use crate::database::LibraryDatabase;
use crate::game_manager::events::log_event;
use crate::game_manager::storage;
use crate::settings::Settings;

const SNAPSHOT_FOLDER_FORMAT: &str = "%Y-%m-%d_%H-%M-%S-%3f";

pub(crate) const NO_LOCATIONS_MESSAGE: &str = "Backup skipped: no enabled save locations.";
pub(crate) const NO_FILES_MESSAGE: &str = "Backup skipped: no files found in enabled save locations.";
pub(crate) const ALL_COPIES_FAILED_MESSAGE: &str =
    "Backup skipped: failed to copy files from enabled save locations.";

/// A source file selected for the snapshot.
#[derive(Debug, Clone)]
struct PlannedFile {
    location_id: String,
    source: PathBuf,
    relative_path: String,
    size_bytes: u64,
}

/// A file already copied into the snapshot directory.
#[derive(Debug, Clone)]
pub(crate) struct CopiedFile {
    pub location_id: String,
    pub relative_path: String,
    pub stored_path: PathBuf,
    pub size_bytes: u64,
}

/// Everything needed to turn a populated snapshot directory into a
/// manifest and library rows.
#[derive(Debug, Clone)]
pub(crate) struct PendingSnapshot {
    pub snapshot_id: String,
    pub game_id: String,
    pub created_at: DateTime<Utc>,
    pub reason: SnapshotReason,
    pub root: PathBuf,
    pub locations: BTreeMap<String, ManifestLocation>,
    pub files: Vec<CopiedFile>,
}

struct ProgressTracker {
    game_id: String,
    reason: SnapshotReason,
    total_files: usize,
    total_bytes: u64,
    completed_files: usize,
    copied_bytes: u64,
}

impl ProgressTracker {
    fn event(&self, stage: ProgressStage, snapshot_id: Option<&str>, message: Option<String>) -> BackupProgress {
        let percent = if self.total_bytes > 0 {
            self.copied_bytes.saturating_mul(100) / self.total_bytes
        } else if self.total_files > 0 {
            (self.completed_files as u64 * 100) / self.total_files as u64
        } else {
            100
        };

        BackupProgress {
            stage,
            game_id: self.game_id.clone(),
            reason: self.reason,
            snapshot_id: snapshot_id.map(str::to_string),
            total_files: self.total_files,
            completed_files: self.completed_files,
            total_bytes: self.total_bytes,
            copied_bytes: self.copied_bytes,
            percent: percent.min(100) as u8,
            message,
        }
    }

    fn advance(&mut self, size_bytes: u64) {
        self.completed_files += 1;
        self.copied_bytes += size_bytes;
    }
}

impl BackupEngine {
    /// Builds one snapshot. Callers must hold the game's lock.
    ///
    /// `keep` names a snapshot that retention must not delete; restore uses
    /// it to protect the snapshot it is about to read.
    pub(crate) async fn create_snapshot(
        &self,
        settings: &Settings,
        game_id: &str,
        reason: SnapshotReason,
        keep: Option<&str>,
    ) -> BackupResult<Option<Snapshot>> {
        let game = self
            .db
            .game(game_id)
            .await
            .ok_or_else(|| BackupError::GameNotFound(game_id.to_string()))?;

        let created_at = Utc::now();
        let snapshots_root = storage::snapshots_root(&settings.storage_root, &game.folder_name);
        let folder = unique_snapshot_folder(&snapshots_root, created_at).await;
        let snapshot_root = snapshots_root.join(&folder);

        let locations: Vec<SaveLocation> = self
            .db
            .save_locations(game_id)
            .await
            .into_iter()
            .filter(|l| l.enabled)
            .collect();

        if locations.is_empty() {
            self.skip_backup(game_id, NO_LOCATIONS_MESSAGE).await?;
            return Ok(None);
        }

        let storage_folders = assign_storage_folders(&locations);
        let plan = plan_files(&locations, &storage_folders).await;
        if plan.is_empty() {
            self.skip_backup(game_id, NO_FILES_MESSAGE).await?;
            return Ok(None);
        }

        let snapshot_id = uuid::Uuid::new_v4().to_string();
        let mut tracker = ProgressTracker {
            game_id: game_id.to_string(),
            reason,
            total_files: plan.len(),
            total_bytes: plan.iter().map(|f| f.size_bytes).sum(),
            completed_files: 0,
            copied_bytes: 0,
        };

        tracing::info!(
            game_id,
            snapshot_id = %snapshot_id,
            folder = %folder,
            files = tracker.total_files,
            bytes = tracker.total_bytes,
            reason = %reason,
            "Starting snapshot"
        );
        self.emit(tracker.event(ProgressStage::Started, None, None));

        tokio::fs::create_dir_all(&snapshot_root).await?;

        let mut copied = Vec::with_capacity(plan.len());
        let mut skipped = 0usize;
        for file in &plan {
            let storage_folder = storage_folders
                .get(&file.location_id)
                .map(String::as_str)
                .unwrap_or(file.location_id.as_str());
            let destination = manifest::resolve_within(&snapshot_root, storage_folder)
                .and_then(|dir| manifest::resolve_within(&dir, &file.relative_path));

            let outcome = match destination {
                Ok(destination) => {
                    copier::copy_file_with_retries(&file.source, &destination, DEFAULT_COPY_RETRIES)
                        .await
                        .map(|bytes| (destination, bytes))
                        .map_err(|e| e.to_string())
                }
                Err(e) => Err(e.to_string()),
            };

            match outcome {
                Ok((stored_path, size_bytes)) => copied.push(CopiedFile {
                    location_id: file.location_id.clone(),
                    relative_path: file.relative_path.clone(),
                    stored_path,
                    size_bytes,
                }),
                Err(error) => {
                    skipped += 1;
                    let name = file
                        .source
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| file.relative_path.clone());
                    tracing::warn!(source = %file.source.display(), error = %error, "Skipping file");
                    if let Err(e) = log_event(
                        &self.db,
                        Some(game_id),
                        EventLogType::Error,
                        format!("Backup skipped file \"{}\": {}", name, error),
                    )
                    .await
                    {
                        tracing::error!(game_id, error = %e, "Could not record skipped file");
                    }
                }
            }

            tracker.advance(file.size_bytes);
            self.emit(tracker.event(ProgressStage::Progress, None, None));
        }

        if copied.is_empty() {
            if let Err(e) = copier::remove_dir_safe(&snapshot_root).await {
                tracing::warn!(path = %snapshot_root.display(), error = %e, "Could not remove empty snapshot directory");
            }
            self.emit(tracker.event(
                ProgressStage::Failed,
                None,
                Some(ALL_COPIES_FAILED_MESSAGE.to_string()),
            ));
            self.skip_backup(game_id, ALL_COPIES_FAILED_MESSAGE).await?;
            return Ok(None);
        }

        let pending = PendingSnapshot {
            snapshot_id: snapshot_id.clone(),
            game_id: game_id.to_string(),
            created_at,
            reason,
            root: snapshot_root,
            locations: manifest_locations(&locations, &storage_folders),
            files: copied,
        };

        let snapshot = match commit_snapshot(&self.db, pending).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::error!(game_id, snapshot_id = %snapshot_id, error = %e, "Snapshot commit failed");
                self.emit(tracker.event(ProgressStage::Failed, None, Some(e.to_string())));
                // The library may be the thing that failed; these are best effort.
                if let Err(status_error) = self.db.set_game_status(game_id, GameStatus::Error).await {
                    tracing::warn!(game_id, error = %status_error, "Could not mark game as failed");
                }
                if let Err(log_error) = log_event(
                    &self.db,
                    Some(game_id),
                    EventLogType::Error,
                    format!("Backup failed: {}", e),
                )
                .await
                {
                    tracing::warn!(game_id, error = %log_error, "Could not record failed backup");
                }
                return Err(e);
            }
        };

        let status = if skipped > 0 {
            GameStatus::Warning
        } else {
            GameStatus::Protected
        };
        self.db.set_game_status(game_id, status).await?;
        log_event(
            &self.db,
            Some(game_id),
            EventLogType::Backup,
            format!(
                "Snapshot created ({}, {} files, {} bytes).",
                reason,
                tracker.total_files - skipped,
                snapshot.size_bytes
            ),
        )
        .await?;

        let game_root = storage::game_root(&settings.storage_root, &game.folder_name);
        if storage::read_game_metadata(&game_root).await.is_none() {
            if let Err(e) = storage::write_game_metadata(&settings.storage_root, &game).await {
                tracing::warn!(game_id, error = %e, "Could not write game metadata");
            }
        }

        let mut protected = vec![snapshot.id.as_str()];
        protected.extend(keep);
        self.retain_after_backup(game_id, settings.effective_retention(), &protected)
            .await;

        self.emit(tracker.event(ProgressStage::Completed, Some(snapshot.id.as_str()), None));
        tracing::info!(
            game_id,
            snapshot_id = %snapshot.id,
            size_bytes = snapshot.size_bytes,
            skipped,
            "Snapshot created"
        );
        Ok(Some(snapshot))
    }

    /// Runs retention once a snapshot is committed. The snapshot stands either
    /// way, so a failure here is logged and not returned.
    pub(crate) async fn retain_after_backup(&self, game_id: &str, retention: usize, protected: &[&str]) {
        if let Err(e) = self.apply_retention(game_id, retention, protected).await {
            tracing::error!(game_id, error = %e, "Retention after backup failed");
        }
    }

    async fn skip_backup(&self, game_id: &str, message: &str) -> BackupResult<()> {
        tracing::warn!(game_id, "{}", message);
        self.db.set_game_status(game_id, GameStatus::Warning).await?;
        log_event(&self.db, Some(game_id), EventLogType::Error, message).await?;
        Ok(())
    }
}

/// Writes the manifest and inserts the snapshot rows. On any failure the
/// snapshot directory is removed, leaving neither rows nor files behind.
pub(crate) async fn commit_snapshot(
    db: &LibraryDatabase,
    pending: PendingSnapshot,
) -> BackupResult<Snapshot> {
    let root = pending.root.clone();
    match finalize_snapshot(db, pending).await {
        Ok(snapshot) => Ok(snapshot),
        Err(e) => {
            if let Err(cleanup) = copier::remove_dir_safe(&root).await {
                tracing::error!(path = %root.display(), error = %cleanup, "Could not roll back snapshot directory");
            }
            Err(e)
        }
    }
}

async fn finalize_snapshot(db: &LibraryDatabase, pending: PendingSnapshot) -> BackupResult<Snapshot> {
    let mut files = Vec::with_capacity(pending.files.len());
    for copied in &pending.files {
        files.push(SnapshotFile {
            id: uuid::Uuid::new_v4().to_string(),
            snapshot_id: pending.snapshot_id.clone(),
            location_id: copied.location_id.clone(),
            relative_path: copied.relative_path.clone(),
            size_bytes: copied.size_bytes,
            checksum: hash_file(&copied.stored_path).await?,
        });
    }

    let manifest = SnapshotManifest::new(
        pending.snapshot_id.clone(),
        pending.created_at,
        pending.reason,
        pending.locations,
    );
    manifest::write_manifest(&pending.root, &manifest).await?;

    let snapshot = Snapshot {
        id: pending.snapshot_id,
        game_id: pending.game_id,
        created_at: pending.created_at,
        size_bytes: files.iter().map(|f| f.size_bytes).sum(),
        checksum: manifest.checksum(&files),
        storage_path: pending.root.to_string_lossy().into_owned(),
        reason: pending.reason,
    };

    db.insert_snapshot(snapshot.clone(), files).await?;
    Ok(snapshot)
}

/// Local-time folder name for a snapshot, suffixed `_1`, `_2`, ... when a
/// folder with that name already exists.
pub(crate) async fn unique_snapshot_folder(snapshots_root: &Path, created_at: DateTime<Utc>) -> String {
    let base = created_at
        .with_timezone(&Local)
        .format(SNAPSHOT_FOLDER_FORMAT)
        .to_string();

    let mut candidate = base.clone();
    let mut suffix = 1;
    while tokio::fs::try_exists(snapshots_root.join(&candidate))
        .await
        .unwrap_or(false)
    {
        candidate = format!("{}_{}", base, suffix);
        suffix += 1;
    }
    candidate
}

/// Names the subdirectory each location's files are stored under: the
/// folder's own name, or the parent folder's name for a single file.
/// Duplicates get `_2`, `_3`, ... appended.
pub(crate) fn assign_storage_folders(locations: &[SaveLocation]) -> HashMap<String, String> {
    let mut used = HashSet::new();
    let mut assigned = HashMap::new();

    for location in locations {
        let path = Path::new(&location.path);
        let source_name = match location.location_type {
            SaveLocationType::Folder => path.file_name(),
            SaveLocationType::File => path.parent().and_then(Path::file_name),
        };
        let base = source_name
            .map(|n| storage::to_safe_folder_name(&n.to_string_lossy()))
            .unwrap_or_else(|| "Location".to_string());

        let mut candidate = base.clone();
        let mut suffix = 2;
        while !used.insert(candidate.to_lowercase()) {
            candidate = format!("{}_{}", base, suffix);
            suffix += 1;
        }
        assigned.insert(location.id.clone(), candidate);
    }
    assigned
}

fn manifest_locations(
    locations: &[SaveLocation],
    storage_folders: &HashMap<String, String>,
) -> BTreeMap<String, ManifestLocation> {
    locations
        .iter()
        .map(|l| {
            (
                l.id.clone(),
                ManifestLocation {
                    path: l.path.clone(),
                    location_type: l.location_type,
                    auto_detected: l.auto_detected,
                    enabled: l.enabled,
                    storage_folder: storage_folders.get(&l.id).cloned(),
                },
            )
        })
        .collect()
}

async fn plan_files(
    locations: &[SaveLocation],
    storage_folders: &HashMap<String, String>,
) -> Vec<PlannedFile> {
    let mut plan = Vec::new();

    for location in locations {
        if !storage_folders.contains_key(&location.id) {
            continue;
        }
        let root = Path::new(&location.path);
        let metadata = match tokio::fs::metadata(root).await {
            Ok(metadata) => metadata,
            Err(_) => {
                tracing::warn!(location_id = %location.id, path = %location.path, "Save location missing, skipping");
                continue;
            }
        };

        match location.location_type {
            SaveLocationType::File if metadata.is_file() => {
                let Some(name) = root.file_name() else {
                    continue;
                };
                plan.push(PlannedFile {
                    location_id: location.id.clone(),
                    source: root.to_path_buf(),
                    relative_path: name.to_string_lossy().into_owned(),
                    size_bytes: metadata.len(),
                });
            }
            SaveLocationType::Folder if metadata.is_dir() => {
                for source in copier::walk_files(root).await {
                    let Ok(relative) = source.strip_prefix(root) else {
                        continue;
                    };
                    let size_bytes = match tokio::fs::metadata(&source).await {
                        Ok(meta) => meta.len(),
                        Err(_) => 0,
                    };
                    plan.push(PlannedFile {
                        location_id: location.id.clone(),
                        relative_path: copier::to_slash_path(relative),
                        source,
                        size_bytes,
                    });
                }
            }
            _ => {
                tracing::warn!(
                    location_id = %location.id,
                    path = %location.path,
                    kind = location.location_type.as_str(),
                    "Save location type does not match what is on disk, skipping"
                );
            }
        }
    }

    plan
}
