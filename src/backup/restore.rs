use serde::Serialize;
use std::path::{Path, PathBuf};

use super::copier::{self, DEFAULT_COPY_RETRIES};
use super::manifest::{self, SnapshotManifest};
use super::{BackupEngine, BackupError, BackupResult};
use crate::database::models::*;
use crate::game_manager::events::log_event;
use crate::game_manager::locations::normalize_location_path;
use crate::settings::Settings;

const NO_SAFETY_BACKUP_SUFFIX: &str = "Proceeding with restore without safety backup.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    pub restored: usize,
    pub failed: usize,
}

impl BackupEngine {
    /// Restores a snapshot. Callers must hold the game's lock.
    ///
    /// The manifest and every stored file path are validated before anything
    /// is written. A `pre-restore` snapshot of the current saves is attempted
    /// first; if it cannot be made the restore continues without it. Files
    /// that cannot be placed are counted as failures; only a restore that
    /// places nothing is an error.
    pub(crate) async fn restore_unlocked(
        &self,
        settings: &Settings,
        snapshot: &Snapshot,
    ) -> BackupResult<RestoreReport> {
        let snapshot_root = PathBuf::from(&snapshot.storage_path);
        let manifest = manifest::load_manifest(&snapshot_root).await?;
        let files = self.db.snapshot_files(&snapshot.id).await;

        let mut sources = Vec::with_capacity(files.len());
        for file in &files {
            sources.push(manifest.stored_file_path(&snapshot_root, file)?);
        }

        match self
            .create_snapshot(settings, &snapshot.game_id, SnapshotReason::PreRestore, Some(snapshot.id.as_str()))
            .await
        {
            Ok(Some(safety)) => {
                tracing::info!(snapshot_id = %safety.id, "Pre-restore safety snapshot created");
            }
            Ok(None) => {
                self.note_missing_safety_backup(
                    &snapshot.game_id,
                    format!("Pre-restore safety backup unavailable (nothing to back up). {}", NO_SAFETY_BACKUP_SUFFIX),
                )
                .await;
            }
            Err(e) => {
                self.note_missing_safety_backup(
                    &snapshot.game_id,
                    format!("Pre-restore safety backup unavailable ({}). {}", e, NO_SAFETY_BACKUP_SUFFIX),
                )
                .await;
            }
        }

        let current = self.db.save_locations(&snapshot.game_id).await;
        let mut report = RestoreReport { restored: 0, failed: 0 };

        for (file, source) in files.iter().zip(&sources) {
            let Some(base) = resolve_destination(&file.location_id, &manifest, &current) else {
                tracing::warn!(
                    snapshot_id = %snapshot.id,
                    location_id = %file.location_id,
                    "No destination for snapshot file"
                );
                report.failed += 1;
                continue;
            };

            let destination = match manifest::resolve_within(&base, &file.relative_path) {
                Ok(destination) => destination,
                Err(_) => {
                    report.failed += 1;
                    continue;
                }
            };

            match copier::copy_file_with_retries(source, &destination, DEFAULT_COPY_RETRIES).await {
                Ok(_) => report.restored += 1,
                Err(e) => {
                    tracing::warn!(
                        destination = %destination.display(),
                        error = %e,
                        "Could not restore file"
                    );
                    report.failed += 1;
                }
            }
        }

        if report.restored == 0 {
            let error = BackupError::NothingRestored;
            log_event(&self.db, Some(snapshot.game_id.as_str()), EventLogType::Error, error.to_string()).await?;
            return Err(error);
        }

        log_event(
            &self.db,
            Some(snapshot.game_id.as_str()),
            EventLogType::Restore,
            format!(
                "Snapshot restored ({} restored, {} failed).",
                report.restored, report.failed
            ),
        )
        .await?;
        tracing::info!(
            snapshot_id = %snapshot.id,
            restored = report.restored,
            failed = report.failed,
            "Snapshot restored"
        );
        Ok(report)
    }

    async fn note_missing_safety_backup(&self, game_id: &str, message: String) {
        tracing::warn!(game_id, "{}", message);
        if let Err(e) = log_event(&self.db, Some(game_id), EventLogType::Error, message).await {
            tracing::error!(game_id, error = %e, "Could not record missing safety backup");
        }
    }
}

/// Picks the directory a snapshot file's relative path is restored under.
///
/// In order of preference:
/// 1. the live location with the same id, when its type still matches
/// 2. an enabled live location at the path recorded in the manifest
/// 3. the only enabled live location, when there is exactly one
/// 4. the path recorded in the manifest
pub(crate) fn resolve_destination(
    location_id: &str,
    manifest: &SnapshotManifest,
    current: &[SaveLocation],
) -> Option<PathBuf> {
    let recorded = manifest.locations.get(location_id);

    if let Some(live) = current.iter().find(|l| l.id == location_id) {
        if recorded.map_or(true, |r| r.location_type == live.location_type) {
            return Some(destination_base(&live.path, live.location_type));
        }
    }

    let enabled: Vec<&SaveLocation> = current.iter().filter(|l| l.enabled).collect();

    if let Some(recorded) = recorded {
        let wanted = normalize_location_path(&recorded.path).to_lowercase();
        if let Some(live) = enabled.iter().find(|l| {
            l.location_type == recorded.location_type
                && normalize_location_path(&l.path).to_lowercase() == wanted
        }) {
            return Some(destination_base(&live.path, live.location_type));
        }
    }

    if let [only] = enabled.as_slice() {
        return Some(destination_base(&only.path, only.location_type));
    }

    recorded.map(|r| destination_base(&r.path, r.location_type))
}

/// A folder location restores into itself; a file location into its parent.
fn destination_base(path: &str, location_type: SaveLocationType) -> PathBuf {
    let path = Path::new(path);
    match location_type {
        SaveLocationType::Folder => path.to_path_buf(),
        SaveLocationType::File => path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| path.to_path_buf()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::manifest::ManifestLocation;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn live(id: &str, path: &str, location_type: SaveLocationType, enabled: bool) -> SaveLocation {
        SaveLocation {
            id: id.to_string(),
            game_id: "game-1".to_string(),
            path: path.to_string(),
            location_type,
            auto_detected: false,
            enabled,
        }
    }

    fn manifest_with(id: &str, path: &str, location_type: SaveLocationType) -> SnapshotManifest {
        let mut locations = BTreeMap::new();
        locations.insert(
            id.to_string(),
            ManifestLocation {
                path: path.to_string(),
                location_type,
                auto_detected: false,
                enabled: true,
                storage_folder: Some("Saves".to_string()),
            },
        );
        SnapshotManifest::new("snap-1", Utc::now(), SnapshotReason::Manual, locations)
    }

    #[test]
    fn test_same_id_wins() {
        let manifest = manifest_with("loc-1", "/old/Saves", SaveLocationType::Folder);
        let current = vec![
            live("loc-2", "/other", SaveLocationType::Folder, true),
            live("loc-1", "/moved/Saves", SaveLocationType::Folder, true),
        ];
        assert_eq!(
            resolve_destination("loc-1", &manifest, &current),
            Some(PathBuf::from("/moved/Saves"))
        );
    }

    #[test]
    fn test_type_change_falls_through_to_path_match() {
        let manifest = manifest_with("loc-1", "/games/Saves", SaveLocationType::Folder);
        let current = vec![
            live("loc-1", "/games/Saves/slot.sav", SaveLocationType::File, true),
            live("loc-9", "/games/./Saves", SaveLocationType::Folder, true),
        ];
        assert_eq!(
            resolve_destination("loc-1", &manifest, &current),
            Some(PathBuf::from("/games/./Saves"))
        );
    }

    #[test]
    fn test_single_enabled_location_is_used() {
        let manifest = manifest_with("loc-old", "/old/Saves", SaveLocationType::Folder);
        let current = vec![
            live("loc-new", "/new/Saves", SaveLocationType::Folder, true),
            live("loc-off", "/disabled", SaveLocationType::Folder, false),
        ];
        assert_eq!(
            resolve_destination("loc-old", &manifest, &current),
            Some(PathBuf::from("/new/Saves"))
        );
    }

    #[test]
    fn test_manifest_path_is_last_resort() {
        let manifest = manifest_with("loc-old", "/old/Config/user.cfg", SaveLocationType::File);
        let current = vec![
            live("a", "/a", SaveLocationType::Folder, true),
            live("b", "/b", SaveLocationType::Folder, true),
        ];
        assert_eq!(
            resolve_destination("loc-old", &manifest, &current),
            Some(PathBuf::from("/old/Config"))
        );
        assert_eq!(resolve_destination("loc-unknown", &manifest, &current), None);
    }
}
