//! The `snapshot.manifest.json` file stored at the root of every snapshot
//! directory, and the path guard applied to everything read from it.
//!
//! The manifest is the durable record of a snapshot: the disk scan rebuilds
//! library rows from it, and restore uses its copy of each save location
//! when the live location has changed.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::hashing::hash_text;
use super::{BackupError, BackupResult};
use crate::database::models::*;

pub const MANIFEST_FILE_NAME: &str = "snapshot.manifest.json";
pub const MANIFEST_VERSION: u32 = 2;

static DRIVE_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z]:").unwrap());

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub version: u32,
    pub snapshot_id: String,
    pub created_at: DateTime<Utc>,
    pub reason: SnapshotReason,
    pub locations: BTreeMap<String, ManifestLocation>,
}

/// A save location as it was when the snapshot was taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestLocation {
    pub path: String,
    #[serde(rename = "type")]
    pub location_type: SaveLocationType,
    #[serde(default)]
    pub auto_detected: bool,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// Subdirectory of the snapshot holding this location's files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_folder: Option<String>,
}

fn enabled_by_default() -> bool {
    true
}

impl SnapshotManifest {
    pub fn new(
        snapshot_id: impl Into<String>,
        created_at: DateTime<Utc>,
        reason: SnapshotReason,
        locations: BTreeMap<String, ManifestLocation>,
    ) -> Self {
        Self {
            version: MANIFEST_VERSION,
            snapshot_id: snapshot_id.into(),
            created_at,
            reason,
            locations,
        }
    }

    /// Storage folder for a location; the location id when none is recorded
    /// or the location is absent from the manifest.
    pub fn storage_folder_for<'a>(&'a self, location_id: &'a str) -> &'a str {
        self.locations
            .get(location_id)
            .and_then(|l| l.storage_folder.as_deref())
            .unwrap_or(location_id)
    }

    /// Where a snapshot file lives under `snapshot_root`. Fails when either
    /// the storage folder or the relative path would leave that root.
    pub fn stored_file_path(&self, snapshot_root: &Path, file: &SnapshotFile) -> BackupResult<PathBuf> {
        let storage_dir = resolve_within(snapshot_root, self.storage_folder_for(&file.location_id))?;
        resolve_within(&storage_dir, &file.relative_path)
    }

    /// Deterministic text describing the snapshot and its file set.
    pub fn summary(&self, files: &[SnapshotFile]) -> String {
        let mut lines = vec![
            format!("snapshot:{}", self.snapshot_id),
            format!("created_at:{}", self.created_at.timestamp_millis()),
            format!("reason:{}", self.reason),
        ];

        for (id, location) in &self.locations {
            lines.push(format!(
                "location:{}|{}|{}|{}",
                id,
                location.location_type.as_str(),
                self.storage_folder_for(id),
                location.path
            ));
        }

        let mut entries: Vec<String> = files
            .iter()
            .map(|f| {
                format!(
                    "file:{}|{}|{}|{}",
                    f.location_id, f.relative_path, f.size_bytes, f.checksum
                )
            })
            .collect();
        entries.sort();
        lines.extend(entries);

        lines.join("\n")
    }

    /// Snapshot checksum: SHA-256 of [`Self::summary`].
    pub fn checksum(&self, files: &[SnapshotFile]) -> String {
        hash_text(&self.summary(files))
    }
}

pub fn manifest_path(snapshot_root: &Path) -> PathBuf {
    snapshot_root.join(MANIFEST_FILE_NAME)
}

pub async fn write_manifest(snapshot_root: &Path, manifest: &SnapshotManifest) -> BackupResult<()> {
    let content = serde_json::to_string_pretty(manifest)?;
    tokio::fs::write(manifest_path(snapshot_root), content).await?;
    Ok(())
}

/// Reads the manifest of a snapshot directory and checks that every storage
/// folder it names stays inside the directory.
pub async fn load_manifest(snapshot_root: &Path) -> BackupResult<SnapshotManifest> {
    let path = manifest_path(snapshot_root);
    let invalid = || BackupError::ManifestInvalid(path.clone());

    let raw = tokio::fs::read_to_string(&path).await.map_err(|_| invalid())?;
    let manifest: SnapshotManifest = serde_json::from_str(&raw).map_err(|e| {
        tracing::debug!(path = %path.display(), error = %e, "Manifest does not parse");
        invalid()
    })?;

    if manifest.version == 0
        || manifest.version > MANIFEST_VERSION
        || manifest.snapshot_id.trim().is_empty()
    {
        return Err(invalid());
    }

    for id in manifest.locations.keys() {
        resolve_within(snapshot_root, manifest.storage_folder_for(id))?;
    }

    Ok(manifest)
}

/// Joins a relative path onto `root`, refusing anything that could land
/// outside it.
///
/// Both `/` and `\` separate components regardless of host, so a path
/// written on one platform is checked the same way on another. Absolute
/// paths, UNC paths, a leading drive prefix such as `C:`, and `..` that
/// climbs above `root` are rejected. Elsewhere a `:` is only refused on
/// Windows, where it names an alternate data stream.
pub fn resolve_within(root: &Path, relative: &str) -> BackupResult<PathBuf> {
    if relative.starts_with('/') || relative.starts_with('\\') || DRIVE_PREFIX.is_match(relative) {
        return Err(BackupError::PathEscape);
    }

    let mut resolved = root.to_path_buf();
    let mut depth = 0usize;
    for part in relative.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => {
                if depth == 0 {
                    return Err(BackupError::PathEscape);
                }
                resolved.pop();
                depth -= 1;
            }
            name if cfg!(windows) && name.contains(':') => return Err(BackupError::PathEscape),
            name => {
                resolved.push(name);
                depth += 1;
            }
        }
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn location(path: &str, storage_folder: Option<&str>) -> ManifestLocation {
        ManifestLocation {
            path: path.to_string(),
            location_type: SaveLocationType::Folder,
            auto_detected: false,
            enabled: true,
            storage_folder: storage_folder.map(str::to_string),
        }
    }

    fn file(location_id: &str, relative_path: &str, checksum: &str) -> SnapshotFile {
        SnapshotFile {
            id: uuid::Uuid::new_v4().to_string(),
            snapshot_id: "snap-1".to_string(),
            location_id: location_id.to_string(),
            relative_path: relative_path.to_string(),
            size_bytes: 4,
            checksum: checksum.to_string(),
        }
    }

    #[test]
    fn test_resolve_within_accepts_nested_paths() {
        let root = Path::new("/backups/snap");
        let resolved = resolve_within(root, "Saves/profile\\slot1.sav").unwrap();
        assert_eq!(resolved, root.join("Saves").join("profile").join("slot1.sav"));
        assert_eq!(resolve_within(root, "a/../b").unwrap(), root.join("b"));
    }

    #[test]
    fn test_resolve_within_rejects_escapes() {
        let root = Path::new("/backups/snap");
        for bad in ["..\\..\\outside", "../x", "a/../../x", "/etc/passwd", "\\\\server\\share", "C:\\Windows"] {
            assert!(
                matches!(resolve_within(root, bad), Err(BackupError::PathEscape)),
                "{bad} should be rejected"
            );
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_within_allows_colons_inside_names() {
        let root = Path::new("/backups/snap");
        assert_eq!(
            resolve_within(root, "autosave 12:30.sav").unwrap(),
            root.join("autosave 12:30.sav")
        );
        assert_eq!(
            resolve_within(root, "Saves/C:copy.sav").unwrap(),
            root.join("Saves").join("C:copy.sav")
        );
        assert!(matches!(resolve_within(root, "d:slot.sav"), Err(BackupError::PathEscape)));
    }

    #[test]
    fn test_storage_folder_falls_back_to_location_id() {
        let mut locations = BTreeMap::new();
        locations.insert("loc-1".to_string(), location("/saves", None));
        locations.insert("loc-2".to_string(), location("/other", Some("Other")));
        let manifest = SnapshotManifest::new("snap-1", Utc::now(), SnapshotReason::Manual, locations);

        assert_eq!(manifest.storage_folder_for("loc-1"), "loc-1");
        assert_eq!(manifest.storage_folder_for("loc-2"), "Other");
        assert_eq!(manifest.storage_folder_for("loc-gone"), "loc-gone");
    }

    #[test]
    fn test_checksum_ignores_file_order() {
        let manifest = SnapshotManifest::new("snap-1", Utc::now(), SnapshotReason::Auto, BTreeMap::new());
        let a = file("loc-1", "a.sav", "aa");
        let b = file("loc-1", "b.sav", "bb");

        assert_eq!(
            manifest.checksum(&[a.clone(), b.clone()]),
            manifest.checksum(&[b.clone(), a.clone()])
        );
        assert_ne!(manifest.checksum(&[a.clone()]), manifest.checksum(&[a, b]));
    }

    #[tokio::test]
    async fn test_write_then_load() {
        let temp_dir = TempDir::new().unwrap();
        let mut locations = BTreeMap::new();
        locations.insert("loc-1".to_string(), location("/saves", Some("Saves")));
        let manifest = SnapshotManifest::new("snap-1", Utc::now(), SnapshotReason::PreRestore, locations);

        write_manifest(temp_dir.path(), &manifest).await.unwrap();
        let loaded = load_manifest(temp_dir.path()).await.unwrap();
        assert_eq!(loaded.snapshot_id, "snap-1");
        assert_eq!(loaded.reason, SnapshotReason::PreRestore);
        assert_eq!(loaded.storage_folder_for("loc-1"), "Saves");
    }

    #[tokio::test]
    async fn test_load_rejects_missing_and_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        assert!(matches!(
            load_manifest(temp_dir.path()).await,
            Err(BackupError::ManifestInvalid(_))
        ));

        std::fs::write(manifest_path(temp_dir.path()), "{ not json").unwrap();
        let err = load_manifest(temp_dir.path()).await.unwrap_err();
        assert_eq!(err.to_string(), "Snapshot manifest is missing or invalid.");
    }

    #[tokio::test]
    async fn test_load_rejects_escaping_storage_folder() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            manifest_path(temp_dir.path()),
            r#"{
                "version": 2,
                "snapshot_id": "snap-evil",
                "created_at": "2026-02-07T10:11:12.123Z",
                "reason": "manual",
                "locations": {
                    "loc-1": { "path": "C:\\Saves", "type": "folder", "storage_folder": "..\\..\\outside" }
                }
            }"#,
        )
        .unwrap();

        assert!(matches!(
            load_manifest(temp_dir.path()).await,
            Err(BackupError::PathEscape)
        ));
    }
}
