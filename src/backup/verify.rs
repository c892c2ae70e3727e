use std::path::PathBuf;

use super::hashing::hash_file;
use super::manifest;
use super::{BackupEngine, BackupResult, VerifyResult};
use crate::database::models::Snapshot;

impl BackupEngine {
    /// Counts files that are missing or whose content no longer matches the
    /// recorded checksum. Nothing is modified.
    pub(crate) async fn verify_unlocked(&self, snapshot: &Snapshot) -> BackupResult<VerifyResult> {
        let snapshot_root = PathBuf::from(&snapshot.storage_path);
        let manifest = manifest::load_manifest(&snapshot_root).await?;

        let mut issues = 0;
        for file in self.db.snapshot_files(&snapshot.id).await {
            let stored = manifest.stored_file_path(&snapshot_root, &file)?;
            match hash_file(&stored).await {
                Ok(checksum) if checksum == file.checksum => {}
                Ok(_) => {
                    tracing::warn!(path = %stored.display(), "Checksum mismatch");
                    issues += 1;
                }
                Err(e) => {
                    tracing::warn!(path = %stored.display(), error = %e, "Snapshot file unreadable");
                    issues += 1;
                }
            }
        }

        tracing::info!(snapshot_id = %snapshot.id, issues, "Snapshot verified");
        Ok(VerifyResult {
            ok: issues == 0,
            issues,
        })
    }
}
