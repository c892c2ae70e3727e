use std::path::Path;

use super::copier::remove_dir_safe;
use super::{BackupEngine, BackupResult};
use crate::database::connection::remove_snapshot_rows;
use crate::database::models::Snapshot;

impl BackupEngine {
    /// Keeps the newest `retention` snapshots of a game and deletes the rest,
    /// except those listed in `protected`. A snapshot whose directory cannot
    /// be removed keeps its rows. Returns the ids that were deleted.
    pub(crate) async fn apply_retention(
        &self,
        game_id: &str,
        retention: usize,
        protected: &[&str],
    ) -> BackupResult<Vec<String>> {
        let expired: Vec<Snapshot> = self
            .db
            .snapshots(Some(game_id))
            .await
            .into_iter()
            .skip(retention.max(1))
            .filter(|s| !protected.contains(&s.id.as_str()))
            .collect();

        let mut removed = Vec::with_capacity(expired.len());
        for snapshot in expired {
            match remove_dir_safe(Path::new(&snapshot.storage_path)).await {
                Ok(()) => removed.push(snapshot.id),
                Err(e) => tracing::warn!(
                    snapshot_id = %snapshot.id,
                    path = %snapshot.storage_path,
                    error = %e,
                    "Retention could not remove snapshot directory, keeping it"
                ),
            }
        }

        if !removed.is_empty() {
            let ids = removed.clone();
            self.db
                .mutate(move |state| {
                    for id in &ids {
                        remove_snapshot_rows(state, id);
                    }
                })
                .await?;
            tracing::info!(game_id, count = removed.len(), "Retention removed old snapshots");
        }

        Ok(removed)
    }

    pub(crate) async fn delete_unlocked(&self, snapshot: &Snapshot) -> BackupResult<()> {
        remove_dir_safe(Path::new(&snapshot.storage_path)).await?;
        self.db.delete_snapshot(&snapshot.id).await?;
        tracing::info!(snapshot_id = %snapshot.id, game_id = %snapshot.game_id, "Snapshot deleted");
        Ok(())
    }
}
