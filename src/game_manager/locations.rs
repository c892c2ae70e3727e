use std::path::{Component, Path, PathBuf};

use crate::database::models::*;
use crate::database::LibraryDatabase;
use crate::game_manager::GameError;

pub struct Locations;

impl Locations {
    /// List a game's save locations sorted by path, with `exists` probed now.
    pub async fn list(db: &LibraryDatabase, game_id: &str) -> Vec<SaveLocationView> {
        let mut rows = db.save_locations(game_id).await;
        rows.sort_by(|a, b| a.path.cmp(&b.path));
        rows.into_iter().map(SaveLocationView::from).collect()
    }

    /// Register a save location. A path already registered for the game
    /// (compared case-insensitively) returns the existing record.
    pub async fn add(
        db: &LibraryDatabase,
        game_id: &str,
        location_path: &str,
        auto_detected: bool,
    ) -> Result<SaveLocationView, GameError> {
        let normalized = normalize_location_path(location_path.trim());
        if normalized.is_empty() {
            return Err(GameError::Validation("Save location path is required".to_string()));
        }

        let location_type = resolve_location_type(Path::new(&normalized));
        let game_id = game_id.to_string();

        let location = db
            .mutate(move |state| {
                let lowered = normalized.to_lowercase();
                if let Some(existing) = state
                    .save_locations
                    .iter()
                    .find(|l| l.game_id == game_id && l.path.to_lowercase() == lowered)
                {
                    return existing.clone();
                }
                let row = SaveLocation {
                    id: uuid::Uuid::new_v4().to_string(),
                    game_id,
                    path: normalized,
                    location_type,
                    auto_detected,
                    enabled: true,
                };
                state.save_locations.push(row.clone());
                row
            })
            .await?;

        tracing::info!(
            location_id = %location.id,
            path = %location.path,
            kind = location.location_type.as_str(),
            "Save location registered"
        );
        Ok(SaveLocationView::from(location))
    }

    pub async fn toggle(db: &LibraryDatabase, location_id: &str, enabled: bool) -> Result<(), GameError> {
        let location_id = location_id.to_string();
        db.mutate(move |state| {
            if let Some(row) = state.save_locations.iter_mut().find(|l| l.id == location_id) {
                row.enabled = enabled;
            }
        })
        .await?;
        Ok(())
    }

    /// Removing a location never touches snapshots; they keep their own copy
    /// of the location record in the manifest.
    pub async fn remove(db: &LibraryDatabase, location_id: &str) -> Result<(), GameError> {
        let location_id = location_id.to_string();
        db.mutate(move |state| state.save_locations.retain(|l| l.id != location_id))
            .await?;
        Ok(())
    }
}

pub fn resolve_location_type(path: &Path) -> SaveLocationType {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => SaveLocationType::File,
        _ => SaveLocationType::Folder,
    }
}

/// Lexically normalizes a path: drops `.` components and folds `..` into the
/// preceding component. The filesystem is not consulted.
pub fn normalize_location_path(location_path: &str) -> String {
    if location_path.is_empty() {
        return String::new();
    }

    let mut normalized = PathBuf::new();
    for component in Path::new(location_path).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let can_pop = matches!(
                    normalized.components().next_back(),
                    Some(Component::Normal(_))
                );
                if can_pop {
                    normalized.pop();
                } else if !normalized.has_root() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }

    if normalized.as_os_str().is_empty() {
        ".".to_string()
    } else {
        normalized.to_string_lossy().into_owned()
    }
}
