use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::database::connection::DatabasePaths;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Application settings, stored camelCase in `<data_root>/settings.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Interval for the automatic backup timer (owned by the host application).
    pub backup_frequency_minutes: u32,
    /// Snapshots kept per game.
    pub retention_count: usize,
    pub storage_root: PathBuf,
    /// Stored for the host application; snapshots are never compressed.
    pub compression_enabled: bool,
    pub data_root: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        let data_root = DatabasePaths::default_app_data_dir();
        Self {
            backup_frequency_minutes: 5,
            retention_count: 10,
            storage_root: DatabasePaths::backup_directory(&data_root),
            compression_enabled: false,
            data_root,
        }
    }
}

impl Settings {
    /// Defaults rooted at `data_root`.
    pub fn with_data_root(data_root: impl Into<PathBuf>) -> Self {
        let data_root = data_root.into();
        Self {
            storage_root: DatabasePaths::backup_directory(&data_root),
            data_root,
            ..Self::default()
        }
    }

    /// Loads settings for `data_root`, falling back to defaults when the file
    /// is missing or unreadable. Missing fields take their default values.
    pub fn load(data_root: &Path) -> Self {
        let path = DatabasePaths::settings_file(data_root);
        let defaults = Self::with_data_root(data_root);

        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(_) => return defaults,
        };

        match serde_json::from_str::<serde_json::Value>(&raw) {
            Ok(serde_json::Value::Object(stored)) => {
                let mut merged = match serde_json::to_value(&defaults) {
                    Ok(serde_json::Value::Object(map)) => map,
                    _ => return defaults,
                };
                merged.extend(stored);
                serde_json::from_value(serde_json::Value::Object(merged)).unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "Invalid settings file, using defaults");
                    defaults
                })
            }
            _ => {
                tracing::warn!(path = %path.display(), "Settings file is not a JSON object, using defaults");
                defaults
            }
        }
    }

    pub fn save(&self) -> Result<(), SettingsError> {
        std::fs::create_dir_all(&self.data_root)?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(DatabasePaths::settings_file(&self.data_root), content)?;
        Ok(())
    }

    /// Retention as applied by the engine; always keeps at least one snapshot.
    pub fn effective_retention(&self) -> usize {
        self.retention_count.max(1)
    }
}
