use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::database::models::*;

pub const DATABASE_VERSION: u32 = 2;

/// Whole-library document persisted as `library.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryState {
    pub schema_version: u32,
    pub games: Vec<Game>,
    pub save_locations: Vec<SaveLocation>,
    pub snapshots: Vec<Snapshot>,
    pub snapshot_files: Vec<SnapshotFile>,
    pub event_logs: Vec<EventLog>,
}

impl Default for LibraryState {
    fn default() -> Self {
        Self {
            schema_version: DATABASE_VERSION,
            games: Vec::new(),
            save_locations: Vec::new(),
            snapshots: Vec::new(),
            snapshot_files: Vec::new(),
            event_logs: Vec::new(),
        }
    }
}

pub struct DatabaseSchema;

impl DatabaseSchema {
    /// Parses a stored library document, keeping every well-formed record.
    ///
    /// Unparseable text yields an empty library. A record that fails to
    /// deserialize is dropped on its own so one bad row cannot take the rest
    /// of the library down with it.
    pub fn parse(raw: &str) -> LibraryState {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => Self::normalize(&value),
            Err(e) => {
                tracing::warn!(error = %e, "Library state is not valid JSON, starting empty");
                LibraryState::default()
            }
        }
    }

    pub fn normalize(input: &Value) -> LibraryState {
        let schema_version = input
            .get("schemaVersion")
            .and_then(Value::as_u64)
            .map(|v| v as u32)
            .unwrap_or(DATABASE_VERSION);

        let save_locations = input
            .get("saveLocations")
            .and_then(Value::as_array)
            .map(|rows| {
                rows.iter()
                    .cloned()
                    .map(Self::coerce_location_flags)
                    .filter_map(|row| serde_json::from_value::<SaveLocation>(row).ok())
                    .collect()
            })
            .unwrap_or_default();

        let state = LibraryState {
            schema_version,
            games: Self::records(input, "games"),
            save_locations,
            snapshots: Self::records(input, "snapshots"),
            snapshot_files: Self::records(input, "snapshotFiles"),
            event_logs: Self::records(input, "eventLogs"),
        };

        if schema_version != DATABASE_VERSION {
            tracing::info!(
                from = schema_version,
                to = DATABASE_VERSION,
                "Library state schema version differs, records normalized in place"
            );
        }

        LibraryState {
            schema_version: DATABASE_VERSION,
            ..state
        }
    }

    fn records<T: DeserializeOwned>(input: &Value, key: &str) -> Vec<T> {
        let Some(rows) = input.get(key).and_then(Value::as_array) else {
            return Vec::new();
        };

        let parsed: Vec<T> = rows
            .iter()
            .filter_map(|row| serde_json::from_value::<T>(row.clone()).ok())
            .collect();

        if parsed.len() != rows.len() {
            tracing::warn!(
                collection = key,
                dropped = rows.len() - parsed.len(),
                "Dropped malformed records while loading library state"
            );
        }
        parsed
    }

    // Older exports stored the location flags as 0/1.
    fn coerce_location_flags(mut row: Value) -> Value {
        if let Some(object) = row.as_object_mut() {
            for key in ["auto_detected", "enabled"] {
                let coerced = match object.get(key) {
                    Some(Value::Number(n)) => Some(n.as_f64().map(|v| v != 0.0).unwrap_or(false)),
                    Some(Value::String(s)) => Some(!s.is_empty()),
                    Some(Value::Null) => Some(false),
                    _ => None,
                };
                if let Some(flag) = coerced {
                    object.insert(key.to_string(), Value::Bool(flag));
                }
            }
        }
        row
    }
}
