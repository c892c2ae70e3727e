//! GameSaver: snapshot backups for the save data of standalone PC games.
//!
//! The library is a single JSON document under the data root; snapshot
//! contents live under the storage root, one folder per game:
//!
//! ```text
//! <storage_root>/<game folder>/metadata.json
//! <storage_root>/<game folder>/Snapshots/<YYYY-MM-DD_HH-MM-SS-mmm>/snapshot.manifest.json
//! <storage_root>/<game folder>/Snapshots/<YYYY-MM-DD_HH-MM-SS-mmm>/<storage folder>/...
//! ```

pub mod backup;
pub mod database;
pub mod game_manager;
pub mod logger;
pub mod settings;

pub use backup::{
    BackupEngine, BackupError, BackupProgress, BackupResult, BackupScanResult, ProgressStage,
    RestoreReport, VerifyResult,
};
pub use database::{DatabasePaths, LibraryDatabase};
pub use game_manager::{GameError, GameManager};
pub use settings::Settings;
