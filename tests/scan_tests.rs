// Integration tests for rebuilding the library from snapshot folders on disk

use chrono::Utc;
use gamesaver::backup::manifest::manifest_path;
use gamesaver::database::models::*;
use gamesaver::database::LibraryState;
use gamesaver::game_manager::locations::Locations;
use gamesaver::game_manager::storage;
use gamesaver::{BackupEngine, BackupScanResult, LibraryDatabase, Settings};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

fn game(id: &str, name: &str, folder_name: &str) -> Game {
    Game {
        id: id.to_string(),
        name: name.to_string(),
        install_path: String::new(),
        exe_path: String::new(),
        created_at: Utc::now(),
        last_seen_at: None,
        status: GameStatus::Protected,
        folder_name: folder_name.to_string(),
    }
}

fn engine_with(state: LibraryState, settings: &Settings) -> (Arc<LibraryDatabase>, BackupEngine) {
    let db = Arc::new(LibraryDatabase::in_memory(state));
    let engine = BackupEngine::new(db.clone(), settings.clone());
    (db, engine)
}

fn write_file(path: &Path, content: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn write_manifest(snapshot_root: &Path, snapshot_id: &str, location_id: &str, storage_folder: &str) {
    write_file(
        &manifest_path(snapshot_root),
        &serde_json::json!({
            "version": 2,
            "snapshot_id": snapshot_id,
            "created_at": "2026-02-07T10:11:12.123Z",
            "reason": "manual",
            "locations": {
                location_id: {
                    "path": "C:\\Users\\Player\\Documents\\Age3",
                    "type": "folder",
                    "auto_detected": false,
                    "enabled": true,
                    "storage_folder": storage_folder
                }
            }
        })
        .to_string(),
    );
}

fn settings_in(temp_dir: &TempDir) -> Settings {
    let settings = Settings::with_data_root(temp_dir.path().join("data"));
    std::fs::create_dir_all(&settings.storage_root).unwrap();
    settings
}

#[tokio::test]
async fn test_scan_imports_manifest_snapshot_for_known_game() {
    let temp_dir = TempDir::new().unwrap();
    let settings = settings_in(&temp_dir);
    let snapshot_root = storage::snapshot_root(&settings.storage_root, "game-1", "2026-02-07_10-11-12-123");
    write_file(&snapshot_root.join("Documents").join("profile1.sav"), "save-content");
    write_manifest(&snapshot_root, "snap-manifest-id", "loc-docs", "Documents");

    let state = LibraryState {
        games: vec![game("game-1", "Age3", "game-1")],
        ..LibraryState::default()
    };
    let (db, engine) = engine_with(state, &settings);

    let result = engine.scan_snapshots_from_disk().await.unwrap();

    assert_eq!(result.added_snapshots, 1);
    let snapshots = db.snapshots(None).await;
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].id, "snap-manifest-id");
    assert_eq!(snapshots[0].game_id, "game-1");
    assert_eq!(snapshots[0].reason, SnapshotReason::Manual);
    assert_eq!(PathBuf::from(&snapshots[0].storage_path), snapshot_root);
    assert_eq!(snapshots[0].size_bytes, "save-content".len() as u64);

    let files = db.snapshot_files("snap-manifest-id").await;
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].location_id, "loc-docs");
    assert_eq!(files[0].relative_path, "profile1.sav");

    let locations = db.save_locations("game-1").await;
    assert_eq!(locations.len(), 1);
    assert_eq!(locations[0].id, "loc-docs");
    assert_eq!(locations[0].path, "C:\\Users\\Player\\Documents\\Age3");
    assert!(locations[0].enabled);
}

#[tokio::test]
async fn test_scan_recovers_game_from_metadata() {
    let temp_dir = TempDir::new().unwrap();
    let settings = settings_in(&temp_dir);
    let game_root = storage::game_root(&settings.storage_root, "Legacy Game");
    write_file(
        &storage::metadata_path(&game_root),
        &serde_json::json!({
            "id": "game-recovered",
            "name": "Legacy Game",
            "install_path": "C:\\Games\\Legacy",
            "exe_path": "C:\\Games\\Legacy\\legacy.exe",
            "created_at": "2025-10-10T10:00:00.000Z"
        })
        .to_string(),
    );
    let snapshot_root = storage::snapshot_root(&settings.storage_root, "Legacy Game", "2026-02-07_10-11-12-123");
    write_file(&snapshot_root.join("Documents").join("save-a.sav"), "save-content");
    write_manifest(&snapshot_root, "snap-recovered", "loc-docs", "Documents");

    let (db, engine) = engine_with(LibraryState::default(), &settings);
    let result = engine.scan_snapshots_from_disk().await.unwrap();

    assert_eq!(result.skipped_unknown_games, 0);
    assert_eq!(result.added_snapshots, 1);
    let games = db.games().await;
    assert_eq!(games.len(), 1);
    assert_eq!(games[0].id, "game-recovered");
    assert_eq!(games[0].folder_name, "Legacy Game");
    assert_eq!(db.save_locations("game-recovered").await[0].id, "loc-docs");
}

#[tokio::test]
async fn test_scan_counts_unknown_and_invalid_folders_and_drops_stale_rows() {
    let temp_dir = TempDir::new().unwrap();
    let settings = settings_in(&temp_dir);

    let unknown_root = storage::snapshot_root(&settings.storage_root, "unknown-game", "snap-unknown");
    write_file(&unknown_root.join("loc").join("ghost.sav"), "ghost");
    write_manifest(&unknown_root, "snap-unknown-id", "loc-ghost", "loc");
    let invalid_root = storage::snapshot_root(&settings.storage_root, "game-2", "snap-empty");
    std::fs::create_dir_all(&invalid_root).unwrap();

    let stale_path = storage::snapshot_root(&settings.storage_root, "game-1", "gone");
    let state = LibraryState {
        games: vec![game("game-1", "One", "game-1"), game("game-2", "Two", "game-2")],
        snapshots: vec![Snapshot {
            id: "snap-db-only".to_string(),
            game_id: "game-1".to_string(),
            created_at: Utc::now(),
            size_bytes: 4,
            checksum: String::new(),
            storage_path: stale_path.to_string_lossy().into_owned(),
            reason: SnapshotReason::Auto,
        }],
        snapshot_files: vec![SnapshotFile {
            id: "file-1".to_string(),
            snapshot_id: "snap-db-only".to_string(),
            location_id: "loc-1".to_string(),
            relative_path: "a.sav".to_string(),
            size_bytes: 4,
            checksum: String::new(),
        }],
        ..LibraryState::default()
    };
    let (db, engine) = engine_with(state, &settings);

    let result = engine.scan_snapshots_from_disk().await.unwrap();

    assert_eq!(
        result,
        BackupScanResult {
            added_snapshots: 0,
            removed_snapshots: 1,
            removed_snapshot_files: 1,
            skipped_unknown_games: 1,
            skipped_invalid_snapshots: 1,
        }
    );
    assert!(db.snapshots(None).await.is_empty());
    assert!(db.snapshot("snap-unknown-id").await.is_none());
    let state = db.state().await;
    assert!(state.snapshot_files.is_empty());
    assert!(state.save_locations.is_empty());
    assert_eq!(state.games.len(), 2);

    // Anomalies stay on disk for manual inspection.
    assert!(unknown_root.join("loc").join("ghost.sav").is_file());
    assert!(manifest_path(&unknown_root).is_file());
    assert!(invalid_root.is_dir());
}

#[tokio::test]
async fn test_scan_of_engine_output_is_idempotent_and_checksums_match() {
    let temp_dir = TempDir::new().unwrap();
    let settings = settings_in(&temp_dir);
    let saves = temp_dir.path().join("live").join("Saves");
    write_file(&saves.join("slot1.sav"), "first slot");
    write_file(&saves.join("nested").join("slot2.sav"), "second slot");

    // Build real snapshots with one library...
    let (original_db, original_engine) = engine_with(
        LibraryState {
            games: vec![game("game-portal", "Portal", "Portal")],
            ..LibraryState::default()
        },
        &settings,
    );
    Locations::add(&original_db, "game-portal", saves.to_str().unwrap(), false)
        .await
        .unwrap();
    let mut created = Vec::new();
    for _ in 0..2 {
        created.push(
            original_engine
                .backup_game("game-portal", SnapshotReason::Manual)
                .await
                .unwrap()
                .unwrap(),
        );
    }

    // ...then rebuild an empty one from disk.
    let (db, engine) = engine_with(LibraryState::default(), &settings);
    let first = engine.scan_snapshots_from_disk().await.unwrap();
    assert_eq!(first.added_snapshots, 2);
    assert_eq!(first.skipped_unknown_games, 0);
    assert_eq!(first.skipped_invalid_snapshots, 0);

    for snapshot in &created {
        let imported = db.snapshot(&snapshot.id).await.expect("snapshot imported");
        assert_eq!(imported.checksum, snapshot.checksum);
        assert_eq!(imported.size_bytes, snapshot.size_bytes);
        assert_eq!(imported.storage_path, snapshot.storage_path);
    }
    assert_eq!(db.games().await[0].id, "game-portal");
    assert_eq!(db.save_locations("game-portal").await.len(), 1);

    let second = engine.scan_snapshots_from_disk().await.unwrap();
    assert_eq!(second, BackupScanResult::default());

    let verify = engine.verify_snapshot(&created[0].id).await.unwrap();
    assert!(verify.ok);
}

#[tokio::test]
async fn test_scan_repoints_moved_snapshot_folder() {
    let temp_dir = TempDir::new().unwrap();
    let settings = settings_in(&temp_dir);
    let old_root = storage::snapshot_root(&settings.storage_root, "game-1", "old-name");
    let new_root = storage::snapshot_root(&settings.storage_root, "game-1", "new-name");
    write_file(&new_root.join("Documents").join("profile1.sav"), "save-content");
    write_manifest(&new_root, "snap-1", "loc-docs", "Documents");

    let state = LibraryState {
        games: vec![game("game-1", "Age3", "game-1")],
        snapshots: vec![Snapshot {
            id: "snap-1".to_string(),
            game_id: "game-1".to_string(),
            created_at: Utc::now(),
            size_bytes: 12,
            checksum: String::new(),
            storage_path: old_root.to_string_lossy().into_owned(),
            reason: SnapshotReason::Manual,
        }],
        ..LibraryState::default()
    };
    let (db, engine) = engine_with(state, &settings);

    let result = engine.scan_snapshots_from_disk().await.unwrap();

    assert_eq!(result, BackupScanResult::default());
    let snapshot = db.snapshot("snap-1").await.unwrap();
    assert_eq!(PathBuf::from(snapshot.storage_path), new_root);
}

#[tokio::test]
async fn test_scan_keeps_rows_when_storage_root_is_missing() {
    let temp_dir = TempDir::new().unwrap();
    let settings = Settings::with_data_root(temp_dir.path().join("unplugged"));
    let state = LibraryState {
        games: vec![game("game-1", "One", "game-1")],
        snapshots: vec![Snapshot {
            id: "snap-1".to_string(),
            game_id: "game-1".to_string(),
            created_at: Utc::now(),
            size_bytes: 1,
            checksum: String::new(),
            storage_path: settings.storage_root.join("game-1").to_string_lossy().into_owned(),
            reason: SnapshotReason::Auto,
        }],
        ..LibraryState::default()
    };
    let (db, engine) = engine_with(state, &settings);

    let result = engine.scan_snapshots_from_disk().await.unwrap();

    assert_eq!(result, BackupScanResult::default());
    assert!(db.snapshot("snap-1").await.is_some());
}
