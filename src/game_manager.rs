pub mod detection;
pub mod events;
pub mod locations;
pub mod storage;

use chrono::{DateTime, Utc};

use crate::database::models::*;
use crate::database::{DatabaseError, LibraryDatabase};
use crate::settings::Settings;
use detection::Detection;
use events::log_event;
use locations::Locations;

#[derive(Debug, thiserror::Error)]
pub enum GameError {
    #[error("{0}")]
    Validation(String),

    #[error("Game not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("File system error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct GameManager;

impl GameManager {
    /// Add a game, create its storage folder with `metadata.json`, and
    /// register any conventional save folders that already exist.
    pub async fn add_game(
        db: &LibraryDatabase,
        settings: &Settings,
        request: AddGameRequest,
    ) -> Result<Game, GameError> {
        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(GameError::Validation("Game name is required".to_string()));
        }

        let folder_name = storage::to_safe_folder_name(&name);
        let game_root = storage::game_root(&settings.storage_root, &folder_name);
        let folder_on_disk = tokio::fs::try_exists(&game_root).await.unwrap_or(false);

        let game = Game {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            install_path: request.install_path,
            exe_path: request.exe_path,
            created_at: Utc::now(),
            last_seen_at: None,
            status: GameStatus::Protected,
            folder_name,
        };

        let inserted = game.clone();
        db.mutate(move |state| {
            let lowered = inserted.name.to_lowercase();
            if state.games.iter().any(|g| g.name.to_lowercase() == lowered) {
                return Err(GameError::Validation(
                    "A game with this name already exists.".to_string(),
                ));
            }
            let folder = inserted.folder_name.to_lowercase();
            if state.games.iter().any(|g| g.folder_name.to_lowercase() == folder) {
                return Err(GameError::Validation(
                    "A game folder with this name already exists.".to_string(),
                ));
            }
            if folder_on_disk {
                return Err(GameError::Validation(
                    "A folder with this game name already exists in Backups.".to_string(),
                ));
            }
            state.games.push(inserted);
            Ok(())
        })
        .await??;

        for candidate in Detection::candidate_save_locations(&game.name, &game.install_path) {
            if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
                Locations::add(db, &game.id, &candidate.to_string_lossy(), true).await?;
            }
        }

        storage::write_game_metadata(&settings.storage_root, &game).await?;
        log_event(
            db,
            Some(game.id.as_str()),
            EventLogType::Backup,
            "Game added and initial protection enabled.",
        )
        .await?;

        tracing::info!(game_id = %game.id, name = %game.name, "Game added");
        Ok(game)
    }

    /// Remove a game with every dependent row, then its storage folder.
    pub async fn remove_game(
        db: &LibraryDatabase,
        settings: &Settings,
        game_id: &str,
    ) -> Result<(), GameError> {
        let target = game_id.to_string();
        let removed = db
            .mutate(move |state| {
                let game = state.games.iter().find(|g| g.id == target).cloned()?;
                state.games.retain(|g| g.id != target);
                state.save_locations.retain(|l| l.game_id != target);
                let snapshot_ids: std::collections::HashSet<String> = state
                    .snapshots
                    .iter()
                    .filter(|s| s.game_id == target)
                    .map(|s| s.id.clone())
                    .collect();
                state.snapshots.retain(|s| s.game_id != target);
                state
                    .snapshot_files
                    .retain(|f| !snapshot_ids.contains(&f.snapshot_id));
                state
                    .event_logs
                    .retain(|l| l.game_id.as_deref() != Some(target.as_str()));
                Some(game)
            })
            .await?;

        let Some(game) = removed else {
            return Ok(());
        };

        let game_root = storage::game_root(&settings.storage_root, &game.folder_name);
        if tokio::fs::try_exists(&game_root).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&game_root).await?;
        }
        tracing::info!(game_id = %game.id, "Game removed");
        Ok(())
    }

    pub async fn update_game_status(
        db: &LibraryDatabase,
        game_id: &str,
        status: GameStatus,
    ) -> Result<(), GameError> {
        db.set_game_status(game_id, status).await?;
        Ok(())
    }

    pub async fn update_game_last_seen(
        db: &LibraryDatabase,
        game_id: &str,
        last_seen_at: Option<DateTime<Utc>>,
    ) -> Result<(), GameError> {
        let game_id = game_id.to_string();
        db.mutate(move |state| {
            if let Some(game) = state.games.iter_mut().find(|g| g.id == game_id) {
                game.last_seen_at = last_seen_at;
            }
        })
        .await?;
        Ok(())
    }

    /// All games sorted by name, with their latest snapshot and error count.
    pub async fn list_games(db: &LibraryDatabase) -> Vec<GameSummary> {
        let state = db.state().await;
        let mut games = state.games.clone();
        games.sort_by_key(|g| g.name.to_lowercase());

        games
            .into_iter()
            .map(|game| {
                let latest = state
                    .snapshots
                    .iter()
                    .filter(|s| s.game_id == game.id)
                    .max_by_key(|s| s.created_at);
                let issue_count = state
                    .event_logs
                    .iter()
                    .filter(|l| {
                        l.game_id.as_deref() == Some(game.id.as_str())
                            && l.event_type == EventLogType::Error
                    })
                    .count();
                GameSummary {
                    last_backup_at: latest.map(|s| s.created_at),
                    last_snapshot_reason: latest.map(|s| s.reason),
                    issue_count,
                    game,
                }
            })
            .collect()
    }

    pub async fn game_detail(db: &LibraryDatabase, game_id: &str) -> Result<GameDetail, GameError> {
        let game = db
            .game(game_id)
            .await
            .ok_or_else(|| GameError::NotFound(game_id.to_string()))?;

        let mut event_logs = db.event_logs(Some(game_id)).await;
        event_logs.truncate(50);

        Ok(GameDetail {
            save_locations: Locations::list(db, game_id).await,
            snapshots: db.snapshots(Some(game_id)).await,
            event_logs,
            game,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::LibraryState;
    use tempfile::TempDir;

    fn request(name: &str, install: &str) -> AddGameRequest {
        AddGameRequest {
            name: name.to_string(),
            exe_path: format!("{}/game.exe", install),
            install_path: install.to_string(),
        }
    }

    #[tokio::test]
    async fn test_add_game_writes_metadata_and_detects_saves() {
        let temp_dir = TempDir::new().unwrap();
        let install = temp_dir.path().join("install");
        std::fs::create_dir_all(install.join("Saves")).unwrap();
        let settings = Settings::with_data_root(temp_dir.path().join("data"));
        let db = LibraryDatabase::in_memory(LibraryState::default());

        let game = GameManager::add_game(&db, &settings, request(" Portal ", install.to_str().unwrap()))
            .await
            .unwrap();

        assert_eq!(game.name, "Portal");
        assert_eq!(game.folder_name, "Portal");
        let root = storage::game_root(&settings.storage_root, "Portal");
        let metadata = storage::read_game_metadata(&root).await.unwrap();
        assert_eq!(metadata.id, game.id);

        let locations = db.save_locations(&game.id).await;
        assert_eq!(locations.len(), 1);
        assert!(locations[0].auto_detected);
        assert_eq!(db.event_logs(Some(game.id.as_str())).await.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_names_are_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let settings = Settings::with_data_root(temp_dir.path());
        let db = LibraryDatabase::in_memory(LibraryState::default());

        GameManager::add_game(&db, &settings, request("Portal", "")).await.unwrap();
        let err = GameManager::add_game(&db, &settings, request("PORTAL", ""))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "A game with this name already exists.");
        assert_eq!(db.games().await.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_game_cascades() {
        let temp_dir = TempDir::new().unwrap();
        let settings = Settings::with_data_root(temp_dir.path());
        let db = LibraryDatabase::in_memory(LibraryState::default());
        let game = GameManager::add_game(&db, &settings, request("Portal", "")).await.unwrap();
        Locations::add(&db, &game.id, "/tmp/portal-saves", false).await.unwrap();

        GameManager::remove_game(&db, &settings, &game.id).await.unwrap();

        let state = db.state().await;
        assert!(state.games.is_empty());
        assert!(state.save_locations.is_empty());
        assert!(state.event_logs.is_empty());
        assert!(!storage::game_root(&settings.storage_root, "Portal").exists());
    }

    #[tokio::test]
    async fn test_status_and_last_seen_updates() {
        let temp_dir = TempDir::new().unwrap();
        let settings = Settings::with_data_root(temp_dir.path());
        let db = LibraryDatabase::in_memory(LibraryState::default());
        let game = GameManager::add_game(&db, &settings, request("Portal", "")).await.unwrap();
        let seen = Utc::now();

        GameManager::update_game_status(&db, &game.id, GameStatus::Warning).await.unwrap();
        GameManager::update_game_last_seen(&db, &game.id, Some(seen)).await.unwrap();

        let stored = db.game(&game.id).await.unwrap();
        assert_eq!(stored.status, GameStatus::Warning);
        assert_eq!(stored.last_seen_at, Some(seen));
    }

    #[tokio::test]
    async fn test_list_games_sorted_case_insensitive() {
        let temp_dir = TempDir::new().unwrap();
        let settings = Settings::with_data_root(temp_dir.path());
        let db = LibraryDatabase::in_memory(LibraryState::default());
        GameManager::add_game(&db, &settings, request("zork", "")).await.unwrap();
        GameManager::add_game(&db, &settings, request("Anno", "")).await.unwrap();

        let names: Vec<String> = GameManager::list_games(&db)
            .await
            .into_iter()
            .map(|s| s.game.name)
            .collect();
        assert_eq!(names, vec!["Anno", "zork"]);
    }
}
