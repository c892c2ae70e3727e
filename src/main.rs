//! GameSaver CLI - drives the snapshot engine from the command line.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use gamesaver::database::models::{AddGameRequest, SnapshotReason};
use gamesaver::game_manager::locations::Locations;
use gamesaver::logger::{initialize_logging_with_config, LogConfig};
use gamesaver::{BackupEngine, DatabasePaths, GameManager, LibraryDatabase, Settings};

#[derive(Parser)]
#[command(name = "gamesaver")]
#[command(about = "GameSaver - snapshot backups for PC game saves")]
#[command(version)]
struct Cli {
    /// Data root holding settings, the library and logs
    #[arg(long, global = true)]
    data_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List games with their latest snapshot
    List,
    /// Show a game with its locations, snapshots and recent events
    Show {
        /// Game name or ID
        game: String,
    },
    /// Add a game
    AddGame {
        name: String,
        /// Path to the game executable
        #[arg(long, default_value = "")]
        exe: String,
        /// Game install directory
        #[arg(long, default_value = "")]
        install: String,
    },
    /// Remove a game, its snapshots and its storage folder
    RemoveGame {
        /// Game name or ID
        game: String,
    },
    /// Register a save file or folder for a game
    AddLocation {
        /// Game name or ID
        game: String,
        path: String,
    },
    /// Enable or disable a save location
    ToggleLocation {
        location_id: String,
        #[arg(long)]
        disable: bool,
    },
    /// Take a snapshot now
    Backup {
        /// Game name or ID
        game: String,
        #[arg(short, long, value_enum, default_value = "manual")]
        reason: ReasonArg,
    },
    /// Restore a snapshot over the live save locations
    Restore { snapshot_id: String },
    /// Check a snapshot's files against their recorded checksums
    Verify { snapshot_id: String },
    /// Delete a snapshot
    Delete { snapshot_id: String },
    /// Rebuild the library from snapshot folders on disk
    Scan,
    /// Print the effective settings
    Settings,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ReasonArg {
    Auto,
    Manual,
}

impl From<ReasonArg> for SnapshotReason {
    fn from(reason: ReasonArg) -> Self {
        match reason {
            ReasonArg::Auto => SnapshotReason::Auto,
            ReasonArg::Manual => SnapshotReason::Manual,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let data_root = cli
        .data_root
        .unwrap_or_else(DatabasePaths::default_app_data_dir);
    let settings = Settings::load(&data_root);

    let log_config = LogConfig {
        enable_console_output: false,
        ..LogConfig::for_data_root(&data_root)
    };
    if let Err(e) = initialize_logging_with_config(log_config) {
        eprintln!("Warning: logging disabled: {}", e);
    }

    let db = Arc::new(
        LibraryDatabase::open(DatabasePaths::state_file(&data_root))
            .await
            .context("Failed to open library")?,
    );
    let engine = BackupEngine::new(db.clone(), settings.clone());

    match cli.command {
        Commands::List => print_json(&GameManager::list_games(&db).await)?,
        Commands::Show { game } => {
            let game_id = resolve_game(&db, &game).await?;
            print_json(&GameManager::game_detail(&db, &game_id).await?)?;
        }
        Commands::AddGame { name, exe, install } => {
            let request = AddGameRequest {
                name,
                exe_path: exe,
                install_path: install,
            };
            print_json(&GameManager::add_game(&db, &settings, request).await?)?;
        }
        Commands::RemoveGame { game } => {
            let game_id = resolve_game(&db, &game).await?;
            GameManager::remove_game(&db, &settings, &game_id).await?;
            println!("Removed {}", game_id);
        }
        Commands::AddLocation { game, path } => {
            let game_id = resolve_game(&db, &game).await?;
            print_json(&Locations::add(&db, &game_id, &path, false).await?)?;
        }
        Commands::ToggleLocation { location_id, disable } => {
            Locations::toggle(&db, &location_id, !disable).await?;
            println!("{} {}", location_id, if disable { "disabled" } else { "enabled" });
        }
        Commands::Backup { game, reason } => {
            let game_id = resolve_game(&db, &game).await?;
            match engine.backup_game(&game_id, reason.into()).await? {
                Some(snapshot) => print_json(&snapshot)?,
                None => println!("No snapshot created; see the event log for details."),
            }
        }
        Commands::Restore { snapshot_id } => {
            print_json(&engine.restore_snapshot(&snapshot_id).await?)?;
        }
        Commands::Verify { snapshot_id } => {
            print_json(&engine.verify_snapshot(&snapshot_id).await?)?;
        }
        Commands::Delete { snapshot_id } => {
            engine.delete_snapshot(&snapshot_id).await?;
            println!("Deleted {}", snapshot_id);
        }
        Commands::Scan => print_json(&engine.scan_snapshots_from_disk().await?)?,
        Commands::Settings => print_json(&settings)?,
    }

    Ok(())
}

/// Accepts a game id or a case-insensitive game name.
async fn resolve_game(db: &LibraryDatabase, key: &str) -> Result<String> {
    let games = db.games().await;
    games
        .iter()
        .find(|g| g.id == key)
        .or_else(|| games.iter().find(|g| g.name.eq_ignore_ascii_case(key)))
        .map(|g| g.id.clone())
        .ok_or_else(|| anyhow!("No game matches '{}'", key))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
