//! Logging setup for the GameSaver engine.
//!
//! The engine reports through `tracing`; this module installs the
//! subscriber once per process:
//! - daily rotated log file under the data root
//! - optional console output
//! - level taken from `RUST_LOG`, falling back to the configured default

use once_cell::sync::OnceCell;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::database::connection::DatabasePaths;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

// Keeps the background writer alive for the life of the process.
static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub log_directory: PathBuf,
    pub file_name_prefix: String,
    pub default_level: String,
    pub enable_console_output: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        // Logs live next to the library state
        let app_data_dir = DatabasePaths::default_app_data_dir();

        Self {
            log_directory: DatabasePaths::log_directory(&app_data_dir),
            file_name_prefix: "gamesaver.log".to_string(),
            default_level: "info".to_string(),
            enable_console_output: true,
        }
    }
}

impl LogConfig {
    pub fn for_data_root(data_root: &std::path::Path) -> Self {
        Self {
            log_directory: DatabasePaths::log_directory(data_root),
            ..Self::default()
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to prepare log directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("Logging already initialized: {0}")]
    AlreadyInitialized(String),
}

/// Initialize the logging system with default configuration
pub fn initialize_logging() -> Result<(), LoggingError> {
    initialize_logging_with_config(LogConfig::default())
}

/// Initialize the logging system with custom configuration
pub fn initialize_logging_with_config(config: LogConfig) -> Result<(), LoggingError> {
    std::fs::create_dir_all(&config.log_directory)?;

    let file_appender =
        tracing_appender::rolling::daily(&config.log_directory, &config.file_name_prefix);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_level));

    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_timer(ChronoUtc::new(TIMESTAMP_FORMAT.to_string()));

    let console_layer = config.enable_console_output.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_timer(ChronoUtc::new(TIMESTAMP_FORMAT.to_string()))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    let _ = FILE_GUARD.set(guard);

    tracing::info!(
        directory = %config.log_directory.display(),
        "Logging system initialized"
    );
    Ok(())
}
