use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use walkdir::WalkDir;

/// Retries after the first attempt when a save file is held by the game.
pub const DEFAULT_COPY_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 200;

// Busy / locked / access-denied codes reported while another process holds the file
#[cfg(windows)]
const TRANSIENT_OS_ERRORS: &[i32] = &[5, 32, 33];
#[cfg(unix)]
const TRANSIENT_OS_ERRORS: &[i32] = &[1, 13, 16];
#[cfg(not(any(unix, windows)))]
const TRANSIENT_OS_ERRORS: &[i32] = &[];

/// Copy `source` to `destination`, creating parent directories. Busy or
/// locked files are retried with exponential backoff; every other error is
/// returned immediately. Returns the number of bytes copied.
pub async fn copy_file_with_retries(
    source: &Path,
    destination: &Path,
    retries: u32,
) -> io::Result<u64> {
    let mut attempt = 0;
    loop {
        match copy_once(source, destination).await {
            Ok(bytes) => return Ok(bytes),
            Err(e) if attempt < retries && is_transient(&e) => {
                let delay = backoff_delay(attempt);
                tracing::debug!(
                    source = %source.display(),
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "File busy, retrying copy"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn copy_once(source: &Path, destination: &Path) -> io::Result<u64> {
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::copy(source, destination).await
}

pub fn is_transient(error: &io::Error) -> bool {
    if error.kind() == io::ErrorKind::PermissionDenied {
        return true;
    }
    error
        .raw_os_error()
        .map(|code| TRANSIENT_OS_ERRORS.contains(&code))
        .unwrap_or(false)
}

pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt))
}

/// All regular files below `root`, sorted. Symlinks are not followed and
/// unreadable entries are skipped. A missing root yields nothing.
pub async fn walk_files(root: &Path) -> Vec<PathBuf> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut files: Vec<PathBuf> = WalkDir::new(&root)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    if e.depth() > 0 {
                        tracing::warn!(error = %e, "Skipping unreadable entry");
                    }
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .collect();
        files.sort();
        files
    })
    .await
    .unwrap_or_default()
}

/// `relative` expressed with `/` separators.
pub fn to_slash_path(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Recursively removes a directory; a directory that is already gone counts
/// as removed.
pub async fn remove_dir_safe(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_backoff_doubles() {
        assert_eq!(backoff_delay(0), Duration::from_millis(200));
        assert_eq!(backoff_delay(1), Duration::from_millis(400));
        assert_eq!(backoff_delay(2), Duration::from_millis(800));
    }

    #[test]
    fn test_transient_classification() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::PermissionDenied)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::NotFound)));
        #[cfg(unix)]
        assert!(is_transient(&io::Error::from_raw_os_error(16)));
    }

    #[tokio::test]
    async fn test_copy_creates_parent_directories() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("slot1.sav");
        std::fs::write(&source, b"0123456789").unwrap();
        let destination = temp_dir.path().join("snap").join("Saves").join("slot1.sav");

        let copied = copy_file_with_retries(&source, &destination, DEFAULT_COPY_RETRIES)
            .await
            .unwrap();

        assert_eq!(copied, 10);
        assert_eq!(std::fs::read(&destination).unwrap(), b"0123456789");
    }

    #[tokio::test]
    async fn test_missing_source_fails_without_retry() {
        let temp_dir = TempDir::new().unwrap();
        let started = std::time::Instant::now();

        let result = copy_file_with_retries(
            &temp_dir.path().join("gone.sav"),
            &temp_dir.path().join("out.sav"),
            DEFAULT_COPY_RETRIES,
        )
        .await;

        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::NotFound);
        assert!(started.elapsed() < backoff_delay(0));
    }

    #[tokio::test]
    async fn test_walk_files_recurses_and_sorts() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("b/nested")).unwrap();
        std::fs::write(temp_dir.path().join("b/nested/z.sav"), "z").unwrap();
        std::fs::write(temp_dir.path().join("a.sav"), "a").unwrap();

        let files = walk_files(temp_dir.path()).await;
        let relative: Vec<String> = files
            .iter()
            .map(|p| to_slash_path(p.strip_prefix(temp_dir.path()).unwrap()))
            .collect();
        assert_eq!(relative, vec!["a.sav", "b/nested/z.sav"]);
    }

    #[tokio::test]
    async fn test_walk_missing_root_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        assert!(walk_files(&temp_dir.path().join("missing")).await.is_empty());
    }

    #[tokio::test]
    async fn test_remove_dir_safe_tolerates_missing() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("snap");
        std::fs::create_dir_all(dir.join("inner")).unwrap();

        remove_dir_safe(&dir).await.unwrap();
        assert!(!dir.exists());
        remove_dir_safe(&dir).await.unwrap();
    }
}
