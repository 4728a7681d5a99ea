use std::io;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::constants::TMP_SUFFIX;

/// Sibling path a file is staged at before being renamed into place.
#[must_use]
pub fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(TMP_SUFFIX);
    path.with_file_name(name)
}

/// Write `contents` to `path` so that readers see either the old file or the
/// complete new one.
///
/// The data goes to a `.tmp` sibling, is flushed to disk, and is then renamed
/// over `path`. The parent directory is synced afterwards so the rename
/// itself survives a crash.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let tmp = tmp_path(path);

    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&tmp, path).await?;
    sync_dir(path.parent().unwrap_or_else(|| Path::new("."))).await;
    Ok(())
}

#[cfg(unix)]
async fn sync_dir(dir: &Path) {
    match tokio::fs::File::open(dir).await {
        Ok(handle) => {
            if let Err(e) = handle.sync_all().await {
                debug!(path = %dir.display(), "Failed to sync directory: {e}");
            }
        }
        Err(e) => debug!(path = %dir.display(), "Failed to open directory for sync: {e}"),
    }
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) {}

/// Whether `dir` has no entries. A missing directory counts as empty.
pub async fn is_dir_empty(dir: &Path) -> io::Result<bool> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(e),
    };
    Ok(entries.next_entry().await?.is_none())
}

/// Best-effort removal of files in `dir` matching `is_stale`.
///
/// Failures are logged and skipped; leftovers only cost disk space.
pub async fn remove_matching_best_effort(dir: &Path, is_stale: impl Fn(&str) -> bool) {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %dir.display(), "Failed to list directory for cleanup: {e}");
            return;
        }
    };

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!(path = %dir.display(), "Failed to read directory entry: {e}");
                break;
            }
        };

        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !is_stale(name) {
            continue;
        }

        let path = entry.path();
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(path = %path.display(), "Removed stale file"),
            Err(e) => warn!(path = %path.display(), "Failed to remove stale file: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_tmp_path() {
        assert_eq!(
            tmp_path(Path::new("/data/store/manifest.json")),
            PathBuf::from("/data/store/manifest.json.tmp")
        );
    }

    #[tokio::test]
    async fn test_write_atomic_replaces_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file.json");

        write_atomic(&path, b"first").await.unwrap();
        write_atomic(&path, b"second").await.unwrap();

        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"second");
        assert!(!tmp_path(&path).exists());
    }

    #[tokio::test]
    async fn test_is_dir_empty() {
        let dir = TempDir::new().unwrap();
        assert!(is_dir_empty(dir.path()).await.unwrap());
        assert!(is_dir_empty(&dir.path().join("missing")).await.unwrap());

        tokio::fs::write(dir.path().join("x"), b"x").await.unwrap();
        assert!(!is_dir_empty(dir.path()).await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_matching_best_effort() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("keep.json"), b"").await.unwrap();
        tokio::fs::write(dir.path().join("drop.tmp"), b"").await.unwrap();

        remove_matching_best_effort(dir.path(), |name| name.ends_with(".tmp")).await;

        assert!(dir.path().join("keep.json").exists());
        assert!(!dir.path().join("drop.tmp").exists());
    }
}
