//! Filesystem helpers for run bootstrap and file relocation

use crate::error::Result;
use std::path::Path;
use tokio::fs;
use tracing::{debug, warn};

/// Create every listed directory, including missing parents
pub async fn create_directories(dirs: &[&Path]) -> Result<()> {
    for dir in dirs {
        fs::create_dir_all(dir).await?;
        debug!(dir = %dir.display(), "ensured directory");
    }
    Ok(())
}

/// Remove plain files from a directory, leaving subdirectories alone
///
/// Used at run start to clear stale exports so the watcher cannot match a
/// leftover from a previous run.
pub async fn clear_directory_files(dir: &Path) -> Result<usize> {
    let mut removed = 0;
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            fs::remove_file(entry.path()).await?;
            removed += 1;
        }
    }
    if removed > 0 {
        warn!(dir = %dir.display(), removed, "cleared stale files from directory");
    }
    Ok(removed)
}

/// Move a file, falling back to copy-and-remove across filesystems
pub async fn move_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).await?;
    }
    match fs::rename(from, to).await {
        Ok(()) => {}
        Err(_) => {
            // rename fails across mount points; EXDEV is not exposed portably
            fs::copy(from, to).await?;
            fs::remove_file(from).await?;
        }
    }
    debug!(from = %from.display(), to = %to.display(), "moved file");
    Ok(())
}
