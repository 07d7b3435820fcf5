//! Local media tree walker.

use crate::error::{ErrorKind, Result};
use crate::media::{Inventory, MediaEntry, is_media_file};
use exn::ResultExt;
use std::path::{Path, PathBuf};
use tokio::fs;

enum WalkEntry {
    Media(PathBuf),
    Descend(PathBuf),
    Skip,
}

/// Walk `root` and build an [`Inventory`] of every playable file below it.
///
/// Directories are visited in lexical pre-order, which fixes the order of
/// entries sharing a file name. Unreadable subdirectories and entries are
/// logged and skipped. Failing to read `root` itself is a
/// [`PartialScan`](ErrorKind::PartialScan), since an empty result would look
/// like every file had vanished.
pub async fn scan_directory(root: &Path, url_prefix: &str) -> Result<Inventory> {
    let mut entries = Vec::new();
    let top = read_sorted(root, false).await.or_raise(|| ErrorKind::PartialScan(root.to_path_buf()))?;
    let mut stack: Vec<PathBuf> = top.into_iter().rev().collect();
    while let Some(path) = stack.pop() {
        match classify(&path).await {
            Ok(WalkEntry::Media(absolute)) => {
                let Ok(relative) = absolute.strip_prefix(root) else {
                    continue;
                };
                entries.push(MediaEntry::new(root, relative, url_prefix));
            },
            Ok(WalkEntry::Descend(dir)) => match read_sorted(&dir, true).await {
                Ok(children) => stack.extend(children.into_iter().rev()),
                Err(err) => tracing::warn!(path = %dir.display(), error = ?err, "Skipping unreadable directory"),
            },
            Ok(WalkEntry::Skip) => {},
            Err(err) => tracing::warn!(path = %path.display(), error = ?err, "Skipping unreadable entry"),
        }
    }
    tracing::debug!(root = %root.display(), count = entries.len(), "Scanned media directory");
    Ok(Inventory::from_entries(entries))
}

/// Children of `dir` in lexical order.
///
/// With `keep_partial`, an error partway through the directory keeps the
/// entries read so far instead of failing.
async fn read_sorted(dir: &Path, keep_partial: bool) -> Result<Vec<PathBuf>> {
    let mut reader = fs::read_dir(dir).await.or_raise(|| ErrorKind::Filesystem(dir.to_path_buf()))?;
    let mut children = Vec::new();
    loop {
        match reader.next_entry().await {
            Ok(Some(entry)) => children.push(entry.path()),
            Ok(None) => break,
            Err(err) if keep_partial => {
                tracing::warn!(path = %dir.display(), error = %err, read = children.len(), "Directory listing cut short");
                break;
            },
            Err(err) => return Err(err).or_raise(|| ErrorKind::Filesystem(dir.to_path_buf())),
        }
    }
    children.sort();
    Ok(children)
}

async fn classify(path: &Path) -> Result<WalkEntry> {
    let metadata = fs::symlink_metadata(path).await.or_raise(|| ErrorKind::Filesystem(path.to_path_buf()))?;
    let file_type = metadata.file_type();
    if file_type.is_dir() {
        return Ok(WalkEntry::Descend(path.to_path_buf()));
    }
    if !is_media_file(path) {
        return Ok(WalkEntry::Skip);
    }
    if file_type.is_symlink() {
        // Linked directories are not descended; dangling links are dropped.
        return match fs::metadata(path).await {
            Ok(target) if target.is_file() => Ok(WalkEntry::Media(path.to_path_buf())),
            _ => Ok(WalkEntry::Skip),
        };
    }
    match file_type.is_file() {
        true => Ok(WalkEntry::Media(path.to_path_buf())),
        false => Ok(WalkEntry::Skip),
    }
}
