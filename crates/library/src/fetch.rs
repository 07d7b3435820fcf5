use crate::error::{ErrorKind, Result};
use exn::{OptionExt, ResultExt};
use signage_storage::{StorageBackend, validate_path};
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tokio::task;

/// Download one remote object to `root/path`, returning the bytes written.
///
/// The body is streamed into a hidden `.part` file next to the destination,
/// synced, then renamed into place. On failure the temporary file is removed
/// and nothing is left at the final path.
pub async fn fetch(remote: &dyn StorageBackend, root: &Path, path: &Path) -> Result<u64> {
    let relative = validate_path(path).or_raise(|| ErrorKind::Fetch(path.to_path_buf()))?;
    let destination = root.join(&relative);
    let parent = destination.parent().ok_or_raise(|| ErrorKind::Filesystem(destination.clone()))?;
    let file_name = relative.file_name().ok_or_raise(|| ErrorKind::Fetch(relative.clone()))?;
    tokio::fs::create_dir_all(parent).await.or_raise(|| ErrorKind::Filesystem(parent.to_path_buf()))?;

    let mut body = remote.reader(&relative).await.or_raise(|| ErrorKind::Fetch(relative.clone()))?;

    let prefix = format!(".{}.", file_name.to_string_lossy());
    let dir = parent.to_path_buf();
    let temp = task::spawn_blocking(move || tempfile::Builder::new().prefix(&prefix).suffix(".part").tempfile_in(&dir))
        .await
        .or_raise(|| ErrorKind::Filesystem(parent.to_path_buf()))?
        .or_raise(|| ErrorKind::Filesystem(parent.to_path_buf()))?;
    // The TempPath deletes the partial file if anything below fails.
    let (file, temp_path) = temp.into_parts();
    let mut file = tokio::fs::File::from_std(file);

    let written = tokio::io::copy(&mut body, &mut file).await.or_raise(|| ErrorKind::Fetch(relative.clone()))?;
    file.flush().await.or_raise(|| ErrorKind::Filesystem(temp_path.to_path_buf()))?;
    file.sync_all().await.or_raise(|| ErrorKind::Filesystem(temp_path.to_path_buf()))?;
    drop(file);

    let target = destination.clone();
    task::spawn_blocking(move || temp_path.persist(&target))
        .await
        .or_raise(|| ErrorKind::Filesystem(destination.clone()))?
        .or_raise(|| ErrorKind::Filesystem(destination.clone()))?;
    tracing::debug!(path = %relative.display(), bytes = written, backend = remote.name(), "Fetched object");
    Ok(written)
}
