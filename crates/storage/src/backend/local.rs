//! Local filesystem storage backend.
//!
//! Treats a directory (typically a network mount) as the object store: every
//! regular file below the root is an object whose key is its relative path.
//! Files are accessed via `tokio::fs` for async I/O.

use crate::backend::{BoxAsyncRead, ObjectInfoStream};
use crate::error::ErrorKind;
use crate::{ObjectInfo, StorageBackend, error::Result, path::validate as validate_path};
use async_stream::stream;
use async_trait::async_trait;
use exn::ResultExt;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tokio::fs::{self, DirEntry};

enum WalkEntry {
    File(ObjectInfo),
    Descend(PathBuf),
    Skip,
}

/// Local filesystem storage backend.
///
/// All object paths are relative to the configured root directory.
///
/// # Examples
///
/// ```no_run
/// use signage_storage::backend::LocalBackend;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = LocalBackend::new("mirror", "/mnt/signage-share")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct LocalBackend {
    name: String,
    /// Root directory acting as the bucket
    root: PathBuf,
}
impl LocalBackend {
    /// Create a new local filesystem backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not absolute, does not exist, or is
    /// not a directory. The source directory is never created: an empty
    /// listing from a missing mount would look like every object was deleted.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(root));
        }
        if !root.exists() {
            exn::bail!(ErrorKind::NotFound(root));
        }
        if !root.is_dir() {
            exn::bail!(ErrorKind::InvalidPath(root));
        }
        Ok(Self { name: name.into(), root })
    }

    /// Get the absolute path for a relative storage path.
    fn absolute_path(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let validated = validate_path(path.as_ref())?;
        Ok(self.root.join(validated))
    }

    /// Convert an absolute path back to a relative storage path.
    fn relative_path(&self, absolute: impl AsRef<Path>) -> Result<PathBuf> {
        let absolute = absolute.as_ref();
        let relative = absolute.strip_prefix(&self.root).or_raise(|| {
            ErrorKind::BackendError(format!("path `{:?}` is not within root `{:?}`", absolute, self.root))
        })?;
        // Validate path will also canonicalize it.
        validate_path(relative)
    }

    fn metadata(path: &Path, metadata: Metadata) -> ObjectInfo {
        let modified = metadata.modified().map(OffsetDateTime::from).unwrap_or(OffsetDateTime::UNIX_EPOCH);
        ObjectInfo::new(path, metadata.len(), modified)
    }

    fn map_io_error(e: std::io::Error, path: &Path) -> ErrorKind {
        match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied(path.to_path_buf()),
            _ => ErrorKind::Io(e),
        }
    }

    async fn process_entry(&self, entry: DirEntry) -> Result<WalkEntry> {
        let path = entry.path();
        let metadata = entry.metadata().await.map_err(|e| Self::map_io_error(e, &path))?;
        if metadata.is_dir() {
            return Ok(WalkEntry::Descend(path));
        }
        if metadata.is_file() {
            let relative = self.relative_path(&path)?;
            return Ok(WalkEntry::File(Self::metadata(&relative, metadata)));
        }
        // Note: silently drop symlinks and special files.
        Ok(WalkEntry::Skip)
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream(&self) -> ObjectInfoStream<'_> {
        let mut stack = vec![self.root.clone()];
        Box::pin(stream! {
            'dirs: while let Some(current) = stack.pop() {
                // Unlike the media scanner, an unreadable directory here is a
                // listing failure: skipping it would make its objects look
                // deleted upstream.
                let mut entries = match fs::read_dir(&current).await {
                    Ok(entries) => entries,
                    Err(err) => {
                        yield Err(exn::Exn::from(Self::map_io_error(err, &current)));
                        break 'dirs;
                    }
                };
                loop {
                    let entry = match entries.next_entry().await {
                        Ok(Some(entry)) => entry,
                        Ok(None) => break,
                        Err(e) => {
                            yield Err(exn::Exn::from(Self::map_io_error(e, &current)));
                            break 'dirs;
                        },
                    };
                    match self.process_entry(entry).await {
                        Ok(WalkEntry::File(f)) => yield Ok(f),
                        Ok(WalkEntry::Descend(d)) => stack.push(d),
                        Ok(WalkEntry::Skip) => {},
                        Err(e) => {
                            yield Err(e);
                            break 'dirs;
                        },
                    };
                }
            }
        })
    }

    async fn reader(&self, path: &Path) -> Result<BoxAsyncRead> {
        let abs_path = self.absolute_path(path)?;
        let file = fs::File::open(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?;
        Ok(Box::pin(file))
    }
}
