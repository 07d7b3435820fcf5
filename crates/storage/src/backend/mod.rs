//! Storage backend trait and implementations.
//!
//! This module defines the `StorageBackend` trait, which provides a unified
//! read-side interface over the remote object store the media directory is
//! synchronized from (S3-compatible services, a mounted directory, or an
//! in-memory store for tests).

mod local;
#[cfg(feature = "mock")]
mod mock;
#[cfg(feature = "s3")]
mod s3;

pub use self::local::LocalBackend;
#[cfg(feature = "mock")]
pub use self::mock::MockBackend;
#[cfg(feature = "s3")]
pub use self::s3::S3Backend;
use crate::ObjectInfo;
use crate::error::Result;
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use std::path::Path;
use std::pin::Pin;
use tokio::io::AsyncRead;

pub type ObjectInfoStream<'a> = Pin<Box<dyn Stream<Item = Result<ObjectInfo>> + Send + 'a>>;
pub type BoxAsyncRead = Pin<Box<dyn AsyncRead + Send + 'static>>;

/// Unified interface for remote object stores.
///
/// Paths handed to and returned from a backend are relative to the store
/// root (or configured key prefix) and have been through
/// [`validate_path`](crate::validate_path). The relative path of an object is
/// also the relative path it is written to inside the local media root.
///
/// # Examples
///
/// ```no_run
/// use futures::TryStreamExt;
/// use signage_storage::{backend::StorageBackend, error::Result};
///
/// async fn total_bytes(backend: &dyn StorageBackend) -> Result<u64> {
///     let mut total = 0;
///     let mut stream = backend.list_stream();
///     while let Some(info) = stream.try_next().await? {
///         total += info.size;
///     }
///     Ok(total)
/// }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Name of the configured backend, used for logging only.
    fn name(&self) -> &str;

    /// List every object in the store.
    ///
    /// Collects [`list_stream()`](Self::list_stream) to completion. A single
    /// failed page fails the whole listing: callers treat the result as the
    /// complete remote state, so a partial listing must never be returned.
    async fn list(&self) -> Result<Vec<ObjectInfo>> {
        self.list_stream().try_collect().await
    }

    /// Stream object metadata for the whole store.
    ///
    /// Implementations backed by paginated APIs must keep requesting pages
    /// until the store reports the listing is complete, yielding objects as
    /// each page arrives. Directory markers are not yielded.
    fn list_stream(&self) -> ObjectInfoStream<'_>;

    /// Open an object for streaming reads.
    ///
    /// Returns a `'static` boxed [`AsyncRead`] over the object body. The
    /// request (opening the file/connection) happens before returning.
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the object
    /// does not exist.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::path::Path;
    /// use tokio::io::AsyncReadExt;
    /// # use signage_storage::{backend::StorageBackend, error::Result};
    /// # async fn example(backend: &dyn StorageBackend) -> Result<()> {
    /// let mut body = backend.reader(Path::new("lobby/welcome.mp4")).await?;
    /// let mut head = [0u8; 8];
    /// let _ = body.read(&mut head).await;
    /// # Ok(())
    /// # }
    /// ```
    async fn reader(&self, path: &Path) -> Result<BoxAsyncRead>;
}
