//! In-memory storage backend for testing.

use super::{BoxAsyncRead, ObjectInfoStream};
use crate::StorageBackend;
use crate::error::{ErrorKind, Result};
use crate::models::ObjectInfo;
use crate::path::validate as validate_path;
use async_stream::stream;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::io;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use time::OffsetDateTime;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio::sync::RwLock;

const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Default)]
struct Faults {
    /// Fail the listing after this many pages have been served.
    listing_after_pages: Option<usize>,
    /// Objects whose transfer breaks off halfway through the body.
    interrupted: HashSet<PathBuf>,
}

/// In-memory storage backend for testing.
///
/// Objects are stored in a `BTreeMap` behind a [`RwLock`], so all methods can
/// operate on `&self` without external synchronisation. Listings are served
/// in pages of [`with_page_size`](Self::with_page_size) objects, each page
/// taken under a fresh read lock and resuming after the last key of the
/// previous page, the way a continuation token does.
///
/// # Examples
///
/// ```
/// use signage_storage::backend::{MockBackend, StorageBackend};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MockBackend::with_files([
///     ("lobby/welcome.mp4", b"...".to_vec()),
/// ]);
/// assert_eq!(backend.list().await?.len(), 1);
/// # Ok(())
/// # }
/// ```
pub struct MockBackend {
    name: String,
    storage: RwLock<BTreeMap<PathBuf, (OffsetDateTime, Vec<u8>)>>,
    page_size: usize,
    faults: RwLock<Faults>,
    list_calls: AtomicUsize,
}

impl MockBackend {
    /// Create a mock backend pre-populated with objects.
    ///
    /// Panics if any path fails validation (e.g. path traversal). If test
    /// setup is wrong, then test should not pass.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<Vec<u8>>)>) -> Self {
        let mut map = BTreeMap::new();
        let now = OffsetDateTime::now_utc();
        for (path, data) in files {
            map.insert(Self::checked(path.into()), (now, data.into()));
        }
        Self {
            name: "mock".to_string(),
            storage: RwLock::new(map),
            page_size: DEFAULT_PAGE_SIZE,
            faults: RwLock::new(Faults::default()),
            list_calls: AtomicUsize::new(0),
        }
    }

    /// Change the name of the mock backend.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Serve listings in pages of `page_size` objects.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Add or replace an object.
    pub async fn put(&self, path: impl Into<PathBuf>, data: impl Into<Vec<u8>>) {
        let path = Self::checked(path.into());
        self.storage.write().await.insert(path, (OffsetDateTime::now_utc(), data.into()));
    }

    /// Remove an object, returning whether it existed.
    pub async fn remove(&self, path: impl AsRef<Path>) -> bool {
        let path = Self::checked(path.as_ref().to_path_buf());
        self.storage.write().await.remove(&path).is_some()
    }

    /// Make listings fail once `pages` pages have been served (`Some(0)`
    /// fails before the first page). `None` clears the fault.
    pub async fn fail_listing_after(&self, pages: Option<usize>) {
        self.faults.write().await.listing_after_pages = pages;
    }

    /// Make transfers of `path` break off halfway through the body.
    pub async fn interrupt_transfer(&self, path: impl AsRef<Path>) {
        let path = Self::checked(path.as_ref().to_path_buf());
        self.faults.write().await.interrupted.insert(path);
    }

    /// Number of listings started so far.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    fn checked(path: PathBuf) -> PathBuf {
        let Ok(validated) = validate_path(&path) else {
            // The panic here is DELIBERATE. MockBackend is intended to be
            // used in tests; panics are expected. There is no error result.
            panic!("MockBackend: invalid path {}", path.display());
        };
        validated
    }

    async fn page(&self, after: Option<&Path>) -> Vec<ObjectInfo> {
        let guard = self.storage.read().await;
        let lower = match after {
            Some(last) => Bound::Excluded(last),
            None => Bound::Unbounded,
        };
        guard
            .range::<Path, _>((lower, Bound::Unbounded))
            .take(self.page_size)
            .map(|(path, (modified, data))| ObjectInfo::new(path.clone(), data.len() as u64, *modified))
            .collect()
    }
}
impl Default for MockBackend {
    fn default() -> Self {
        let files: [(&str, &[u8]); 0] = [];
        Self::with_files(files)
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream(&self) -> ObjectInfoStream<'_> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(stream! {
            let fail_after = self.faults.read().await.listing_after_pages;
            let mut served = 0;
            let mut last: Option<PathBuf> = None;
            loop {
                if fail_after.is_some_and(|limit| served >= limit) {
                    yield Err(exn::Exn::from(ErrorKind::Network("mock listing failure".to_string())));
                    return;
                }
                let page = self.page(last.as_deref()).await;
                served += 1;
                let truncated = page.len() == self.page_size;
                for info in page {
                    last = Some(info.path.clone());
                    yield Ok(info);
                }
                if !truncated {
                    break;
                }
            }
        })
    }

    async fn reader(&self, path: &Path) -> Result<BoxAsyncRead> {
        let path = validate_path(path)?;
        let (_modified, data) =
            self.storage.read().await.get(&path).cloned().ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path.clone())))?;
        if self.faults.read().await.interrupted.contains(&path) {
            let half = data.len() / 2;
            let partial = io::Cursor::new(data[..half].to_vec());
            return Ok(Box::pin(partial.chain(Interrupted)));
        }
        Ok(Box::pin(io::Cursor::new(data)))
    }
}

/// Reader that fails every read, standing in for a dropped connection.
struct Interrupted;
impl AsyncRead for Interrupted {
    fn poll_read(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::new(io::ErrorKind::ConnectionReset, "mock transfer interrupted")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn read_all(backend: &MockBackend, path: &str) -> io::Result<Vec<u8>> {
        let mut reader = backend.reader(Path::new(path)).await.ok().unwrap();
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await?;
        Ok(data)
    }

    #[tokio::test]
    async fn test_put_and_read() {
        let backend = MockBackend::default();
        backend.put("test.mp4", b"hello".to_vec()).await;
        assert_eq!(read_all(&backend, "test.mp4").await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_read_not_found() {
        let backend = MockBackend::default();
        let err = backend.reader(Path::new("missing.mp4")).await.err().unwrap();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_remove() {
        let backend = MockBackend::with_files([("a.mp4", b"a".to_vec())]);
        assert!(backend.remove("a.mp4").await);
        assert!(!backend.remove("a.mp4").await);
        assert!(backend.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_follows_pages() {
        let backend = MockBackend::with_files([
            ("a.mp4", b"1".to_vec()),
            ("b.mp4", b"22".to_vec()),
            ("c/d.mp4", b"333".to_vec()),
            ("e.mkv", b"4444".to_vec()),
            ("f.webm", b"55555".to_vec()),
        ])
        .with_page_size(2);
        let files = backend.list().await.unwrap();
        let paths: Vec<_> = files.iter().map(|f| f.path.to_string_lossy().into_owned()).collect();
        assert_eq!(paths, ["a.mp4", "b.mp4", "c/d.mp4", "e.mkv", "f.webm"]);
        assert_eq!(files[4].size, 5);
        assert_eq!(backend.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_listing_failure_mid_pagination() {
        let backend =
            MockBackend::with_files([("a.mp4", b"1".to_vec()), ("b.mp4", b"2".to_vec()), ("c.mp4", b"3".to_vec())])
                .with_page_size(1);
        backend.fail_listing_after(Some(2)).await;
        assert!(backend.list().await.is_err());
        backend.fail_listing_after(None).await;
        assert_eq!(backend.list().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_interrupted_transfer() {
        let backend = MockBackend::with_files([("clip.mp4", b"0123456789".to_vec())]);
        backend.interrupt_transfer("clip.mp4").await;
        let err = read_all(&backend, "clip.mp4").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }

    #[test]
    #[should_panic(expected = "invalid path")]
    fn test_with_files_panics_on_bad_path() {
        MockBackend::with_files([("../escape", b"bad".to_vec())]);
    }
}
