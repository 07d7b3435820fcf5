use crate::Context;
use crate::error::{ErrorKind, Result};
use crate::fetch::fetch;
use crate::media::Inventory;
use crate::reconcile::{Plan, probe_local, reconcile};
use crate::scan::scan_directory;
use crate::snapshot::SnapshotStore;
use exn::{OptionExt, ResultExt};
use serde::Serialize;
use signage_storage::{BackendHandle, StorageBackend};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Outcome of one reconciliation cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub downloaded: Vec<PathBuf>,
    pub failed_downloads: Vec<PathBuf>,
    pub deleted: Vec<PathBuf>,
    pub failed_deletions: Vec<PathBuf>,
    pub unchanged: usize,
    /// Size of the inventory published at the end of the cycle.
    pub inventory: usize,
}
impl SyncReport {
    /// Whether the cycle found nothing to do.
    pub fn is_noop(&self) -> bool {
        self.downloaded.is_empty()
            && self.failed_downloads.is_empty()
            && self.deleted.is_empty()
            && self.failed_deletions.is_empty()
    }
}

/// The media library: local root, optional remote store and the published
/// inventory.
///
/// Constructed once at startup and shared behind an `Arc` between the
/// scheduler and whatever serves the inventory.
pub struct Library {
    ctx: Context,
    remote: Option<BackendHandle>,
    snapshot: SnapshotStore,
    /// Inventory published by the last reconciliation cycle. The lock also
    /// serializes cycles.
    baseline: Mutex<Option<Arc<Inventory>>>,
}

impl Library {
    pub fn new(ctx: Context, remote: Option<BackendHandle>) -> Self {
        Self {
            ctx,
            remote,
            snapshot: SnapshotStore::default(),
            baseline: Mutex::new(None),
        }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// The current inventory. Never waits on a scan.
    pub fn snapshot(&self) -> Arc<Inventory> {
        self.snapshot.load()
    }

    /// Walk the media root and publish the result.
    ///
    /// On failure the previously published inventory stays in place.
    pub async fn rescan_local(&self) -> Result<Arc<Inventory>> {
        let generation = self.snapshot.begin();
        let inventory = scan_directory(&self.ctx.root, &self.ctx.url_prefix).await?;
        let published = self.snapshot.publish(generation, Arc::new(inventory));
        tracing::info!(count = published.len(), "Media inventory updated");
        Ok(published)
    }

    /// Walk the media root at startup and take the result as the deletion
    /// baseline for the first cycle.
    ///
    /// Files present on disk when the process starts are thereby eligible
    /// for deletion by the first cycle if they are gone remotely. Later
    /// rescans through [`rescan_local`](Self::rescan_local) never touch the
    /// baseline. Does nothing to the baseline once a cycle has run.
    pub async fn adopt_baseline(&self) -> Result<Arc<Inventory>> {
        let mut baseline = self.baseline.lock().await;
        let inventory = self.rescan_local().await?;
        if baseline.is_none() {
            *baseline = Some(Arc::clone(&inventory));
        }
        Ok(inventory)
    }

    /// Run one reconciliation cycle against the remote store.
    ///
    /// Fails only if no remote is configured or the remote cannot be listed,
    /// in which case nothing local has been touched. Individual download and
    /// deletion failures are logged and reported.
    pub async fn sync_now(&self) -> Result<SyncReport> {
        let remote = self.remote.as_ref().ok_or_raise(|| ErrorKind::NoRemote)?;
        let mut baseline = self.baseline.lock().await;
        tracing::info!(backend = remote.name(), "Starting sync cycle");

        let listing = match remote.list().await {
            Ok(listing) => listing,
            Err(err) => {
                tracing::warn!(backend = remote.name(), retryable = err.is_retryable(), "Remote listing failed");
                return Err(err).or_raise(|| ErrorKind::Listing);
            },
        };
        let remote_paths: BTreeSet<PathBuf> = listing.into_iter().map(|info| info.path).collect();
        let present = probe_local(&self.ctx.root, &remote_paths).await;
        let plan = reconcile(&remote_paths, &present, baseline.as_deref());
        tracing::debug!(
            remote = remote_paths.len(),
            download = plan.to_download.len(),
            delete = plan.to_delete.len(),
            "Reconciliation plan"
        );
        if plan.is_empty() {
            tracing::debug!(unchanged = plan.unchanged.len(), "Nothing to download or delete");
        }

        let mut report = self.apply(&**remote, plan).await;

        match self.rescan_local().await {
            Ok(inventory) => {
                report.inventory = inventory.len();
                *baseline = Some(inventory);
            },
            Err(err) => {
                // Keep the old baseline; its files may still be deleted next
                // cycle once the root is readable again.
                tracing::warn!(error = ?err, "Rescan after sync failed");
                report.inventory = self.snapshot().len();
            },
        }
        tracing::info!(
            downloaded = report.downloaded.len(),
            failed_downloads = report.failed_downloads.len(),
            deleted = report.deleted.len(),
            failed_deletions = report.failed_deletions.len(),
            count = report.inventory,
            "Sync cycle finished"
        );
        Ok(report)
    }

    async fn apply(&self, remote: &dyn StorageBackend, plan: Plan) -> SyncReport {
        let mut report = SyncReport {
            unchanged: plan.unchanged.len(),
            ..SyncReport::default()
        };
        for path in plan.to_download {
            match fetch(remote, &self.ctx.root, &path).await {
                Ok(_) => {
                    tracing::info!(path = %path.display(), "Downloaded");
                    report.downloaded.push(path);
                },
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = ?err, "Download failed");
                    report.failed_downloads.push(path);
                },
            }
        }
        for path in plan.to_delete {
            match self.remove_local(&path).await {
                Ok(()) => {
                    tracing::info!(path = %path.display(), "Deleted");
                    report.deleted.push(path);
                },
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = ?err, "Deletion failed");
                    report.failed_deletions.push(path);
                },
            }
        }
        report
    }

    async fn remove_local(&self, path: &Path) -> Result<()> {
        let absolute = self.ctx.root.join(path);
        match tokio::fs::remove_file(&absolute).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).or_raise(|| ErrorKind::Filesystem(absolute)),
        }
    }
}

impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library")
            .field("ctx", &self.ctx)
            .field("remote", &self.remote.as_ref().map(|r| r.name().to_string()))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use signage_storage::backend::MockBackend;
    use std::time::Duration;

    struct Fixture {
        dir: tempfile::TempDir,
        remote: Arc<MockBackend>,
        library: Arc<Library>,
    }

    fn fixture(remote: MockBackend) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(remote);
        let handle: BackendHandle = remote.clone();
        let library = Arc::new(Library::new(Context::new(dir.path(), "/media/"), Some(handle)));
        Fixture { dir, remote, library }
    }

    fn names(inventory: &Inventory) -> Vec<String> {
        inventory.iter().map(|e| e.relative_path().to_string_lossy().into_owned()).collect()
    }

    #[tokio::test]
    async fn test_sync_then_remote_deletion() {
        let f = fixture(MockBackend::with_files([("a.mp4", b"a".to_vec()), ("b.mp4", b"b".to_vec())]));
        let report = f.library.sync_now().await.unwrap();
        assert_eq!(report.downloaded.len(), 2);
        assert_eq!(names(&f.library.snapshot()), ["a.mp4", "b.mp4"]);

        f.remote.remove("a.mp4").await;
        let report = f.library.sync_now().await.unwrap();
        assert_eq!(report.deleted, [PathBuf::from("a.mp4")]);
        assert_eq!(names(&f.library.snapshot()), ["b.mp4"]);
        assert!(!f.dir.path().join("a.mp4").exists());
    }

    #[tokio::test]
    async fn test_second_cycle_is_noop() {
        let f = fixture(MockBackend::with_files([("a.mp4", b"a".to_vec()), ("x/b.mkv", b"b".to_vec())]));
        f.library.sync_now().await.unwrap();
        let first = f.library.snapshot();
        let report = f.library.sync_now().await.unwrap();
        assert!(report.is_noop());
        assert_eq!(report.unchanged, 2);
        assert_eq!(*f.library.snapshot(), *first);
    }

    #[tokio::test]
    async fn test_round_trip_is_byte_identical() {
        let body: Vec<u8> = (0..=255u8).cycle().take(100_000).collect();
        let f = fixture(MockBackend::with_files([("promo/spring/clip.webm", body.clone())]));
        f.library.sync_now().await.unwrap();
        assert_eq!(std::fs::read(f.dir.path().join("promo/spring/clip.webm")).unwrap(), body);
        let inventory = f.library.snapshot();
        assert_eq!(inventory.entries()[0].url(), "/media/promo/spring/clip.webm");
    }

    #[tokio::test]
    async fn test_existing_local_file_is_accepted_as_is() {
        let f = fixture(MockBackend::with_files([("a.mp4", b"remote".to_vec())]));
        std::fs::write(f.dir.path().join("a.mp4"), b"local").unwrap();
        let report = f.library.sync_now().await.unwrap();
        assert_eq!(report.unchanged, 1);
        assert!(report.downloaded.is_empty());
        assert_eq!(std::fs::read(f.dir.path().join("a.mp4")).unwrap(), b"local");
    }

    #[tokio::test]
    async fn test_local_only_files_survive_one_cycle() {
        let f = fixture(MockBackend::with_files([("b.mp4", b"b".to_vec())]));
        std::fs::write(f.dir.path().join("c.mov"), b"c").unwrap();
        std::fs::write(f.dir.path().join("notes.txt"), b"n").unwrap();
        f.library.rescan_local().await.unwrap();

        // c.mov was only seen by an API rescan, so it is not a candidate yet.
        let report = f.library.sync_now().await.unwrap();
        assert!(report.deleted.is_empty());
        assert_eq!(names(&f.library.snapshot()), ["b.mp4", "c.mov"]);

        let report = f.library.sync_now().await.unwrap();
        assert_eq!(report.deleted, [PathBuf::from("c.mov")]);
        assert!(f.dir.path().join("notes.txt").exists());
    }

    #[tokio::test]
    async fn test_non_media_remote_keys_are_mirrored_but_never_deleted() {
        let f = fixture(MockBackend::with_files([("a.mp4", b"a".to_vec()), ("readme.txt", b"r".to_vec())]));
        f.library.sync_now().await.unwrap();
        assert!(f.dir.path().join("readme.txt").exists());
        assert_eq!(names(&f.library.snapshot()), ["a.mp4"]);
        f.remote.remove("readme.txt").await;
        let report = f.library.sync_now().await.unwrap();
        assert!(report.deleted.is_empty());
        assert!(f.dir.path().join("readme.txt").exists());
    }

    #[tokio::test]
    async fn test_listing_failure_changes_nothing() {
        let f = fixture(
            MockBackend::with_files([("a.mp4", b"a".to_vec()), ("b.mp4", b"b".to_vec()), ("c.mp4", b"c".to_vec())])
                .with_page_size(1),
        );
        f.library.sync_now().await.unwrap();
        let before = f.library.snapshot();

        f.remote.remove("a.mp4").await;
        f.remote.fail_listing_after(Some(1)).await;
        let err = f.library.sync_now().await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Listing));
        assert!(Arc::ptr_eq(&before, &f.library.snapshot()));
        assert!(f.dir.path().join("a.mp4").exists());
    }

    #[tokio::test]
    async fn test_pagination_is_followed_to_the_end() {
        let files: Vec<_> = (0..7).map(|i| (format!("clip{i}.mp4"), vec![i as u8])).collect();
        let f = fixture(MockBackend::with_files(files).with_page_size(2));
        let report = f.library.sync_now().await.unwrap();
        assert_eq!(report.downloaded.len(), 7);
        assert_eq!(f.library.snapshot().len(), 7);
    }

    #[tokio::test]
    async fn test_failed_download_is_isolated() {
        let f = fixture(MockBackend::with_files([("a.mp4", vec![1u8; 1024]), ("b.mp4", vec![2u8; 1024])]));
        f.remote.interrupt_transfer("a.mp4").await;
        let report = f.library.sync_now().await.unwrap();
        assert_eq!(report.failed_downloads, [PathBuf::from("a.mp4")]);
        assert_eq!(report.downloaded, [PathBuf::from("b.mp4")]);
        assert_eq!(names(&f.library.snapshot()), ["b.mp4"]);
        let leftovers: Vec<_> = std::fs::read_dir(f.dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(leftovers, ["b.mp4"]);
    }

    #[tokio::test]
    async fn test_deletion_of_already_missing_file_counts() {
        let f = fixture(MockBackend::with_files([("a.mp4", b"a".to_vec())]));
        f.library.sync_now().await.unwrap();
        std::fs::remove_file(f.dir.path().join("a.mp4")).unwrap();
        f.remote.remove("a.mp4").await;
        let report = f.library.sync_now().await.unwrap();
        assert_eq!(report.deleted, [PathBuf::from("a.mp4")]);
        assert!(report.failed_deletions.is_empty());
    }

    #[tokio::test]
    async fn test_restart_applies_remote_deletions_on_first_cycle() {
        let f = fixture(MockBackend::with_files([("b.mp4", b"b".to_vec())]));
        std::fs::write(f.dir.path().join("a.mp4"), b"a").unwrap();
        std::fs::write(f.dir.path().join("b.mp4"), b"b").unwrap();

        f.library.adopt_baseline().await.unwrap();
        let report = f.library.sync_now().await.unwrap();
        assert_eq!(report.deleted, [PathBuf::from("a.mp4")]);
        assert!(!f.dir.path().join("a.mp4").exists());
        assert_eq!(names(&f.library.snapshot()), ["b.mp4"]);
    }

    #[tokio::test]
    async fn test_adopt_baseline_after_cycle_keeps_cycle_baseline() {
        let f = fixture(MockBackend::with_files([("b.mp4", b"b".to_vec())]));
        f.library.sync_now().await.unwrap();
        std::fs::write(f.dir.path().join("c.mov"), b"c").unwrap();
        f.library.adopt_baseline().await.unwrap();
        let report = f.library.sync_now().await.unwrap();
        assert!(report.deleted.is_empty());
        assert!(f.dir.path().join("c.mov").exists());
    }

    #[tokio::test]
    async fn test_no_remote() {
        let dir = tempfile::tempdir().unwrap();
        let library = Library::new(Context::new(dir.path(), "/media/"), None);
        let err = library.sync_now().await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NoRemote));
    }

    #[tokio::test]
    async fn test_failed_rescan_keeps_last_inventory() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("media");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(root.join("a.mp4"), b"a").unwrap();
        let library = Library::new(Context::new(&root, "/media/"), None);
        let good = library.rescan_local().await.unwrap();
        std::fs::remove_dir_all(&root).unwrap();
        let err = library.rescan_local().await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::PartialScan(_)));
        assert!(Arc::ptr_eq(&good, &library.snapshot()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_readers_only_see_complete_inventories() {
        let files: Vec<_> = (0..50).map(|i| (format!("clip{i:02}.mp4"), vec![0u8])).collect();
        let f = fixture(MockBackend::with_files(files));
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let library = f.library.clone();
                let stop = stop.clone();
                tokio::spawn(async move {
                    while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                        let inventory = library.snapshot();
                        assert!(inventory.is_empty() || inventory.len() == 50);
                        assert!(inventory.entries().windows(2).all(|w| w[0].name() <= w[1].name()));
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        f.library.sync_now().await.unwrap();
        stop.store(true, std::sync::atomic::Ordering::Relaxed);
        for reader in readers {
            reader.await.unwrap();
        }
        assert_eq!(f.library.snapshot().len(), 50);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_sync_and_rescan_converge() {
        let f = fixture(MockBackend::with_files([("a.mp4", b"a".to_vec()), ("b.mp4", b"b".to_vec())]));
        let (sync, rescan) = tokio::join!(f.library.sync_now(), async {
            tokio::time::sleep(Duration::from_millis(1)).await;
            f.library.rescan_local().await
        });
        sync.unwrap();
        rescan.unwrap();
        f.library.rescan_local().await.unwrap();
        assert_eq!(names(&f.library.snapshot()), ["a.mp4", "b.mp4"]);
    }
}
