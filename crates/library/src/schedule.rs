//! Periodic reconciliation.

use crate::library::Library;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// What the scheduler is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Cycling,
}

/// Runs a reconciliation cycle at startup and then once per interval.
///
/// A failed cycle is logged and retried on the next tick, unless the failure
/// cannot go away by itself (no remote configured). Cancellation is only
/// observed between cycles.
pub struct Scheduler {
    library: Arc<Library>,
    interval: Duration,
    state: watch::Sender<SyncState>,
}

impl Scheduler {
    pub fn new(library: Arc<Library>, interval: Duration) -> Self {
        let (state, _) = watch::channel(SyncState::Idle);
        Self {
            library,
            interval: interval.max(Duration::from_millis(1)),
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval_secs = self.interval.as_secs(), "Sync scheduler started");
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {},
            }
            self.state.send_replace(SyncState::Cycling);
            match self.library.sync_now().await {
                Ok(report) if report.is_noop() => tracing::debug!("Media already in sync"),
                Ok(_) => {},
                Err(err) if err.is_retryable() => {
                    tracing::error!(error = ?err, "Sync cycle failed; retrying next interval")
                },
                Err(err) => {
                    tracing::error!(error = ?err, "Sync cannot run; stopping scheduler");
                    break;
                },
            }
            self.state.send_replace(SyncState::Idle);
        }
        self.state.send_replace(SyncState::Idle);
        tracing::info!("Sync scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Context;
    use signage_storage::BackendHandle;
    use signage_storage::backend::MockBackend;

    fn library(dir: &tempfile::TempDir, remote: Arc<MockBackend>) -> Arc<Library> {
        let handle: BackendHandle = remote;
        Arc::new(Library::new(Context::new(dir.path(), "/media/"), Some(handle)))
    }

    #[tokio::test]
    async fn test_first_cycle_runs_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(MockBackend::with_files([("a.mp4", b"a".to_vec())]));
        let library = library(&dir, remote);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(Scheduler::new(library.clone(), Duration::from_secs(3600)).run(shutdown.clone()));
        tokio::time::timeout(Duration::from_secs(5), async {
            while library.snapshot().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_keeps_ticking_after_failures() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(MockBackend::default());
        remote.fail_listing_after(Some(0)).await;
        let library = library(&dir, remote.clone());
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(Scheduler::new(library, Duration::from_millis(20)).run(shutdown.clone()));
        tokio::time::timeout(Duration::from_secs(5), async {
            while remote.list_calls() < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_stops_without_remote() {
        let dir = tempfile::tempdir().unwrap();
        let library = Arc::new(Library::new(Context::new(dir.path(), "/media/"), None));
        let task = tokio::spawn(Scheduler::new(library, Duration::from_millis(5)).run(CancellationToken::new()));
        tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_stops_idle_when_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(MockBackend::default());
        let library = library(&dir, remote.clone());
        let scheduler = Scheduler::new(library, Duration::from_secs(3600));
        let mut state = scheduler.subscribe();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(scheduler.run(shutdown.clone()));
        while remote.list_calls() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        state.wait_for(|s| *s == SyncState::Idle).await.unwrap();
        shutdown.cancel();
        task.await.unwrap();
        assert_eq!(*state.borrow(), SyncState::Idle);
    }
}
