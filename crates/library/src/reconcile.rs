//! Diffing a remote listing against local state.

use crate::media::Inventory;
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

/// What one reconciliation cycle will do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    /// Remote paths missing locally.
    pub to_download: BTreeSet<PathBuf>,
    /// Baseline paths no longer present remotely.
    pub to_delete: BTreeSet<PathBuf>,
    /// Remote paths already on disk, accepted as they are.
    pub unchanged: BTreeSet<PathBuf>,
}
impl Plan {
    pub fn is_empty(&self) -> bool {
        self.to_download.is_empty() && self.to_delete.is_empty()
    }
}

/// Build the [`Plan`] for one cycle.
///
/// `present` holds the remote paths found on disk. Deletion candidates come
/// only from `baseline`, the inventory published by the previous cycle, so a
/// file that was never part of a reconciled inventory is left alone.
pub fn reconcile(remote: &BTreeSet<PathBuf>, present: &HashSet<PathBuf>, baseline: Option<&Inventory>) -> Plan {
    let (unchanged, to_download) = remote.iter().cloned().partition(|path| present.contains(path));
    let to_delete = baseline
        .map(|inventory| {
            inventory
                .iter()
                .map(|entry| entry.relative_path())
                .filter(|path| !remote.contains(*path))
                .map(Path::to_path_buf)
                .collect()
        })
        .unwrap_or_default();
    Plan {
        to_download,
        to_delete,
        unchanged,
    }
}

/// Which of the `remote` paths already exist below `root`.
///
/// A path that cannot be probed counts as present: re-downloading over a
/// file that may exist is worse than trying again next cycle.
pub async fn probe_local(root: &Path, remote: &BTreeSet<PathBuf>) -> HashSet<PathBuf> {
    let mut present = HashSet::with_capacity(remote.len());
    for path in remote {
        match tokio::fs::try_exists(root.join(path)).await {
            Ok(true) => {
                present.insert(path.clone());
            },
            Ok(false) => {},
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "Could not probe local file; treating as present");
                present.insert(path.clone());
            },
        }
    }
    present
}
