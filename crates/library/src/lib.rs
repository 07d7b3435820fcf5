//! Media inventory and synchronization engine.
//!
//! Keeps a local media root in step with a remote object store and publishes
//! the resulting [`Inventory`] for concurrent readers:
//!
//! - [`scan_directory`] walks the media root into a name-ordered [`Inventory`].
//! - [`SnapshotStore`] holds the published inventory and swaps it wholesale.
//! - [`reconcile`] diffs a remote listing against local state into a [`Plan`].
//! - [`fetch`] materializes one remote object through a temporary file.
//! - [`Library`] ties those together behind `snapshot()`, `rescan_local()`
//!   and `sync_now()`.
//! - [`Scheduler`] runs a reconciliation cycle at startup and on an interval.

pub mod error;
mod fetch;
mod library;
mod media;
mod reconcile;
mod scan;
mod schedule;
mod snapshot;

pub use crate::fetch::fetch;
pub use crate::library::{Library, SyncReport};
pub use crate::media::{Inventory, InventoryResponse, MediaEntry, SUPPORTED_EXTENSIONS, is_media_file};
pub use crate::reconcile::{Plan, probe_local, reconcile};
pub use crate::scan::scan_directory;
pub use crate::schedule::{Scheduler, SyncState};
pub use crate::snapshot::{Generation, SnapshotStore};
use std::path::PathBuf;

/// Settings shared by every component, built once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context {
    /// Local media root.
    pub root: PathBuf,
    /// Prefix of the serving URL, including leading and trailing slashes.
    pub url_prefix: String,
}
impl Context {
    pub fn new(root: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            url_prefix: url_prefix.into(),
        }
    }
}
