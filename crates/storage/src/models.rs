//! Storage models.
//!
//! These types represent remote object metadata as returned by the listing
//! operations of a storage backend.

use std::path::PathBuf;
use time::OffsetDateTime;

/// Object metadata returned by storage backends.
///
/// `path` is the object key, validated and converted into a relative path
/// (the same relative path the object is materialized at locally). Size and
/// modification time are informational: the sync engine never compares them
/// once an object exists locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Relative path from storage root (prefix already stripped)
    pub path: PathBuf,
    /// Object size in bytes
    pub size: u64,
    /// Last modified timestamp
    pub modified: OffsetDateTime,
}
impl ObjectInfo {
    pub fn new(path: impl Into<PathBuf>, size: u64, modified: OffsetDateTime) -> Self {
        Self {
            path: path.into(),
            size,
            modified,
        }
    }
}
