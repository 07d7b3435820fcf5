//! Library Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A library error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Classifies the origin of a failure.
///
/// Only [`Listing`](Self::Listing) and [`NoRemote`](Self::NoRemote) ever
/// escape a reconciliation cycle; the per-item kinds are logged and the item
/// skipped.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The remote store could not be enumerated; the cycle was aborted
    /// before anything was changed.
    #[display("remote listing failed")]
    Listing,
    /// A single object could not be transferred.
    #[display("fetch failed: {}", _0.display())]
    Fetch(#[error(not(source))] PathBuf),
    /// A filesystem operation (mkdir, create, rename, remove, stat) failed.
    #[display("filesystem error: {}", _0.display())]
    Filesystem(#[error(not(source))] PathBuf),
    /// The media root itself could not be walked. Nothing was published.
    #[display("scan of {} did not complete", _0.display())]
    PartialScan(#[error(not(source))] PathBuf),
    /// A sync was requested but no remote store is configured.
    #[display("no remote store configured")]
    NoRemote,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::NoRemote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(ErrorKind::Fetch(PathBuf::from("promo/a.mp4")).to_string(), "fetch failed: promo/a.mp4");
        assert_eq!(ErrorKind::PartialScan(PathBuf::from("/srv/media")).to_string(), "scan of /srv/media did not complete");
    }

    #[test]
    fn test_retryable() {
        assert!(ErrorKind::Listing.is_retryable());
        assert!(!ErrorKind::NoRemote.is_retryable());
    }
}
