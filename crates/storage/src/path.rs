//! Key/path validation.
//!
//! Object keys map deterministically onto relative paths under the local
//! media root. This module performs that mapping in both directions and makes
//! sure no key can escape the root (no `..` traversal).

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Validates an object key (or relative path) for security and correctness.
/// Ensures that paths don't escape the storage root (no `..` traversal).
///
/// > **Note:** This does **not** normalize backslashes, non-UTF8 bytes, or
/// >           platform-specific weirdness. Null bytes are explicitly rejected.
///
/// # Returns
/// Returns the normalized path if valid, or [`InvalidPath`](crate::error::ErrorKind::InvalidPath)
/// if invalid.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use signage_storage::validate_path;
/// // Valid paths
/// assert!(validate_path("lobby/welcome.mp4").is_ok());
/// assert!(validate_path("a/b/c/clip.webm").is_ok());
/// assert!(validate_path("a/../clip.mp4").is_ok()); // (never leaves media root)
/// // Invalid paths
/// assert!(validate_path("../etc/passwd").is_err());
/// assert!(validate_path("a/../../b").is_err()); // (leaves media root)
/// assert!(validate_path("a\0b").is_err());
/// // Paths get resolved
/// assert_eq!(
///     validate_path("wrong/../still-wrong/.././correct//./clip.mp4/").unwrap(),
///     Path::new("correct/clip.mp4")
/// );
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    // Use Rust's built-in path component parser for robust handling. Means we
    // don't have to deal with non-UTF8, or the maniacs on Unix that use
    // backslashes in their filenames.
    let mut components = Vec::new();
    for component in path.as_ref().components() {
        match component {
            Component::Normal(s) => {
                // Null bytes pass through Path::components() on Unix but cause
                // truncation in C-based syscalls, reject them explicitly.
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf()));
                }
                components.push(s)
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf())),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf()));
                }
            },
        }
    }
    match components.is_empty() {
        true => exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf())),
        false => Ok(components.into_iter().collect()),
    }
}

/// Converts a relative path back into the slash-separated object key it was
/// derived from.
///
/// ```
/// use std::path::Path;
/// use signage_storage::object_key;
/// assert_eq!(object_key(Path::new("lobby/welcome.mp4")).unwrap(), "lobby/welcome.mp4");
/// assert!(object_key(Path::new("../welcome.mp4")).is_err());
/// ```
pub fn to_key(path: impl AsRef<Path>) -> Result<String> {
    let validated = validate(path.as_ref())?;
    let mut parts = Vec::new();
    for component in validated.components() {
        match component.as_os_str().to_str() {
            Some(part) => parts.push(part),
            None => exn::bail!(ErrorKind::InvalidPath(validated.clone())),
        }
    }
    Ok(parts.join("/"))
}
