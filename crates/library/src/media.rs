//! Media entries and the ordered inventory built from them.

use serde::Serialize;
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

/// Video container extensions recognized as playable media.
pub const SUPPORTED_EXTENSIONS: [&str; 7] = ["mp4", "avi", "mov", "mkv", "webm", "m4v", "3gp"];

/// Whether `path` has a supported media extension (case-insensitive).
pub fn is_media_file(path: &Path) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.iter().any(|supported| supported.eq_ignore_ascii_case(ext)))
}

/// One playable file below the media root.
///
/// Identified by its relative path. Serializes as `{ name, path, url }`,
/// where `path` is the file's location on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaEntry {
    name: String,
    #[serde(skip)]
    relative_path: PathBuf,
    #[serde(rename = "path")]
    absolute_path: PathBuf,
    url: String,
}
impl MediaEntry {
    pub fn new(root: &Path, relative_path: impl Into<PathBuf>, url_prefix: &str) -> Self {
        let relative_path = relative_path.into();
        let name = relative_path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let slashed: Vec<_> = relative_path
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy()),
                _ => None,
            })
            .collect();
        let url = format!("{url_prefix}{}", slashed.join("/"));
        Self {
            name,
            absolute_path: root.join(&relative_path),
            relative_path,
            url,
        }
    }

    /// File name only, the sort key of the inventory.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn relative_path(&self) -> &Path {
        &self.relative_path
    }

    pub fn absolute_path(&self) -> &Path {
        &self.absolute_path
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Media entries sorted ascending by file name.
///
/// The sort is stable: entries sharing a name keep the order the scanner
/// found them in, and all of them are retained.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    entries: Vec<MediaEntry>,
}
impl Inventory {
    pub fn from_entries(mut entries: Vec<MediaEntry>) -> Self {
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Self { entries }
    }

    pub fn entries(&self) -> &[MediaEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &MediaEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, relative_path: &Path) -> bool {
        self.entries.iter().any(|e| e.relative_path == relative_path)
    }

    /// Wire representation consumed by the player.
    pub fn to_response(&self) -> InventoryResponse<'_> {
        InventoryResponse {
            media: &self.entries,
            count: self.entries.len(),
        }
    }
}

/// `{ "media": [...], "count": N }`
#[derive(Debug, Serialize)]
pub struct InventoryResponse<'a> {
    pub media: &'a [MediaEntry],
    pub count: usize,
}
