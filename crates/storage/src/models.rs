//! Storage models.
//!
//! Metadata about entries inside a collection directory, as reported by a
//! storage backend without following symbolic links.

use std::path::PathBuf;
use time::OffsetDateTime;

/// What kind of directory entry lives at a path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    File,
    /// A symbolic link, whether or not its target exists.
    Symlink,
    Directory,
}

/// Entry metadata returned by storage backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Relative path from storage root
    pub path: PathBuf,
    /// Size in bytes (of the link itself for symlinks)
    pub size: u64,
    /// Last modified timestamp
    pub modified: OffsetDateTime,
    pub kind: EntryKind,
}
impl FileInfo {
    pub fn new(path: impl Into<PathBuf>, size: u64, modified: OffsetDateTime, kind: EntryKind) -> Self {
        Self {
            path: path.into(),
            size,
            modified,
            kind,
        }
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == EntryKind::Symlink
    }
}
