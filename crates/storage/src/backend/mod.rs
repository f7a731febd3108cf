//! Storage backend trait and implementations.
//!
//! A backend owns one collection directory. Every path passed in is relative
//! to that directory and validated with [`validate_path`](crate::validate_path)
//! before it touches the filesystem. Sources (library files, album art) live
//! outside the collection and are always given as absolute paths.

mod local;

pub use self::local::LocalBackend;
use crate::FileInfo;
use crate::error::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Unified interface over a collection directory.
///
/// Writes that produce a collection file are two-phase: [`stage`](Self::stage)
/// hands out a hidden sibling path that external tools (encoders, tag
/// writers) may write freely, and [`commit`](Self::commit) renames it over the
/// destination in one step. A crash in between leaves the destination either
/// absent or holding its previous content, never half-written.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// # use shadow_storage::{StorageBackend, error::Result};
/// # async fn example(backend: &dyn StorageBackend) -> Result<()> {
/// let dest = Path::new("Bach/Aria.mp3");
/// backend.stage_copy(Path::new("/music/Bach/01 Aria.mp3"), dest).await?;
/// // ... tag the staged file ...
/// backend.commit(dest).await?;
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Name of the collection this backend serves (used for logging).
    fn name(&self) -> &str;

    /// Absolute collection root.
    fn root(&self) -> &Path;

    /// Absolute filesystem path for a collection-relative path.
    fn local_path(&self, path: &Path) -> Result<PathBuf>;

    /// Whether the collection root exists as a directory.
    async fn root_exists(&self) -> Result<bool>;

    /// Create the collection root (and any missing ancestors).
    async fn create_root(&self) -> Result<()>;

    /// Whether anything (including a dangling symlink) exists at `path`.
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Entry metadata without following symlinks.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if nothing
    /// exists at `path`.
    async fn stat(&self, path: &Path) -> Result<FileInfo>;

    /// Atomically write `data` to `path`, creating parent directories.
    async fn write(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// Prepare the staging file for `path` and return its absolute location.
    ///
    /// Parent directories are created and any stale staging file left over
    /// from an interrupted run is removed.
    async fn stage(&self, path: &Path) -> Result<PathBuf>;

    /// Copy an external `source` file into the staging file for `path`.
    async fn stage_copy(&self, source: &Path, path: &Path) -> Result<PathBuf>;

    /// Rename the staging file for `path` over `path`.
    async fn commit(&self, path: &Path) -> Result<()>;

    /// Remove the staging file for `path`, if any.
    async fn discard(&self, path: &Path) -> Result<()>;

    /// Delete a file or symlink.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if nothing
    /// exists at `path`.
    async fn delete(&self, path: &Path) -> Result<()>;

    /// Rename within the collection, creating destination directories and
    /// replacing whatever is at `to`.
    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Create (or atomically replace) a symlink at `link` pointing to `target`.
    ///
    /// `target` is written verbatim, so it may be absolute or relative to the
    /// link's own directory.
    async fn symlink(&self, target: &Path, link: &Path) -> Result<()>;

    /// Read the raw target of the symlink at `path`.
    async fn read_link(&self, path: &Path) -> Result<PathBuf>;

    /// Remove empty directories from the parent of `path` upwards, stopping
    /// at the collection root.
    ///
    /// Files or links whose stem equals `expendable` (an album art sidecar)
    /// do not count as content: a directory holding nothing else is removed
    /// together with them.
    async fn prune(&self, path: &Path, expendable: Option<&str>) -> Result<()>;
}
