//! Local filesystem storage backend.
//!
//! Serves a collection directory on the local filesystem through `tokio::fs`.

use crate::error::ErrorKind;
use crate::models::EntryKind;
use crate::path::{STAGING_PREFIX, staging, validate as validate_path};
use crate::{FileInfo, StorageBackend, error::Result};
use async_trait::async_trait;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Local filesystem storage backend.
///
/// All paths are relative to the configured collection root. Unlike a
/// library backend, construction never creates the root: whether a missing
/// collection directory may be created is the caller's decision (see
/// [`create_root`](StorageBackend::create_root)).
///
/// # Examples
///
/// ```no_run
/// use shadow_storage::LocalBackend;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = LocalBackend::new("myplayer", "/media/player/Music")?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LocalBackend {
    name: String,
    /// Root directory of the collection
    root: PathBuf,
}
impl LocalBackend {
    /// Create a new local backend rooted at an absolute `root`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidPath`] if the path is not absolute, or if
    /// it exists but is not a directory.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(root));
        }
        if root.exists() && !root.is_dir() {
            exn::bail!(ErrorKind::InvalidPath(root));
        }
        Ok(Self { name: name.into(), root })
    }

    fn absolute_path(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let validated = validate_path(path.as_ref())?;
        Ok(self.root.join(validated))
    }

    fn metadata(path: &Path, metadata: Metadata) -> Result<FileInfo> {
        let modified = metadata.modified().map_err(ErrorKind::Io)?.into();
        let kind = match metadata.file_type() {
            t if t.is_symlink() => EntryKind::Symlink,
            t if t.is_dir() => EntryKind::Directory,
            _ => EntryKind::File,
        };
        Ok(FileInfo::new(PathBuf::from(path), metadata.len(), modified, kind))
    }

    fn map_io_error(e: std::io::Error, path: &Path) -> ErrorKind {
        match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied(path.to_path_buf()),
            std::io::ErrorKind::AlreadyExists => ErrorKind::AlreadyExists(path.to_path_buf()),
            _ => ErrorKind::Io(e),
        }
    }

    async fn create_parent(&self, absolute: &Path, path: &Path) -> Result<()> {
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent).await.map_err(|e| Self::map_io_error(e, path))?;
        }
        Ok(())
    }

    /// Removes whatever sits at `absolute`, ignoring absence.
    async fn remove_if_present(absolute: &Path, path: &Path) -> Result<()> {
        match fs::remove_file(absolute).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::map_io_error(e, path).into()),
        }
    }

    /// Whether the directory at `dir` contains only expendable entries,
    /// returning them for removal; `None` means it must be kept.
    async fn expendable_entries(dir: &Path, expendable: Option<&str>) -> std::io::Result<Option<Vec<PathBuf>>> {
        let mut entries = fs::read_dir(dir).await?;
        let mut doomed = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let stem = path.file_stem().map(|s| s.to_string_lossy());
            let is_sidecar = !file_type.is_dir() && expendable.is_some() && stem.as_deref() == expendable;
            // Leftover staging files from an interrupted run are garbage too.
            let is_staging = !file_type.is_dir() && name.starts_with(STAGING_PREFIX);
            if !(is_sidecar || is_staging) {
                return Ok(None);
            }
            doomed.push(path);
        }
        Ok(Some(doomed))
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn local_path(&self, path: &Path) -> Result<PathBuf> {
        self.absolute_path(path)
    }

    async fn root_exists(&self) -> Result<bool> {
        match fs::metadata(&self.root).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Self::map_io_error(e, &self.root).into()),
        }
    }

    async fn create_root(&self) -> Result<()> {
        tracing::info!(collection = %self.name, root = %self.root.display(), "Creating collection directory");
        Ok(fs::create_dir_all(&self.root).await.map_err(|e| Self::map_io_error(e, &self.root))?)
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let abs_path = self.absolute_path(path)?;
        match fs::symlink_metadata(&abs_path).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Self::map_io_error(e, path).into()),
        }
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let abs_path = self.absolute_path(path)?;
        let metadata = fs::symlink_metadata(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?;
        Self::metadata(path, metadata)
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let staged = self.stage(path).await?;
        fs::write(&staged, data).await.map_err(|e| Self::map_io_error(e, path))?;
        self.commit(path).await
    }

    async fn stage(&self, path: &Path) -> Result<PathBuf> {
        let abs_path = self.absolute_path(path)?;
        self.create_parent(&abs_path, path).await?;
        let staged = staging(&abs_path);
        Self::remove_if_present(&staged, path).await?;
        Ok(staged)
    }

    async fn stage_copy(&self, source: &Path, path: &Path) -> Result<PathBuf> {
        let staged = self.stage(path).await?;
        fs::copy(source, &staged).await.map_err(|e| Self::map_io_error(e, source))?;
        Ok(staged)
    }

    async fn commit(&self, path: &Path) -> Result<()> {
        let abs_path = self.absolute_path(path)?;
        let staged = staging(&abs_path);
        Ok(fs::rename(&staged, &abs_path).await.map_err(|e| Self::map_io_error(e, path))?)
    }

    async fn discard(&self, path: &Path) -> Result<()> {
        let abs_path = self.absolute_path(path)?;
        Self::remove_if_present(&staging(&abs_path), path).await
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let abs_path = self.absolute_path(path)?;
        Ok(fs::remove_file(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?)
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let from_path = self.absolute_path(from)?;
        let to_path = self.absolute_path(to)?;
        self.create_parent(&to_path, to).await?;
        Ok(fs::rename(&from_path, &to_path).await.map_err(|e| Self::map_io_error(e, from))?)
    }

    async fn symlink(&self, target: &Path, link: &Path) -> Result<()> {
        let staged = self.stage(link).await?;
        #[cfg(unix)]
        fs::symlink(target, &staged).await.map_err(|e| Self::map_io_error(e, link))?;
        #[cfg(windows)]
        fs::symlink_file(target, &staged).await.map_err(|e| Self::map_io_error(e, link))?;
        // rename(2) replaces an existing link in one step.
        self.commit(link).await
    }

    async fn read_link(&self, path: &Path) -> Result<PathBuf> {
        let abs_path = self.absolute_path(path)?;
        Ok(fs::read_link(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?)
    }

    async fn prune(&self, path: &Path, expendable: Option<&str>) -> Result<()> {
        let abs_path = self.absolute_path(path)?;
        let mut current = abs_path.parent().map(Path::to_path_buf);
        while let Some(dir) = current {
            if dir == self.root || !dir.starts_with(&self.root) {
                break;
            }
            let doomed = match Self::expendable_entries(&dir, expendable).await {
                Ok(Some(doomed)) => doomed,
                Ok(None) => break,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    current = dir.parent().map(Path::to_path_buf);
                    continue;
                },
                Err(e) => return Err(Self::map_io_error(e, &dir).into()),
            };
            for entry in doomed {
                Self::remove_if_present(&entry, &entry).await?;
            }
            fs::remove_dir(&dir).await.map_err(|e| Self::map_io_error(e, &dir))?;
            tracing::debug!(collection = %self.name, dir = %dir.display(), "Pruned empty directory");
            current = dir.parent().map(Path::to_path_buf);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn backend() -> (tempfile::TempDir, LocalBackend) {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("name", temp_dir.path()).unwrap();
        (temp_dir, backend)
    }

    #[test]
    fn test_new_requires_absolute_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(LocalBackend::new("name", temp_dir.path()).is_ok());
        assert!(LocalBackend::new("name", "relative/path").is_err());
    }

    #[test]
    fn test_new_does_not_create_root() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("missing");
        let _backend = LocalBackend::new("name", &root).unwrap();
        assert!(!root.exists());
    }

    #[test]
    fn test_absolute_path() {
        let (temp_dir, backend) = backend();
        let expected = temp_dir.path().join("Bach/aria.mp3");
        assert_eq!(backend.local_path(Path::new("Bach/aria.mp3")).unwrap(), expected);
        assert!(backend.local_path(Path::new("../etc/passwd")).is_err());
    }

    #[tokio::test]
    async fn test_root_exists_and_create() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("name", temp_dir.path().join("ext")).unwrap();
        assert!(!backend.root_exists().await.unwrap());
        backend.create_root().await.unwrap();
        assert!(backend.root_exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_write_creates_directories() {
        let (_dir, backend) = backend();
        backend.write(Path::new("a/b/c/file.mp3"), b"data").await.unwrap();
        assert!(backend.exists(Path::new("a/b/c/file.mp3")).await.unwrap());
        // The staging file is gone after the commit.
        assert!(!backend.exists(Path::new("a/b/c/.shadow-file.tmp.mp3")).await.unwrap());
    }

    #[tokio::test]
    async fn test_stage_copy_and_commit() {
        let (dir, backend) = backend();
        let source = dir.path().join("source.flac");
        std::fs::write(&source, b"flac bytes").unwrap();
        let staged = backend.stage_copy(&source, Path::new("out/track.flac")).await.unwrap();
        assert!(staged.exists());
        assert!(!backend.exists(Path::new("out/track.flac")).await.unwrap());
        backend.commit(Path::new("out/track.flac")).await.unwrap();
        assert_eq!(std::fs::read(dir.path().join("out/track.flac")).unwrap(), b"flac bytes");
    }

    #[tokio::test]
    async fn test_discard() {
        let (_dir, backend) = backend();
        let staged = backend.stage(Path::new("x/y.ogg")).await.unwrap();
        std::fs::write(&staged, b"partial").unwrap();
        backend.discard(Path::new("x/y.ogg")).await.unwrap();
        assert!(!staged.exists());
        // Discarding twice is fine.
        backend.discard(Path::new("x/y.ogg")).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete() {
        let (_dir, backend) = backend();
        backend.write(Path::new("file.mp3"), b"data").await.unwrap();
        backend.delete(Path::new("file.mp3")).await.unwrap();
        assert!(!backend.exists(Path::new("file.mp3")).await.unwrap());
        let err = backend.delete(Path::new("file.mp3")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_rename_creates_directories() {
        let (_dir, backend) = backend();
        backend.write(Path::new("file.mp3"), b"data").await.unwrap();
        backend.rename(Path::new("file.mp3"), Path::new("a/b/file.mp3")).await.unwrap();
        assert!(!backend.exists(Path::new("file.mp3")).await.unwrap());
        assert!(backend.exists(Path::new("a/b/file.mp3")).await.unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_replaces_existing_link() {
        let (dir, backend) = backend();
        let first = dir.path().join("first.mp3");
        let second = dir.path().join("second.mp3");
        std::fs::write(&first, b"1").unwrap();
        std::fs::write(&second, b"2").unwrap();
        backend.symlink(&first, Path::new("view/track.mp3")).await.unwrap();
        assert_eq!(backend.read_link(Path::new("view/track.mp3")).await.unwrap(), first);
        backend.symlink(&second, Path::new("view/track.mp3")).await.unwrap();
        assert_eq!(backend.read_link(Path::new("view/track.mp3")).await.unwrap(), second);
        let info = backend.stat(Path::new("view/track.mp3")).await.unwrap();
        assert!(info.is_symlink());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dangling_symlink_exists() {
        let (_dir, backend) = backend();
        backend.symlink(Path::new("/nowhere/at/all.mp3"), Path::new("gone.mp3")).await.unwrap();
        assert!(backend.exists(Path::new("gone.mp3")).await.unwrap());
    }

    #[tokio::test]
    async fn test_prune_stops_at_content() {
        let (dir, backend) = backend();
        backend.write(Path::new("a/b/one.mp3"), b"1").await.unwrap();
        backend.write(Path::new("a/two.mp3"), b"2").await.unwrap();
        backend.delete(Path::new("a/b/one.mp3")).await.unwrap();
        backend.prune(Path::new("a/b/one.mp3"), None).await.unwrap();
        assert!(!dir.path().join("a/b").exists());
        assert!(dir.path().join("a").exists());
        assert!(dir.path().exists());
    }

    #[tokio::test]
    async fn test_prune_removes_lone_sidecar() {
        let (dir, backend) = backend();
        backend.write(Path::new("Artist/Album/track.mp3"), b"1").await.unwrap();
        backend.write(Path::new("Artist/Album/cover.jpg"), b"art").await.unwrap();
        backend.delete(Path::new("Artist/Album/track.mp3")).await.unwrap();
        backend.prune(Path::new("Artist/Album/track.mp3"), Some("cover")).await.unwrap();
        assert!(!dir.path().join("Artist").exists());
        // The root itself is never pruned.
        assert!(dir.path().exists());
    }

    #[tokio::test]
    async fn test_path_security() {
        let (_dir, backend) = backend();
        assert!(backend.write(Path::new("../etc/passwd"), b"data").await.is_err());
        assert!(backend.delete(Path::new("../../file")).await.is_err());
        assert!(backend.stage(Path::new("a/../../b")).await.is_err());
    }
}
