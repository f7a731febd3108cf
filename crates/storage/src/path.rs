//! Path validation for collection-relative paths.
//!
//! Every path handed to a backend is relative to the collection root. Paths
//! rendered from user templates can contain anything, so they are normalized
//! here and rejected if they would leave the root.

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Prefix of the hidden sibling files used to stage writes before they are
/// renamed into place.
pub(crate) const STAGING_PREFIX: &str = ".shadow-";
const STAGING_MARKER: &str = "tmp";

/// Validates and normalizes a collection-relative path.
///
/// `.` components and repeated separators are dropped, `..` is resolved
/// lexically and must never climb above the root. Null bytes are rejected
/// explicitly. An empty result is an error.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use shadow_storage::validate_path;
/// assert!(validate_path("Bach/Goldberg Variations/01 Aria.mp3").is_ok());
/// assert!(validate_path("a/../cover.jpg").is_ok());
/// assert!(validate_path("../outside.mp3").is_err());
/// assert!(validate_path("a\0b").is_err());
/// assert_eq!(
///     validate_path("./1982//Thriller/../Thriller/track 1.mp3/").unwrap(),
///     Path::new("1982/Thriller/track 1.mp3")
/// );
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let mut components = Vec::new();
    for component in path.as_ref().components() {
        match component {
            Component::Normal(s) => {
                // Null bytes survive Path::components() on Unix but truncate
                // the path in the underlying syscalls.
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

/// Hidden sibling of `path` used to stage a write: `a/b.mp3` → `a/.shadow-b.tmp.mp3`.
///
/// The extension is kept last because encoders pick their output format from it.
pub(crate) fn staging(path: &Path) -> PathBuf {
    let mut name = OsString::from(STAGING_PREFIX);
    name.push(path.file_stem().unwrap_or_default());
    name.push(".");
    name.push(STAGING_MARKER);
    if let Some(ext) = path.extension() {
        name.push(".");
        name.push(ext);
    }
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_paths() {
        assert_eq!(validate("Bach/was mp3.mp3").unwrap(), Path::new("Bach/was mp3.mp3"));
        assert_eq!(validate("1990/Thriller/track 1.mp3").unwrap(), Path::new("1990/Thriller/track 1.mp3"));
        assert_eq!(validate("single.flac").unwrap(), Path::new("single.flac"));
    }

    #[test]
    fn test_path_normalization() {
        assert_eq!(validate("a//b//c.ogg").unwrap(), Path::new("a/b/c.ogg"));
        assert_eq!(validate("a/./b/./c.ogg").unwrap(), Path::new("a/b/c.ogg"));
        assert_eq!(validate("/rooted/track.ogg").unwrap(), Path::new("rooted/track.ogg"));
    }

    #[test]
    fn test_traversal_attempts() {
        assert!(validate("../etc/passwd").is_err());
        assert!(validate("a/../../b").is_err());
        assert!(validate("..").is_err());
    }

    #[test]
    fn test_invalid_and_empty() {
        assert!(validate("a\0b").is_err());
        assert!(validate("").is_err());
        assert!(validate("./.").is_err());
        assert!(validate("//").is_err());
    }

    #[test]
    fn test_staging_sibling() {
        assert_eq!(staging(Path::new("Bach/aria.mp3")), Path::new("Bach/.shadow-aria.tmp.mp3"));
        assert_eq!(staging(Path::new("aria.mp3")), Path::new(".shadow-aria.tmp.mp3"));
        assert_eq!(staging(Path::new("a/README")), Path::new("a/.shadow-README.tmp"));
    }
}
