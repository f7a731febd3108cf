//! How an item is materialized in a collection.
//!
//! Every collection picks one of three strategies per item: a byte copy, a
//! transcode through the encoder of the collection's target format, or a
//! symbolic link back into the library. The choice depends only on the
//! collection's [`Mode`] and the item's format, and it fixes both the
//! destination extension and the format recorded in the manifest.

use crate::model::LibraryItem;
use shadow_config::{EncoderProfile, LinkType, Mode, normalize_format};
use std::path::{Component, Path, PathBuf};

/// Representation strategy for one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    Copy,
    Transcode(EncoderProfile),
    Link(LinkType),
}

/// The decided representation of an item, before its path is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Representation {
    pub strategy: Strategy,
    /// Format recorded in the manifest once the item is materialized.
    pub format: String,
    /// Destination file extension, without a dot.
    pub extension: String,
}

impl Representation {
    pub fn for_item(mode: &Mode, item: &LibraryItem) -> Self {
        let source_format = normalize_format(&item.format);
        let source_extension = || item.path.extension().map(|e| e.to_string_lossy().into_owned()).unwrap_or_default();
        match mode {
            Mode::Convert { encoder, .. } if !mode.accepts(&item.format) => Self {
                strategy: Strategy::Transcode(encoder.clone()),
                format: mode.target().map(str::to_string).unwrap_or(source_format),
                extension: encoder.extension.clone(),
            },
            Mode::Copy | Mode::Convert { .. } => Self {
                strategy: Strategy::Copy,
                format: source_format,
                extension: source_extension(),
            },
            Mode::Link(link_type) => Self {
                strategy: Strategy::Link(*link_type),
                format: source_format,
                extension: source_extension(),
            },
        }
    }

    pub fn is_link(&self) -> bool {
        matches!(self.strategy, Strategy::Link(_))
    }

    /// Whether a file recorded with `format` is still an acceptable
    /// materialization of this representation.
    pub fn accepts_stored(&self, format: &str) -> bool {
        normalize_format(format) == self.format
    }

    /// The symlink target for a link stored at `dest` inside `root`.
    ///
    /// Relative targets are computed from the directory containing the link.
    pub fn link_target(&self, source: &Path, root: &Path, dest: &Path) -> Option<PathBuf> {
        match self.strategy {
            Strategy::Link(LinkType::Absolute) => Some(source.to_path_buf()),
            Strategy::Link(LinkType::Relative) => {
                let link = root.join(dest);
                let dir = link.parent().unwrap_or(root);
                Some(relative_to(source, dir))
            },
            _ => None,
        }
    }
}

/// Lexical path from `base` to `target`; both must be absolute.
pub(crate) fn relative_to(target: &Path, base: &Path) -> PathBuf {
    let target: Vec<Component> = target.components().filter(|c| *c != Component::CurDir).collect();
    let base: Vec<Component> = base.components().filter(|c| *c != Component::CurDir).collect();
    let common = target.iter().zip(&base).take_while(|(a, b)| a == b).count();
    let mut path = PathBuf::new();
    for _ in common..base.len() {
        path.push("..");
    }
    for component in &target[common..] {
        path.push(component);
    }
    path
}
