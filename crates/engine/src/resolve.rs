//! Destination paths and collision avoidance.

use crate::error::{ErrorKind, Result};
use crate::library::Library;
use crate::model::{Album, ItemId, LibraryItem, item_view};
use crate::template::PathGenerator;
use shadow_config::{Condition, PathRule};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Resolves collection-relative paths for the items of one run.
///
/// Rendering is a pure function of an item's metadata and the collection's
/// templates. On top of that the resolver remembers which item each path was
/// handed to, so that two items rendering to the same path within one run get
/// distinct destinations. It never looks at the filesystem.
pub struct PathResolver {
    rules: Vec<(Condition, PathGenerator)>,
    assigned: HashMap<PathBuf, ItemId>,
}

impl PathResolver {
    /// Compile the templates of a collection.
    pub fn new(rules: &[PathRule]) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|rule| Ok((rule.condition.clone(), rule.template.parse::<PathGenerator>()?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules, assigned: HashMap::new() })
    }

    /// Render the path of an item, with `extension` appended, ignoring
    /// collisions.
    pub fn render(
        &self,
        library: &dyn Library,
        item: &LibraryItem,
        album: Option<&Album>,
        extension: &str,
    ) -> Result<PathBuf> {
        let view = item_view(item, album);
        for (condition, generator) in &self.rules {
            let applies = match condition {
                Condition::Default => true,
                Condition::Singleton => item.is_singleton(),
                Condition::Comp => view.flag("comp"),
                Condition::Query(expression) => library.matches(expression, item, album)?,
            };
            if applies {
                return generator.generate_with_ext(&view, extension);
            }
        }
        // Validated collections always end in a default rule.
        exn::bail!(ErrorKind::Configuration)
    }

    /// Mark `path` as taken by `owner`, whatever the run decides.
    pub fn reserve(&mut self, owner: ItemId, path: impl Into<PathBuf>) {
        self.assigned.insert(path.into(), owner);
    }

    /// Take `path` for `owner` if nobody else holds it.
    pub fn claim(&mut self, owner: ItemId, path: &Path) -> bool {
        match self.assigned.get(path) {
            Some(holder) => *holder == owner,
            None => {
                self.assigned.insert(path.to_path_buf(), owner);
                true
            },
        }
    }

    /// The first free variant of `path` for `owner`: the path itself, then
    /// `stem.1.ext`, `stem.2.ext` and so on.
    pub fn resolve(&mut self, owner: ItemId, path: PathBuf) -> PathBuf {
        if self.claim(owner, &path) {
            return path;
        }
        let mut counter = 1u32;
        loop {
            let candidate = numbered(&path, counter);
            if self.claim(owner, &candidate) {
                tracing::debug!(item = owner, from = %path.display(), to = %candidate.display(), "Resolved path collision");
                return candidate;
            }
            counter += 1;
        }
    }
}

fn numbered(path: &Path, counter: u32) -> PathBuf {
    let mut name = path.file_stem().unwrap_or_default().to_os_string();
    name.push(format!(".{counter}"));
    if let Some(ext) = path.extension() {
        name.push(".");
        name.push(ext);
    }
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::SnapshotLibrary;
    use crate::model::Metadata;
    use time::UtcDateTime;

    fn item(id: ItemId, album_id: Option<u64>, metadata: Metadata) -> LibraryItem {
        LibraryItem {
            id,
            path: PathBuf::from(format!("/music/{id}.flac")),
            format: "FLAC".into(),
            mtime: UtcDateTime::from_unix_timestamp(0).unwrap(),
            album_id,
            metadata,
        }
    }

    fn rule(condition: Condition, template: &str) -> PathRule {
        PathRule { condition, template: template.into() }
    }

    fn resolver() -> PathResolver {
        PathResolver::new(&[
            rule(Condition::Query("genre:jazz".into()), "Jazz/{{ title }}"),
            rule(Condition::Comp, "Compilations/{{ album }}/{{ title }}"),
            rule(Condition::Singleton, "Non-Album/{{ artist }}/{{ title }}"),
            rule(Condition::Default, "{{ artist }}/{{ album }}/{{ title }}"),
        ])
        .unwrap()
    }

    #[test]
    fn test_conditions_in_order() {
        let library = SnapshotLibrary::default();
        let resolver = resolver();
        let album = Album { id: 1, art_path: None, art_mtime: None, metadata: Metadata::new().with("album", "Hits") };
        let meta = || Metadata::new().with("artist", "A").with("title", "T");

        let jazz = item(1, None, meta().with("genre", "Jazz"));
        assert_eq!(resolver.render(&library, &jazz, None, "mp3").unwrap(), Path::new("Jazz/T.mp3"));
        let single = item(2, None, meta());
        assert_eq!(resolver.render(&library, &single, None, "mp3").unwrap(), Path::new("Non-Album/A/T.mp3"));
        let comp = item(3, Some(1), meta().with("comp", true));
        assert_eq!(resolver.render(&library, &comp, Some(&album), "mp3").unwrap(), Path::new("Compilations/Hits/T.mp3"));
        let regular = item(4, Some(1), meta());
        assert_eq!(resolver.render(&library, &regular, Some(&album), "flac").unwrap(), Path::new("A/Hits/T.flac"));
    }

    #[test]
    fn test_collisions_get_numbered() {
        let mut resolver = resolver();
        let path = PathBuf::from("A/Hits/T.mp3");
        assert_eq!(resolver.resolve(1, path.clone()), path);
        // The same item asking again keeps its path.
        assert_eq!(resolver.resolve(1, path.clone()), path);
        assert_eq!(resolver.resolve(2, path.clone()), Path::new("A/Hits/T.1.mp3"));
        assert_eq!(resolver.resolve(3, path.clone()), Path::new("A/Hits/T.2.mp3"));
    }

    #[test]
    fn test_reserved_paths_are_skipped() {
        let mut resolver = resolver();
        resolver.reserve(9, "README");
        assert!(!resolver.claim(1, Path::new("README")));
        assert_eq!(resolver.resolve(1, PathBuf::from("README")), Path::new("README.1"));
    }
}
