//! The diff planner.
//!
//! Planning is a pure function of three snapshots: the resolved target set
//! (what the collection should contain), the manifest (what the engine last
//! recorded) and the presence of each recorded file on disk. It produces
//! [`Action`]s grouped into stages; every action of a stage may run
//! concurrently, and a stage only starts once the previous one is done.
//!
//! For an item that is both selected and recorded, the first matching rule
//! decides:
//!
//! | Condition                                          | Action                  |
//! |----------------------------------------------------|-------------------------|
//! | recorded file is missing                           | `ADD`                   |
//! | stored format or entry kind no longer fits         | `ADD` (overwrite)       |
//! | resolved path differs from the recorded one        | `MOVE`                  |
//! | link points somewhere other than the source        | `MOVE` (recreate link)  |
//! | source is newer than the last sync (not for links) | `WRITE`                 |
//! | album art is newer than the last art sync          | `SYNC_ART`              |

mod order;

use crate::model::{Album, ItemId, LibraryItem};
use crate::represent::Representation;
use derive_more::Display;
use shadow_config::CollectionSpec;
use shadow_manifest::CollectionItem;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// The kinds of change a run applies.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ActionKind {
    #[display("REMOVE")]
    Remove,
    #[display("ADD")]
    Add,
    #[display("MOVE")]
    Move,
    #[display("WRITE")]
    Write,
    #[display("SYNC_ART")]
    SyncArt,
}

/// Why an action was planned.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    #[display("no longer selected")]
    NotSelected,
    #[display("new item")]
    New,
    #[display("file missing on disk")]
    FileMissing,
    #[display("representation changed")]
    Representation,
    #[display("path changed")]
    PathChanged,
    #[display("stale link target")]
    StaleLink,
    #[display("source is newer")]
    SourceNewer,
    #[display("album art is newer")]
    ArtNewer,
    /// Temporary relocation that lets two items swap paths.
    #[display("making room")]
    Park,
}

/// What exists at a recorded path, without following links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Presence {
    Missing,
    File,
    Link(PathBuf),
}

/// An item the collection should contain, with its resolved destination.
#[derive(Debug, Clone)]
pub struct Target {
    pub item: LibraryItem,
    pub album: Option<Album>,
    /// Collection-relative destination.
    pub path: PathBuf,
    pub representation: Representation,
    /// Expected symlink target, for link collections.
    pub link_target: Option<PathBuf>,
}

/// One planned change to one item.
#[derive(Debug, Clone)]
pub struct Action {
    pub kind: ActionKind,
    pub item_id: ItemId,
    /// Where the item currently lives, if it lives anywhere.
    pub old_path: Option<PathBuf>,
    /// Resulting path; for `REMOVE`, the path being deleted.
    pub path: PathBuf,
    pub reason: Reason,
    /// A `MOVE` that also rewrites tags at the new path.
    pub refresh_tags: bool,
    /// Re-sync album art along with the main change.
    pub refresh_art: bool,
    /// The selected item, absent for `REMOVE`.
    pub target: Option<Arc<Target>>,
    /// Manifest entry before the action.
    pub recorded: Option<CollectionItem>,
}
impl Action {
    fn new(kind: ActionKind, reason: Reason, target: &Arc<Target>, recorded: Option<&CollectionItem>) -> Self {
        Self {
            kind,
            item_id: target.item.id,
            old_path: recorded.map(|r| r.path.clone()),
            path: target.path.clone(),
            reason,
            refresh_tags: false,
            refresh_art: false,
            target: Some(Arc::clone(target)),
            recorded: recorded.cloned(),
        }
    }

    fn remove(item_id: ItemId, recorded: &CollectionItem) -> Self {
        Self {
            kind: ActionKind::Remove,
            item_id,
            old_path: Some(recorded.path.clone()),
            path: recorded.path.clone(),
            reason: Reason::NotSelected,
            refresh_tags: false,
            refresh_art: false,
            target: None,
            recorded: Some(recorded.clone()),
        }
    }

    /// The path this action frees once applied.
    pub(crate) fn vacates(&self) -> Option<&Path> {
        match self.kind {
            ActionKind::Remove => Some(&self.path),
            ActionKind::Add | ActionKind::Move => self.old_path.as_deref().filter(|old| *old != self.path),
            ActionKind::Write | ActionKind::SyncArt => None,
        }
    }

    /// The path this action writes.
    pub(crate) fn occupies(&self) -> Option<&Path> {
        match self.kind {
            ActionKind::Add | ActionKind::Move => Some(&self.path),
            ActionKind::Remove | ActionKind::Write | ActionKind::SyncArt => None,
        }
    }

    /// Internal steps that are applied but neither reported nor counted.
    pub fn is_silent(&self) -> bool {
        self.reason == Reason::Park
    }
}

/// Snapshots a plan is computed from.
#[derive(Debug, Default)]
pub struct PlanInput {
    pub targets: Vec<Target>,
    pub manifest: BTreeMap<ItemId, CollectionItem>,
    /// On-disk state of each recorded path; absent entries count as missing.
    pub presence: HashMap<ItemId, Presence>,
    /// Recorded items this run may remove; `None` allows all of them.
    pub scope: Option<HashSet<ItemId>>,
    /// Selected items that could not be resolved; they are left untouched.
    pub held: HashSet<ItemId>,
}

/// Actions grouped into stages that must run one after another.
#[derive(Debug, Default)]
pub struct Plan {
    pub stages: Vec<Vec<Action>>,
}
impl Plan {
    /// Number of reportable actions.
    pub fn len(&self) -> usize {
        self.actions().filter(|a| !a.is_silent()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.stages.iter().flatten()
    }
}

/// Compute the actions that bring a collection in line with its targets.
pub fn plan(spec: &CollectionSpec, input: PlanInput) -> Plan {
    let PlanInput { targets, manifest, presence, scope, held } = input;
    let selected: HashSet<ItemId> = targets.iter().map(|t| t.item.id).chain(held.iter().copied()).collect();

    let mut actions: Vec<Action> = manifest
        .iter()
        .filter(|(id, _)| !selected.contains(id) && scope.as_ref().is_none_or(|s| s.contains(id)))
        .map(|(id, recorded)| Action::remove(*id, recorded))
        .collect();

    for target in targets {
        let target = Arc::new(target);
        let recorded = manifest.get(&target.item.id);
        let present = presence.get(&target.item.id).unwrap_or(&Presence::Missing);
        if let Some(action) = item_action(spec, &target, recorded, present) {
            actions.push(action);
        }
    }

    let plan = Plan { stages: order::stages(actions) };
    tracing::debug!(collection = %spec.name, actions = plan.len(), stages = plan.stages.len(), "Planned reconciliation");
    plan
}

fn item_action(
    spec: &CollectionSpec,
    target: &Arc<Target>,
    recorded: Option<&CollectionItem>,
    present: &Presence,
) -> Option<Action> {
    let Some(recorded) = recorded else {
        return Some(Action::new(ActionKind::Add, Reason::New, target, None));
    };
    let is_link = target.representation.is_link();
    let source_newer = target.item.mtime > recorded.source_mtime;
    let art_newer = spec.art_enabled()
        && target
            .album
            .as_ref()
            .and_then(Album::art)
            .is_some_and(|(_, mtime)| recorded.art_mtime.is_none_or(|synced| mtime > synced));

    let action = match present {
        Presence::Missing => {
            let mut action = Action::new(ActionKind::Add, Reason::FileMissing, target, Some(recorded));
            // Nothing is left to clean up.
            action.old_path = None;
            action
        },
        Presence::File | Presence::Link(_)
            if !target.representation.accepts_stored(&recorded.format)
                || is_link != matches!(present, Presence::Link(_)) =>
        {
            Action::new(ActionKind::Add, Reason::Representation, target, Some(recorded))
        },
        _ if recorded.path != target.path => {
            let mut action = Action::new(ActionKind::Move, Reason::PathChanged, target, Some(recorded));
            action.refresh_tags = source_newer && !is_link;
            action.refresh_art = art_newer;
            action
        },
        Presence::Link(current) if target.link_target.as_ref() != Some(current) => {
            let mut action = Action::new(ActionKind::Move, Reason::StaleLink, target, Some(recorded));
            action.refresh_art = art_newer;
            action
        },
        _ if source_newer && !is_link => {
            let mut action = Action::new(ActionKind::Write, Reason::SourceNewer, target, Some(recorded));
            action.refresh_art = art_newer;
            action
        },
        _ if art_newer => Action::new(ActionKind::SyncArt, Reason::ArtNewer, target, Some(recorded)),
        _ => return None,
    };
    Some(action)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Metadata;
    use shadow_config::{ArtOptions, Condition, EncoderProfile, LinkType, Mode, PathRule};
    use time::UtcDateTime;

    fn t(secs: i64) -> UtcDateTime {
        UtcDateTime::from_unix_timestamp(secs).unwrap()
    }

    fn spec(mode: Mode) -> CollectionSpec {
        CollectionSpec {
            name: "player".into(),
            directory: PathBuf::from("/collections/player"),
            paths: vec![PathRule { condition: Condition::Default, template: "{{ title }}".into() }],
            query: String::new(),
            mode,
            removable: true,
            art: ArtOptions::default(),
        }
    }

    fn mp3() -> Mode {
        Mode::Convert { formats: vec!["mp3".into()], encoder: EncoderProfile::new("enc", "mp3") }
    }

    fn target(mode: &Mode, id: ItemId, format: &str, path: &str, mtime: i64) -> Target {
        let ext = if format == "FLAC" { "flac" } else { "mp3" };
        let item = LibraryItem {
            id,
            path: PathBuf::from(format!("/music/{id}.{ext}")),
            format: format.into(),
            mtime: t(mtime),
            album_id: Some(1),
            metadata: Metadata::new(),
        };
        let representation = Representation::for_item(mode, &item);
        let link_target = representation.link_target(&item.path, Path::new("/collections/player"), Path::new(path));
        Target { item, album: Some(album(None)), path: PathBuf::from(path), representation, link_target }
    }

    fn album(art_mtime: Option<i64>) -> Album {
        Album {
            id: 1,
            art_path: art_mtime.map(|_| PathBuf::from("/music/cover.jpg")),
            art_mtime: art_mtime.map(t),
            metadata: Metadata::new(),
        }
    }

    fn recorded(path: &str, mtime: i64, format: &str) -> CollectionItem {
        CollectionItem::new(path, t(mtime), format)
    }

    fn single(spec: &CollectionSpec, input: PlanInput) -> Vec<(ActionKind, ItemId, Reason)> {
        plan(spec, input).actions().map(|a| (a.kind, a.item_id, a.reason)).collect()
    }

    #[test]
    fn test_new_item_is_added() {
        let spec = spec(mp3());
        let input = PlanInput { targets: vec![target(&spec.mode, 1, "FLAC", "a.mp3", 10)], ..Default::default() };
        let plan = plan(&spec, input);
        let action = plan.actions().next().unwrap();
        assert_eq!((action.kind, action.reason), (ActionKind::Add, Reason::New));
        assert_eq!(action.target.as_ref().unwrap().representation.format, "mp3");
    }

    #[test]
    fn test_unselected_item_is_removed() {
        let spec = spec(mp3());
        let input = PlanInput {
            manifest: BTreeMap::from([(2, recorded("b.mp3", 10, "mp3"))]),
            presence: HashMap::from([(2, Presence::File)]),
            ..Default::default()
        };
        assert_eq!(single(&spec, input), vec![(ActionKind::Remove, 2, Reason::NotSelected)]);
    }

    #[test]
    fn test_items_outside_scope_and_held_items_stay() {
        let spec = spec(mp3());
        let input = PlanInput {
            manifest: BTreeMap::from([(2, recorded("b.mp3", 10, "mp3")), (3, recorded("c.mp3", 10, "mp3"))]),
            scope: Some(HashSet::from([3])),
            ..Default::default()
        };
        assert_eq!(single(&spec, input), vec![(ActionKind::Remove, 3, Reason::NotSelected)]);

        let input = PlanInput {
            manifest: BTreeMap::from([(3, recorded("c.mp3", 10, "mp3"))]),
            held: HashSet::from([3]),
            ..Default::default()
        };
        assert!(plan(&spec, input).is_empty());
    }

    #[test]
    fn test_up_to_date_item_needs_nothing() {
        let spec = spec(mp3());
        let input = PlanInput {
            targets: vec![target(&spec.mode, 1, "FLAC", "a.mp3", 10)],
            manifest: BTreeMap::from([(1, recorded("a.mp3", 10, "mp3"))]),
            presence: HashMap::from([(1, Presence::File)]),
            ..Default::default()
        };
        assert!(plan(&spec, input).is_empty());
    }

    #[test]
    fn test_missing_file_is_re_added() {
        let spec = spec(mp3());
        let input = PlanInput {
            targets: vec![target(&spec.mode, 1, "FLAC", "a.mp3", 10)],
            manifest: BTreeMap::from([(1, recorded("a.mp3", 10, "mp3"))]),
            ..Default::default()
        };
        let plan = plan(&spec, input);
        let action = plan.actions().next().unwrap();
        assert_eq!((action.kind, action.reason), (ActionKind::Add, Reason::FileMissing));
        assert_eq!(action.old_path, None);
    }

    #[test]
    fn test_format_change_is_a_full_add() {
        let spec = spec(mp3());
        // Stored as FLAC by an earlier configuration that accepted it.
        let input = PlanInput {
            targets: vec![target(&spec.mode, 1, "FLAC", "a.mp3", 10)],
            manifest: BTreeMap::from([(1, recorded("a.flac", 10, "flac"))]),
            presence: HashMap::from([(1, Presence::File)]),
            ..Default::default()
        };
        let plan = plan(&spec, input);
        let action = plan.actions().next().unwrap();
        assert_eq!((action.kind, action.reason), (ActionKind::Add, Reason::Representation));
        assert_eq!(action.old_path.as_deref(), Some(Path::new("a.flac")));
    }

    #[test]
    fn test_path_change_is_a_move_with_refresh() {
        let spec = spec(mp3());
        let mut t1 = target(&spec.mode, 1, "FLAC", "new.mp3", 20);
        t1.album = Some(album(Some(30)));
        let input = PlanInput {
            targets: vec![t1],
            manifest: BTreeMap::from([(1, recorded("old.mp3", 10, "mp3"))]),
            presence: HashMap::from([(1, Presence::File)]),
            ..Default::default()
        };
        let plan = plan(&spec, input);
        let action = plan.actions().next().unwrap();
        assert_eq!((action.kind, action.reason), (ActionKind::Move, Reason::PathChanged));
        assert!(action.refresh_tags);
        assert!(action.refresh_art);
    }

    #[test]
    fn test_newer_source_is_a_write() {
        let spec = spec(mp3());
        let input = PlanInput {
            targets: vec![target(&spec.mode, 1, "FLAC", "a.mp3", 20)],
            manifest: BTreeMap::from([(1, recorded("a.mp3", 10, "mp3"))]),
            presence: HashMap::from([(1, Presence::File)]),
            ..Default::default()
        };
        assert_eq!(single(&spec, input), vec![(ActionKind::Write, 1, Reason::SourceNewer)]);
    }

    #[test]
    fn test_newer_art_is_only_an_art_sync() {
        let spec = spec(mp3());
        let mut t1 = target(&spec.mode, 1, "FLAC", "a.mp3", 10);
        t1.album = Some(album(Some(30)));
        let input = PlanInput {
            targets: vec![t1],
            manifest: BTreeMap::from([(1, recorded("a.mp3", 10, "mp3").with_art_mtime(Some(t(20))))]),
            presence: HashMap::from([(1, Presence::File)]),
            ..Default::default()
        };
        assert_eq!(single(&spec, input), vec![(ActionKind::SyncArt, 1, Reason::ArtNewer)]);
    }

    #[test]
    fn test_art_is_ignored_when_disabled() {
        let mut spec = spec(mp3());
        spec.art.embed = false;
        let mut t1 = target(&spec.mode, 1, "FLAC", "a.mp3", 10);
        t1.album = Some(album(Some(30)));
        let input = PlanInput {
            targets: vec![t1],
            manifest: BTreeMap::from([(1, recorded("a.mp3", 10, "mp3"))]),
            presence: HashMap::from([(1, Presence::File)]),
            ..Default::default()
        };
        assert!(plan(&spec, input).is_empty());
    }

    #[test]
    fn test_links() {
        let spec = spec(Mode::Link(LinkType::Relative));
        let current = target(&spec.mode, 1, "MP3", "a.mp3", 20);
        let expected = current.link_target.clone().unwrap();

        // Newer sources never touch links.
        let input = PlanInput {
            targets: vec![current.clone()],
            manifest: BTreeMap::from([(1, recorded("a.mp3", 10, "mp3"))]),
            presence: HashMap::from([(1, Presence::Link(expected))]),
            ..Default::default()
        };
        assert!(plan(&spec, input).is_empty());

        let input = PlanInput {
            targets: vec![current.clone()],
            manifest: BTreeMap::from([(1, recorded("a.mp3", 10, "mp3"))]),
            presence: HashMap::from([(1, Presence::Link(PathBuf::from("../../music/X/1.mp3")))]),
            ..Default::default()
        };
        assert_eq!(single(&spec, input), vec![(ActionKind::Move, 1, Reason::StaleLink)]);

        // A regular file where a link belongs is replaced.
        let input = PlanInput {
            targets: vec![current],
            manifest: BTreeMap::from([(1, recorded("a.mp3", 10, "mp3"))]),
            presence: HashMap::from([(1, Presence::File)]),
            ..Default::default()
        };
        assert_eq!(single(&spec, input), vec![(ActionKind::Add, 1, Reason::Representation)]);
    }

    #[test]
    fn test_removal_precedes_reuse_of_its_path() {
        let spec = spec(mp3());
        let input = PlanInput {
            targets: vec![target(&spec.mode, 1, "FLAC", "shared.mp3", 10)],
            manifest: BTreeMap::from([(2, recorded("shared.mp3", 10, "mp3"))]),
            presence: HashMap::from([(2, Presence::File)]),
            ..Default::default()
        };
        let plan = plan(&spec, input);
        assert_eq!(plan.stages.len(), 2);
        assert_eq!(plan.stages[0][0].kind, ActionKind::Remove);
        assert_eq!(plan.stages[1][0].kind, ActionKind::Add);
    }
}
