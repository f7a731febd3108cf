//! Progress and summary lines.

use shadow_engine::{ActionKind, Applied};

pub mod symbols {
    pub const ADD: &str = "+";
    pub const REMOVE: &str = "-";
    pub const MOVE: &str = ">";
    pub const WRITE: &str = "*";
    pub const ART: &str = "~";
    pub const FAILED: &str = "!";
}

/// One line per applied action, e.g. `> old.mp3 -> new.mp3`.
pub fn progress(applied: &Applied) -> String {
    let path = applied.path.display();
    match (applied.kind, &applied.old_path) {
        (ActionKind::Add, _) => format!("{} {path}", symbols::ADD),
        (ActionKind::Remove, _) => format!("{} {path}", symbols::REMOVE),
        (ActionKind::Move, Some(old)) if *old != applied.path => {
            format!("{}{} -> {path}", symbols::MOVE, old.display())
        },
        (ActionKind::Move, _) => format!("{}{path}", symbols::MOVE),
        (ActionKind::Write, _) => format!("{} {path}", symbols::WRITE),
        (ActionKind::SyncArt, _) => format!("{} {path}", symbols::ART),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::path::PathBuf;

    fn applied(kind: ActionKind, old: Option<&str>) -> Applied {
        Applied {
            collection: "player".into(),
            item_id: 7,
            kind,
            path: PathBuf::from("Bach/Aria.mp3"),
            old_path: old.map(PathBuf::from),
        }
    }

    #[rstest]
    #[case(ActionKind::Add, None, "+ Bach/Aria.mp3")]
    #[case(ActionKind::Remove, None, "- Bach/Aria.mp3")]
    #[case(ActionKind::Move, Some("Bach/Air.mp3"), ">Bach/Air.mp3 -> Bach/Aria.mp3")]
    #[case(ActionKind::Move, Some("Bach/Aria.mp3"), ">Bach/Aria.mp3")]
    #[case(ActionKind::Write, None, "* Bach/Aria.mp3")]
    #[case(ActionKind::SyncArt, None, "~ Bach/Aria.mp3")]
    fn test_progress(#[case] kind: ActionKind, #[case] old: Option<&str>, #[case] expected: &str) {
        assert_eq!(progress(&applied(kind, old)), expected);
    }
}
