//! Staging of planned actions by path dependencies.
//!
//! An action that writes a path must wait for whichever other action vacates
//! it. Every item vacates at most one path, so dependencies form chains and,
//! when items swap paths, simple cycles. A cycle is broken by first moving
//! one of its items aside to a temporary path inside the collection root.

use super::{Action, ActionKind, Reason};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const PARK_PREFIX: &str = ".shadow-park-";

/// Group actions into stages; within a stage actions run in `(kind, item)`
/// order.
pub(super) fn stages(mut actions: Vec<Action>) -> Vec<Vec<Action>> {
    let depths = loop {
        let dependencies = dependencies(&actions);
        match depths(&dependencies) {
            Ok(depths) => break depths,
            Err(cycle) => {
                let Some(&parked) = cycle.iter().min_by_key(|&&i| actions[i].item_id) else {
                    break vec![0; actions.len()];
                };
                let step = park(&mut actions[parked]);
                actions.push(step);
            },
        }
    };
    let mut stages: Vec<Vec<Action>> = vec![Vec::new(); depths.iter().max().map_or(0, |d| d + 1)];
    for (action, depth) in actions.into_iter().zip(depths) {
        stages[depth].push(action);
    }
    for stage in &mut stages {
        stage.sort_by_key(|a| (a.kind, a.item_id));
    }
    stages
}

fn dependencies(actions: &[Action]) -> Vec<Option<usize>> {
    let vacated: HashMap<&Path, usize> =
        actions.iter().enumerate().filter_map(|(i, a)| a.vacates().map(|path| (path, i))).collect();
    actions
        .iter()
        .map(|a| a.occupies().and_then(|path| vacated.get(path).copied()).filter(|&j| actions[j].item_id != a.item_id))
        .collect()
}

/// Depth of each action in its dependency chain, or the members of a cycle.
fn depths(dependencies: &[Option<usize>]) -> Result<Vec<usize>, Vec<usize>> {
    let mut depths: Vec<Option<usize>> = vec![None; dependencies.len()];
    for start in 0..dependencies.len() {
        let mut chain = Vec::new();
        let mut current = start;
        let mut next_depth = loop {
            if let Some(depth) = depths[current] {
                break Some(depth);
            }
            if let Some(pos) = chain.iter().position(|&c| c == current) {
                return Err(chain[pos..].to_vec());
            }
            chain.push(current);
            match dependencies[current] {
                Some(next) => current = next,
                None => break None,
            }
        };
        for &node in chain.iter().rev() {
            let depth = next_depth.map_or(0, |d| d + 1);
            depths[node] = Some(depth);
            next_depth = Some(depth);
        }
    }
    Ok(depths.into_iter().map(|d| d.unwrap_or(0)).collect())
}

/// Redirect `action` to start from a temporary path, returning the step that
/// moves the item there.
fn park(action: &mut Action) -> Action {
    let from = action.old_path.clone().unwrap_or_else(|| action.path.clone());
    let to = park_path(action.item_id, &from);
    tracing::debug!(item = action.item_id, from = %from.display(), to = %to.display(), "Breaking path cycle");
    let step = Action {
        kind: ActionKind::Move,
        old_path: Some(from),
        path: to.clone(),
        reason: Reason::Park,
        refresh_tags: false,
        refresh_art: false,
        ..action.clone()
    };
    action.old_path = Some(to.clone());
    if let Some(recorded) = action.recorded.as_mut() {
        recorded.path = to;
    }
    step
}

fn park_path(item_id: u64, from: &Path) -> PathBuf {
    let mut name = format!("{PARK_PREFIX}{item_id}");
    if let Some(ext) = from.extension() {
        name.push('.');
        name.push_str(&ext.to_string_lossy());
    }
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(kind: ActionKind, item_id: u64, old: Option<&str>, path: &str) -> Action {
        Action {
            kind,
            item_id,
            old_path: old.map(PathBuf::from),
            path: PathBuf::from(path),
            reason: Reason::PathChanged,
            refresh_tags: false,
            refresh_art: false,
            target: None,
            recorded: None,
        }
    }

    fn shape(stages: &[Vec<Action>]) -> Vec<Vec<(ActionKind, u64, String)>> {
        stages
            .iter()
            .map(|s| s.iter().map(|a| (a.kind, a.item_id, a.path.display().to_string())).collect())
            .collect()
    }

    #[test]
    fn test_independent_actions_share_a_stage() {
        let stages = stages(vec![
            action(ActionKind::Add, 2, None, "b.mp3"),
            action(ActionKind::Remove, 3, Some("c.mp3"), "c.mp3"),
            action(ActionKind::Move, 1, Some("x.mp3"), "a.mp3"),
        ]);
        assert_eq!(stages.len(), 1);
        let kinds: Vec<_> = stages[0].iter().map(|a| a.kind).collect();
        assert_eq!(kinds, vec![ActionKind::Remove, ActionKind::Add, ActionKind::Move]);
    }

    #[test]
    fn test_chain() {
        // 1 moves into 2's old path, 2 moves into 3's, 3 is removed.
        let stages = stages(vec![
            action(ActionKind::Move, 1, Some("a"), "b"),
            action(ActionKind::Move, 2, Some("b"), "c"),
            action(ActionKind::Remove, 3, Some("c"), "c"),
        ]);
        assert_eq!(
            shape(&stages),
            vec![
                vec![(ActionKind::Remove, 3, "c".to_string())],
                vec![(ActionKind::Move, 2, "c".to_string())],
                vec![(ActionKind::Move, 1, "b".to_string())],
            ]
        );
    }

    #[test]
    fn test_swap_parks_the_lowest_item() {
        let stages = stages(vec![
            action(ActionKind::Move, 2, Some("b.mp3"), "a.mp3"),
            action(ActionKind::Move, 1, Some("a.mp3"), "b.mp3"),
        ]);
        assert_eq!(
            shape(&stages),
            vec![
                vec![(ActionKind::Move, 1, ".shadow-park-1.mp3".to_string())],
                vec![(ActionKind::Move, 2, "a.mp3".to_string())],
                vec![(ActionKind::Move, 1, "b.mp3".to_string())],
            ]
        );
        assert!(stages[0][0].is_silent());
        assert_eq!(stages[2][0].old_path.as_deref(), Some(Path::new(".shadow-park-1.mp3")));
    }

    #[test]
    fn test_in_place_actions_have_no_dependencies() {
        let stages = stages(vec![
            action(ActionKind::Add, 1, Some("a.mp3"), "a.mp3"),
            action(ActionKind::Move, 2, Some("b.mp3"), "b.mp3"),
            action(ActionKind::Write, 3, Some("c.mp3"), "c.mp3"),
        ]);
        assert_eq!(stages.len(), 1);
    }
}
