//! Run events and summaries.

use crate::error::{ErrorKind, FailureKind};
use crate::model::ItemId;
use crate::plan::ActionKind;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Progress events emitted by [`Engine::run`](crate::Engine::run).
///
/// Events follow a strict ordering:
/// 1. [`Started`](Self::Started) exactly once.
/// 2. [`Planned`](Self::Planned) at most once, with the number of actions.
/// 3. [`Applied`](Self::Applied) and [`Failed`](Self::Failed), one per
///    action, in the order actions finish.
/// 4. [`Complete`](Self::Complete) exactly once, carrying the summary.
///
/// A fatal error ends the stream early with an `Err` item instead of
/// [`Complete`](Self::Complete).
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Started { collection: String },
    Planned { collection: String, actions: usize },
    Applied(Applied),
    Failed(Failure),
    Complete(RunSummary),
}

/// A committed action: the file change and its manifest update are done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub collection: String,
    pub item_id: ItemId,
    pub kind: ActionKind,
    /// Resulting path, relative to the collection root; for `REMOVE`, the
    /// path that was deleted.
    pub path: PathBuf,
    /// Previous path of a `MOVE`.
    pub old_path: Option<PathBuf>,
}

/// An action that could not be applied; the rest of the run carried on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub item_id: ItemId,
    /// `None` when no action could even be planned for the item.
    pub action: Option<ActionKind>,
    pub kind: FailureKind,
    pub reason: String,
}
impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.action {
            Some(action) => write!(f, "item {} ({action}, {}): {}", self.item_id, self.kind, self.reason),
            None => write!(f, "item {} ({}): {}", self.item_id, self.kind, self.reason),
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    /// Stopped by the caller; actions already started were finished.
    Cancelled,
    /// The collection root is missing and the caller has to decide whether
    /// to create it. Nothing was touched.
    NeedsConfirmation(PathBuf),
    /// Creation of the missing root was declined. Nothing was touched.
    Declined(PathBuf),
}
impl Outcome {
    /// The error standing for a run that stopped at a missing root.
    pub fn error(&self) -> Option<ErrorKind> {
        match self {
            Self::NeedsConfirmation(dir) | Self::Declined(dir) => Some(ErrorKind::MissingCollectionDirectory(dir.clone())),
            Self::Completed | Self::Cancelled => None,
        }
    }
}

/// What a run did.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub collection: String,
    pub outcome: Outcome,
    pub applied: BTreeMap<ActionKind, usize>,
    pub failures: Vec<Failure>,
}
impl RunSummary {
    pub fn new(collection: impl Into<String>, outcome: Outcome) -> Self {
        Self { collection: collection.into(), outcome, applied: BTreeMap::new(), failures: Vec::new() }
    }

    pub fn count(&self, kind: ActionKind) -> usize {
        self.applied.get(&kind).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.applied.values().sum()
    }

    /// Failures per category. A declined collection root counts as one
    /// [`MissingCollectionDirectory`](FailureKind::MissingCollectionDirectory).
    pub fn failure_counts(&self) -> BTreeMap<FailureKind, usize> {
        let mut counts = BTreeMap::new();
        if let Outcome::Declined(_) = self.outcome {
            counts.insert(FailureKind::MissingCollectionDirectory, 1);
        }
        for failure in &self.failures {
            *counts.entry(failure.kind).or_default() += 1;
        }
        counts
    }

    pub fn failed(&self) -> usize {
        self.failure_counts().values().sum()
    }

    pub(crate) fn record(&mut self, event: &Event) {
        match event {
            Event::Applied(applied) => *self.applied.entry(applied.kind).or_default() += 1,
            Event::Failed(failure) => self.failures.push(failure.clone()),
            _ => {},
        }
    }
}
impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} added, {} removed, {} moved, {} updated, {} art synced, {} failed",
            self.collection,
            self.count(ActionKind::Add),
            self.count(ActionKind::Remove),
            self.count(ActionKind::Move),
            self.count(ActionKind::Write),
            self.count(ActionKind::SyncArt),
            self.failed()
        )
    }
}
