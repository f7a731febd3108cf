//! Reconciliation runs.
//!
//! A run is split in two phases. Preparation reads the library, the manifest
//! and the collection root and produces a [`Plan`]; nothing is modified
//! except, when allowed, creating a missing collection root. Execution then
//! applies the plan stage by stage, reporting progress as [`Event`]s.

use crate::art::{ArtPipeline, ArtProcessorHandle, ImageArtProcessor};
use crate::encode::{CommandEncoder, EncoderHandle};
use crate::error::{ErrorKind, FailureKind, Result};
use crate::event::{Event, Failure, Outcome, RunSummary};
use crate::execute::Executor;
use crate::library::LibraryHandle;
use crate::model::{Album, AlbumId, ItemId, LibraryItem, Metadata, item_view};
use crate::plan::{Plan, PlanInput, Presence, Target, plan};
use crate::represent::Representation;
use crate::resolve::PathResolver;
use crate::tags::{LoftyTagWriter, TagWriterHandle};
use crate::MAX_PROCESS_CONCURRENCY;
use async_stream::stream;
use exn::{OptionExt, ResultExt};
use futures::stream::FuturesUnordered;
use futures::{Stream, StreamExt};
use shadow_config::CollectionSpec;
use shadow_manifest::{CollectionItem, Manifest};
use shadow_storage::error::ErrorKind as StorageErrorKind;
use shadow_storage::{LocalBackend, StorageBackend};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// The outside world the engine works with.
#[derive(Clone)]
pub struct Collaborators {
    pub library: LibraryHandle,
    pub encoder: EncoderHandle,
    pub tags: TagWriterHandle,
    pub art: ArtProcessorHandle,
}
impl Collaborators {
    /// Encode through shell commands, tag with lofty and process art with
    /// the image crate.
    pub fn new(library: LibraryHandle) -> Self {
        Self {
            library,
            encoder: Arc::new(CommandEncoder),
            tags: Arc::new(LoftyTagWriter),
            art: Arc::new(ImageArtProcessor),
        }
    }

    pub fn with_encoder(mut self, encoder: EncoderHandle) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn with_tags(mut self, tags: TagWriterHandle) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_art(mut self, art: ArtProcessorHandle) -> Self {
        self.art = art;
        self
    }
}

/// What to do when a removable collection's root is missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CreateDirectory {
    Yes,
    No,
    /// Stop with [`Outcome::NeedsConfirmation`] and let the caller decide.
    #[default]
    Ask,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    pub create: CreateDirectory,
    /// Narrow the run to items matching this expression. Manifest entries
    /// outside it are neither updated nor removed.
    pub query: Option<String>,
    /// Checked before each action starts; actions in flight still finish.
    pub cancel: CancellationToken,
}
impl UpdateOptions {
    pub fn with_create(mut self, create: CreateDirectory) -> Self {
        self.create = create;
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }
}

/// A stored item, as listed by [`Engine::list_tracks`].
#[derive(Debug, Clone)]
pub struct Track {
    pub item: LibraryItem,
    pub album: Option<Album>,
    /// Absolute path inside the collection.
    pub path: PathBuf,
}
impl Track {
    /// The item's metadata, with its collection path under `path`.
    pub fn view(&self) -> Metadata {
        item_view(&self.item, self.album.as_ref()).with("path", self.path.display().to_string())
    }
}

enum Preparation<'a> {
    Ready(Prepared<'a>),
    Halted(Outcome),
}

struct Prepared<'a> {
    spec: &'a CollectionSpec,
    backend: LocalBackend,
    plan: Plan,
    /// Items no action could be planned for.
    failures: Vec<Failure>,
}

/// Keeps collections in sync with a library.
pub struct Engine {
    collections: BTreeMap<String, CollectionSpec>,
    manifest: Manifest,
    collaborators: Collaborators,
    max_workers: usize,
}

impl Engine {
    /// `max_workers` bounds concurrent encoder invocations.
    pub fn new(
        specs: impl IntoIterator<Item = CollectionSpec>,
        manifest: Manifest,
        collaborators: Collaborators,
        max_workers: usize,
    ) -> Self {
        Self {
            collections: specs.into_iter().map(|spec| (spec.name.clone(), spec)).collect(),
            manifest,
            collaborators,
            max_workers: max_workers.max(1),
        }
    }

    /// Configured collection names, in order.
    pub fn collections(&self) -> impl Iterator<Item = &str> {
        self.collections.keys().map(String::as_str)
    }

    pub fn collection(&self, name: &str) -> Result<&CollectionSpec> {
        self.collections.get(name).ok_or_raise(|| ErrorKind::UnknownCollection(name.to_string()))
    }

    /// Streams [`Event`]s while reconciling one collection.
    ///
    /// Item-level failures are reported as [`Event::Failed`] and the run
    /// carries on. Any other error is yielded as the last item of the stream.
    pub fn run<'a>(&'a self, name: &'a str, options: &'a UpdateOptions) -> impl Stream<Item = Result<Event>> + 'a {
        // `rustfmt` does not format macros that use braces. Wrap in parentheses!
        stream!({
            yield Ok(Event::Started { collection: name.to_string() });

            let Prepared { spec, backend, plan, failures } = match self.prepare(name, options).await {
                Ok(Preparation::Ready(prepared)) => prepared,
                Ok(Preparation::Halted(outcome)) => {
                    yield Ok(Event::Complete(RunSummary::new(name, outcome)));
                    return;
                },
                Err(e) => {
                    yield Err(e);
                    return;
                },
            };
            yield Ok(Event::Planned { collection: name.to_string(), actions: plan.len() });

            let mut summary = RunSummary::new(name, Outcome::Completed);
            for failure in failures {
                let event = Event::Failed(failure);
                summary.record(&event);
                yield Ok(event);
            }

            let executor = Executor::new(
                spec,
                &backend,
                &self.manifest,
                self.collaborators.encoder.as_ref(),
                self.collaborators.tags.as_ref(),
                ArtPipeline::new(spec.art.clone(), self.collaborators.art.clone()),
                self.max_workers,
            );
            let executor = &executor;
            // Paths still held by items whose actions failed.
            let mut blocked: HashSet<PathBuf> = HashSet::new();

            for stage in &plan.stages {
                let mut pending = stage.iter();
                let mut processing = FuturesUnordered::new();
                loop {
                    while processing.len() < MAX_PROCESS_CONCURRENCY {
                        let Some(action) = pending.next() else {
                            break;
                        };
                        if options.cancel.is_cancelled() {
                            summary.outcome = Outcome::Cancelled;
                            break;
                        }
                        if let Some(path) = action.occupies()
                            && blocked.contains(path)
                        {
                            if let Some(vacated) = action.vacates() {
                                blocked.insert(vacated.to_path_buf());
                            }
                            let event = Event::Failed(Failure {
                                item_id: action.item_id,
                                action: Some(action.kind),
                                kind: FailureKind::Filesystem,
                                reason: format!("{} is still occupied", path.display()),
                            });
                            summary.record(&event);
                            yield Ok(event);
                            continue;
                        }
                        processing.push(async move { (action, executor.apply(action).await) });
                    }
                    let Some((action, result)) = processing.next().await else {
                        break;
                    };
                    match result {
                        Ok(Some(applied)) => {
                            let event = Event::Applied(applied);
                            summary.record(&event);
                            yield Ok(event);
                        },
                        Ok(None) => {},
                        Err(e) => match Executor::failure(action, &e) {
                            Some(failure) => {
                                tracing::warn!(collection = name, item = action.item_id, action = %action.kind, error = ?e, "Action failed");
                                if let Some(vacated) = action.vacates() {
                                    blocked.insert(vacated.to_path_buf());
                                }
                                let event = Event::Failed(failure);
                                summary.record(&event);
                                yield Ok(event);
                            },
                            None => {
                                executor.prune().await;
                                yield Err(e);
                                return;
                            },
                        },
                    }
                }
                executor.prune().await;
                if summary.outcome == Outcome::Cancelled {
                    tracing::info!(collection = name, "Run cancelled");
                    break;
                }
            }

            yield Ok(Event::Complete(summary));
        })
    }

    /// Reconcile one collection and return its summary.
    pub async fn update(&self, name: &str, options: &UpdateOptions) -> Result<RunSummary> {
        let events = self.run(name, options);
        futures::pin_mut!(events);
        while let Some(event) = events.next().await {
            if let Event::Complete(summary) = event? {
                tracing::info!("{summary}");
                return Ok(summary);
            }
        }
        // The stream always ends with either a summary or an error.
        exn::bail!(ErrorKind::Configuration)
    }

    /// Reconcile every collection in name order. Stops after a cancelled run.
    pub async fn update_all(&self, options: &UpdateOptions) -> Result<BTreeMap<String, RunSummary>> {
        let mut summaries = BTreeMap::new();
        for name in self.collections.keys() {
            let summary = self.update(name, options).await?;
            let cancelled = summary.outcome == Outcome::Cancelled;
            summaries.insert(name.clone(), summary);
            if cancelled {
                break;
            }
        }
        Ok(summaries)
    }

    /// Items currently stored in a collection, ordered by identity.
    ///
    /// Manifest entries whose item has left the library are skipped.
    #[instrument(level = "debug", skip(self))]
    pub async fn list_tracks(&self, name: &str) -> Result<Vec<Track>> {
        let spec = self.collection(name)?;
        let library = self.collaborators.library.as_ref();
        let entries = self.manifest.all(name).await.or_raise(|| ErrorKind::Storage)?;
        let mut tracks = Vec::with_capacity(entries.len());
        for (id, entry) in entries {
            let Some(item) = library.get_item(id).await? else {
                tracing::debug!(collection = name, item = id, "Stored item is no longer in the library");
                continue;
            };
            let album = library.get_album(&item).await?;
            tracks.push(Track { item, album, path: spec.directory.join(&entry.path) });
        }
        Ok(tracks)
    }

    #[instrument(level = "debug", skip(self, options))]
    async fn prepare(&self, name: &str, options: &UpdateOptions) -> Result<Preparation<'_>> {
        let spec = self.collection(name)?;
        let backend = LocalBackend::new(&spec.name, &spec.directory).or_raise(|| ErrorKind::Configuration)?;
        if !backend.root_exists().await.or_raise(|| ErrorKind::Filesystem)? {
            let root = spec.directory.clone();
            if spec.removable {
                match options.create {
                    CreateDirectory::Yes => {},
                    CreateDirectory::No => return Ok(Preparation::Halted(Outcome::Declined(root))),
                    CreateDirectory::Ask => return Ok(Preparation::Halted(Outcome::NeedsConfirmation(root))),
                }
            }
            tracing::info!(collection = name, path = %root.display(), "Creating collection directory");
            backend.create_root().await.or_raise(|| ErrorKind::Filesystem)?;
        }

        let library = self.collaborators.library.as_ref();
        let mut selected = library.select(&spec.query).await?;
        let scope = match options.query.as_deref() {
            Some(query) => {
                let ids: HashSet<ItemId> = library.select(query).await?.into_iter().map(|item| item.id).collect();
                selected.retain(|item| ids.contains(&item.id));
                Some(ids)
            },
            None => None,
        };
        let manifest: BTreeMap<ItemId, CollectionItem> =
            self.manifest.all(name).await.or_raise(|| ErrorKind::Storage)?.into_iter().collect();
        tracing::debug!(collection = name, selected = selected.len(), stored = manifest.len(), "Preparing run");

        let mut resolver = PathResolver::new(&spec.paths)?;
        let mut albums: HashMap<AlbumId, Option<Album>> = HashMap::new();
        let mut failures = Vec::new();
        let mut held = HashSet::new();
        let mut rendered = Vec::with_capacity(selected.len());
        for item in selected {
            let album = match item.album_id {
                Some(id) => match albums.get(&id) {
                    Some(album) => album.clone(),
                    None => {
                        let album = library.get_album(&item).await?;
                        albums.insert(id, album.clone());
                        album
                    },
                },
                None => None,
            };
            let representation = Representation::for_item(&spec.mode, &item);
            match resolver.render(library, &item, album.as_ref(), &representation.extension) {
                Ok(path) => rendered.push((item, album, representation, path)),
                Err(e) => {
                    let Some(kind) = e.failure_kind() else {
                        return Err(e);
                    };
                    tracing::warn!(collection = name, item = item.id, error = ?e, "Could not render path");
                    failures.push(Failure { item_id: item.id, action: None, kind, reason: (*e).to_string() });
                    held.insert(item.id);
                },
            }
        }

        // Entries this run leaves alone keep their paths.
        let selected_ids: HashSet<ItemId> = rendered.iter().map(|(item, ..)| item.id).collect();
        for (id, entry) in &manifest {
            let in_scope = scope.as_ref().is_none_or(|ids| ids.contains(id));
            if held.contains(id) || (!in_scope && !selected_ids.contains(id)) {
                resolver.reserve(*id, entry.path.clone());
            }
        }
        // Items already at their rendered path keep it; the rest take the
        // first free variant, by identity.
        let settled: Vec<bool> = rendered
            .iter()
            .map(|(item, _, _, path)| {
                manifest.get(&item.id).is_some_and(|entry| entry.path == *path) && resolver.claim(item.id, path)
            })
            .collect();
        for ((item, _, _, path), settled) in rendered.iter_mut().zip(settled) {
            if !settled {
                *path = resolver.resolve(item.id, std::mem::take(path));
            }
        }

        let mut presence = HashMap::new();
        let mut targets = Vec::with_capacity(rendered.len());
        for (item, album, representation, path) in rendered {
            if let Some(entry) = manifest.get(&item.id) {
                match Self::presence(&backend, &entry.path).await {
                    Ok(found) => {
                        presence.insert(item.id, found);
                    },
                    Err(e) => {
                        tracing::warn!(collection = name, item = item.id, error = ?e, "Could not inspect stored file");
                        failures.push(Failure {
                            item_id: item.id,
                            action: None,
                            kind: FailureKind::Filesystem,
                            reason: (*e).to_string(),
                        });
                        held.insert(item.id);
                        continue;
                    },
                }
            }
            let link_target = representation.link_target(&item.path, backend.root(), &path);
            targets.push(Target { item, album, path, representation, link_target });
        }

        let plan = plan(spec, PlanInput { targets, manifest, presence, scope, held });
        tracing::debug!(collection = name, actions = plan.len(), stages = plan.stages.len(), "Planned run");
        Ok(Preparation::Ready(Prepared { spec, backend, plan, failures }))
    }

    /// What is stored at `path` right now.
    async fn presence(backend: &LocalBackend, path: &Path) -> Result<Presence> {
        match backend.stat(path).await {
            Ok(info) if info.is_symlink() => {
                Ok(Presence::Link(backend.read_link(path).await.or_raise(|| ErrorKind::Filesystem)?))
            },
            Ok(_) => Ok(Presence::File),
            Err(e) if matches!(&*e, StorageErrorKind::NotFound(_)) => Ok(Presence::Missing),
            Err(e) => Err(e).or_raise(|| ErrorKind::Filesystem),
        }
    }
}
