//! Applying planned actions.
//!
//! Each action is one small transaction: the filesystem change is completed
//! (and, for new files, renamed into place) before the manifest entry is
//! written, so an interrupted run leaves either the old or the new state on
//! record and the next run repairs whatever is left over.

use crate::art::ArtPipeline;
use crate::encode::Encoder;
use crate::error::{Error, ErrorKind, Result};
use crate::event::{Applied, Failure};
use crate::model::item_view;
use crate::plan::{Action, ActionKind, Target};
use crate::represent::Strategy;
use crate::tags::TagWriter;
use exn::{OptionExt, ResultExt};
use shadow_config::{CollectionSpec, LinkType};
use shadow_manifest::{CollectionItem, Manifest};
use shadow_storage::StorageBackend;
use shadow_storage::error::{ErrorKind as StorageErrorKind, Result as StorageResult};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use time::UtcDateTime;
use tokio::sync::Semaphore;
use tracing::instrument;

/// Applies the actions of one run against one collection.
pub(crate) struct Executor<'a> {
    pub(crate) spec: &'a CollectionSpec,
    pub(crate) backend: &'a dyn StorageBackend,
    pub(crate) manifest: &'a Manifest,
    pub(crate) encoder: &'a dyn Encoder,
    pub(crate) tags: &'a dyn TagWriter,
    pub(crate) art: ArtPipeline,
    /// Bounds concurrent encoder invocations.
    pub(crate) encodes: Semaphore,
    /// Paths whose emptied parents are pruned once the current stage is done.
    vacated: Mutex<Vec<PathBuf>>,
}

/// Treat a missing entry as already deleted.
fn ignore_missing(result: StorageResult<()>) -> StorageResult<()> {
    match result {
        Err(e) if matches!(&*e, StorageErrorKind::NotFound(_)) => Ok(()),
        result => result,
    }
}

impl<'a> Executor<'a> {
    pub(crate) fn new(
        spec: &'a CollectionSpec,
        backend: &'a dyn StorageBackend,
        manifest: &'a Manifest,
        encoder: &'a dyn Encoder,
        tags: &'a dyn TagWriter,
        art: ArtPipeline,
        max_encodes: usize,
    ) -> Self {
        Self {
            spec,
            backend,
            manifest,
            encoder,
            tags,
            art,
            encodes: Semaphore::new(max_encodes.max(1)),
            vacated: Mutex::new(Vec::new()),
        }
    }

    /// Apply one action, returning the event to report for it (`None` for
    /// silent steps).
    ///
    /// Errors with a [failure kind](ErrorKind::failure_kind) concern this
    /// item only; any other error must end the run.
    #[instrument(level = "debug", skip_all, fields(collection = %self.spec.name, item = action.item_id, kind = %action.kind))]
    pub(crate) async fn apply(&self, action: &Action) -> Result<Option<Applied>> {
        match action.kind {
            ActionKind::Add => self.add(action).await?,
            ActionKind::Remove => self.remove(action).await?,
            ActionKind::Move => self.relocate(action).await?,
            ActionKind::Write => self.write(action).await?,
            ActionKind::SyncArt => self.sync_art(action).await?,
        }
        if action.is_silent() {
            return Ok(None);
        }
        tracing::debug!(path = %action.path.display(), reason = %action.reason, "Applied action");
        Ok(Some(Applied {
            collection: self.spec.name.clone(),
            item_id: action.item_id,
            kind: action.kind,
            path: action.path.clone(),
            old_path: match action.kind {
                ActionKind::Move => action.old_path.clone(),
                _ => None,
            },
        }))
    }

    /// The failure record for an item-level error, or `None` for a fatal one.
    pub(crate) fn failure(action: &Action, error: &Error) -> Option<Failure> {
        let kind = error.failure_kind()?;
        Some(Failure { item_id: action.item_id, action: Some(action.kind), kind, reason: (**error).to_string() })
    }

    /// Remove directories emptied by the actions applied so far.
    pub(crate) async fn prune(&self) {
        let vacated = std::mem::take(&mut *self.vacated.lock().unwrap_or_else(|e| e.into_inner()));
        let expendable = self.spec.art.copy.then_some(self.spec.art.name.as_str());
        for path in vacated {
            if let Err(e) = self.backend.prune(&path, expendable).await {
                tracing::warn!(collection = %self.spec.name, path = %path.display(), error = ?e, "Could not prune directories");
            }
        }
    }

    fn vacate(&self, path: &Path) {
        self.vacated.lock().unwrap_or_else(|e| e.into_inner()).push(path.to_path_buf());
    }

    fn target(action: &Action) -> Result<&Target> {
        action.target.as_deref().ok_or_raise(|| ErrorKind::Configuration)
    }

    fn link_type(target: &Target) -> Option<LinkType> {
        match target.representation.strategy {
            Strategy::Link(link_type) => Some(link_type),
            _ => None,
        }
    }

    async fn record(&self, item_id: u64, item: &CollectionItem) -> Result<()> {
        self.manifest.put(&self.spec.name, item_id, item).await.or_raise(|| ErrorKind::Storage)
    }

    /// Bring album art up to date for the file at `file`: embed it (unless
    /// `embed` is off or this is a link) and place the sidecar.
    ///
    /// Returns the art timestamp to record.
    async fn art_for(&self, target: &Target, file: &Path, embed: bool) -> Result<Option<UtcDateTime>> {
        let Some(album) = &target.album else {
            return Ok(None);
        };
        let Some((_, mtime)) = album.art() else {
            return Ok(None);
        };
        if !self.spec.art_enabled() {
            return Ok(None);
        }
        if embed
            && self.art.options().embed
            && !target.representation.is_link()
            && let Some(artwork) = self.art.artwork(album).await?
        {
            self.tags.embed_art(file, &artwork).await?;
        }
        if self.art.options().copy {
            self.art.place_sidecar(self.backend, &target.path, album, Self::link_type(target)).await?;
        }
        Ok(Some(mtime))
    }

    async fn add(&self, action: &Action) -> Result<()> {
        let target = Self::target(action)?;
        let dest = &action.path;
        let art_mtime = match &target.representation.strategy {
            Strategy::Link(_) => {
                let link = target.link_target.as_deref().ok_or_raise(|| ErrorKind::Configuration)?;
                self.backend.symlink(link, dest).await.or_raise(|| ErrorKind::Filesystem)?;
                self.art_for(target, dest, false).await?
            },
            strategy => {
                let staged = match strategy {
                    Strategy::Transcode(profile) => {
                        let staged = self.backend.stage(dest).await.or_raise(|| ErrorKind::Filesystem)?;
                        let _permit = self.encodes.acquire().await.or_raise(|| ErrorKind::Encode)?;
                        tracing::info!(collection = %self.spec.name, item = target.item.id, "Encoding {}", target.item.path.display());
                        self.encoder.encode(&target.item.path, &staged, profile).await.map(|()| staged)
                    },
                    _ => self.backend.stage_copy(&target.item.path, dest).await.or_raise(|| ErrorKind::Filesystem),
                };
                let finished = match staged {
                    Ok(staged) => self.finish(target, &staged).await,
                    Err(e) => Err(e),
                };
                let art_mtime = match finished {
                    Ok(art_mtime) => art_mtime,
                    Err(e) => {
                        if let Err(discard) = self.backend.discard(dest).await {
                            tracing::warn!(path = %dest.display(), error = ?discard, "Could not discard staged file");
                        }
                        return Err(e);
                    },
                };
                self.backend.commit(dest).await.or_raise(|| ErrorKind::Filesystem)?;
                art_mtime
            },
        };
        if let Some(old) = &action.old_path
            && old != dest
        {
            ignore_missing(self.backend.delete(old).await).or_raise(|| ErrorKind::Filesystem)?;
            self.vacate(old);
        }
        let entry = CollectionItem::new(dest.clone(), target.item.mtime, target.representation.format.clone())
            .with_art_mtime(art_mtime);
        self.record(action.item_id, &entry).await
    }

    /// Art and tags for a freshly staged file.
    async fn finish(&self, target: &Target, staged: &Path) -> Result<Option<UtcDateTime>> {
        let art_mtime = self.art_for(target, staged, true).await?;
        let view = item_view(&target.item, target.album.as_ref());
        self.tags.write_tags(staged, &view).await?;
        Ok(art_mtime)
    }

    async fn remove(&self, action: &Action) -> Result<()> {
        ignore_missing(self.backend.delete(&action.path).await).or_raise(|| ErrorKind::Filesystem)?;
        self.vacate(&action.path);
        self.manifest.remove(&self.spec.name, action.item_id).await.or_raise(|| ErrorKind::Storage)?;
        Ok(())
    }

    async fn relocate(&self, action: &Action) -> Result<()> {
        let target = Self::target(action)?;
        let recorded = action.recorded.as_ref().ok_or_raise(|| ErrorKind::Configuration)?;
        let old = action.old_path.as_deref().unwrap_or(&recorded.path);
        let dest = &action.path;
        let mut entry = CollectionItem { path: dest.clone(), ..recorded.clone() };

        match (&target.representation.strategy, action.is_silent()) {
            (Strategy::Link(_), false) => {
                let link = target.link_target.as_deref().ok_or_raise(|| ErrorKind::Configuration)?;
                self.backend.symlink(link, dest).await.or_raise(|| ErrorKind::Filesystem)?;
                if old != dest {
                    ignore_missing(self.backend.delete(old).await).or_raise(|| ErrorKind::Filesystem)?;
                }
                entry.source_mtime = target.item.mtime;
            },
            _ => self.backend.rename(old, dest).await.or_raise(|| ErrorKind::Filesystem)?,
        }
        if old != dest {
            self.vacate(old);
        }
        if action.is_silent() {
            return self.record(action.item_id, &entry).await;
        }

        // The move itself is done; record it before anything else can fail.
        self.record(action.item_id, &entry).await?;
        if old.parent() != dest.parent() {
            self.follow_sidecar(target, dest).await?;
        }
        let file = self.backend.local_path(dest).or_raise(|| ErrorKind::Filesystem)?;
        if action.refresh_tags {
            self.tags.write_tags(&file, &item_view(&target.item, target.album.as_ref())).await?;
            entry.source_mtime = target.item.mtime;
        }
        if action.refresh_art {
            if action.refresh_tags {
                self.record(action.item_id, &entry).await?;
            }
            entry.art_mtime = self.art_for(target, &file, true).await?.or(entry.art_mtime);
        }
        self.record(action.item_id, &entry).await
    }

    /// Place the album's sidecar in the directory an item has moved into.
    /// The old directory's copy goes when that directory is pruned.
    async fn follow_sidecar(&self, target: &Target, dest: &Path) -> Result<()> {
        if !self.spec.art_enabled() || !self.art.options().copy {
            return Ok(());
        }
        let Some(album) = target.album.as_ref().filter(|album| album.art().is_some()) else {
            return Ok(());
        };
        self.art.place_sidecar(self.backend, dest, album, Self::link_type(target)).await
    }

    async fn write(&self, action: &Action) -> Result<()> {
        let target = Self::target(action)?;
        let recorded = action.recorded.as_ref().ok_or_raise(|| ErrorKind::Configuration)?;
        let file = self.backend.local_path(&action.path).or_raise(|| ErrorKind::Filesystem)?;
        self.tags.write_tags(&file, &item_view(&target.item, target.album.as_ref())).await?;
        let mut entry = CollectionItem { source_mtime: target.item.mtime, ..recorded.clone() };
        if action.refresh_art {
            self.record(action.item_id, &entry).await?;
            entry.art_mtime = self.art_for(target, &file, true).await?.or(entry.art_mtime);
        }
        self.record(action.item_id, &entry).await
    }

    async fn sync_art(&self, action: &Action) -> Result<()> {
        let target = Self::target(action)?;
        let recorded = action.recorded.as_ref().ok_or_raise(|| ErrorKind::Configuration)?;
        let file = self.backend.local_path(&action.path).or_raise(|| ErrorKind::Filesystem)?;
        let art_mtime = self.art_for(target, &file, true).await?;
        let entry = CollectionItem { art_mtime: art_mtime.or(recorded.art_mtime), ..recorded.clone() };
        self.record(action.item_id, &entry).await
    }
}
