//! The host library, as seen by the engine.
//!
//! The engine only reads from the library: it selects items with an
//! expression, looks up their albums and, for listings, fetches single items.
//! [`SnapshotLibrary`] serves a JSON export of a library, which is what the
//! command line uses.

use crate::error::{ErrorKind, Result};
use crate::model::{Album, AlbumId, ItemId, LibraryItem, Metadata, Value, item_view};
use crate::query::Query;
use async_trait::async_trait;
use exn::ResultExt;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::{OffsetDateTime, UtcDateTime};
use tracing::instrument;

/// Query interface of the host library.
#[async_trait]
pub trait Library: Send + Sync {
    /// Items matching `expression`, directly or through their album, ordered
    /// by identity.
    async fn select(&self, expression: &str) -> Result<Vec<LibraryItem>>;

    /// The album an item belongs to, if any.
    async fn get_album(&self, item: &LibraryItem) -> Result<Option<Album>>;

    async fn get_item(&self, id: ItemId) -> Result<Option<LibraryItem>>;

    /// Whether an already selected item satisfies `expression`.
    ///
    /// Path templates use this to pick a template per item without another
    /// round trip to the library.
    fn matches(&self, expression: &str, item: &LibraryItem, album: Option<&Album>) -> Result<bool> {
        let query = Query::parse(expression)?;
        Ok(query.matches(&item_view(item, album)) || album.is_some_and(|a| query.matches(&a.metadata)))
    }
}

pub type LibraryHandle = Arc<dyn Library>;

/// An in-memory library, usually loaded from a JSON export.
///
/// ```json
/// {
///   "items": [
///     {"id": 1, "path": "/music/a.flac", "format": "FLAC", "mtime": 1700000000.5,
///      "album_id": 3, "title": "Aria", "artist": "Bach", "onplayer": true}
///   ],
///   "albums": [
///     {"id": 3, "artpath": "/music/cover.jpg", "album": "Goldberg Variations"}
///   ]
/// }
/// ```
///
/// Every key besides the structural ones becomes a metadata field. Missing
/// modification times are read from the filesystem at load time.
#[derive(Debug, Clone, Default)]
pub struct SnapshotLibrary {
    items: BTreeMap<ItemId, LibraryItem>,
    albums: HashMap<AlbumId, Album>,
}

#[derive(Deserialize)]
struct Export {
    #[serde(default)]
    items: Vec<ItemRecord>,
    #[serde(default)]
    albums: Vec<AlbumRecord>,
}

#[derive(Deserialize)]
struct ItemRecord {
    id: ItemId,
    path: PathBuf,
    #[serde(default)]
    format: String,
    mtime: Option<f64>,
    album_id: Option<AlbumId>,
    #[serde(flatten)]
    fields: BTreeMap<String, serde_json::Value>,
}

#[derive(Deserialize)]
struct AlbumRecord {
    id: AlbumId,
    #[serde(alias = "art_path")]
    artpath: Option<PathBuf>,
    art_mtime: Option<f64>,
    #[serde(flatten)]
    fields: BTreeMap<String, serde_json::Value>,
}

fn metadata(fields: BTreeMap<String, serde_json::Value>) -> Metadata {
    fields
        .into_iter()
        .filter_map(|(key, value)| {
            let value = match value {
                serde_json::Value::Bool(b) => Value::Flag(b),
                serde_json::Value::Number(n) => match n.as_i64() {
                    Some(i) => Value::Integer(i),
                    None => Value::Real(n.as_f64()?),
                },
                serde_json::Value::String(s) => Value::Text(s),
                _ => return None,
            };
            Some((key, value))
        })
        .collect()
}

fn timestamp(seconds: f64) -> Option<UtcDateTime> {
    UtcDateTime::from_unix_timestamp_nanos((seconds * 1e9) as i128).ok()
}

async fn file_mtime(path: &Path) -> Option<UtcDateTime> {
    let modified = tokio::fs::metadata(path).await.ok()?.modified().ok()?;
    Some(OffsetDateTime::from(modified).to_utc())
}

impl SnapshotLibrary {
    pub fn new(items: impl IntoIterator<Item = LibraryItem>, albums: impl IntoIterator<Item = Album>) -> Self {
        Self {
            items: items.into_iter().map(|i| (i.id, i)).collect(),
            albums: albums.into_iter().map(|a| (a.id, a)).collect(),
        }
    }

    /// Load a JSON library export.
    #[instrument(level = "debug")]
    pub async fn load(path: &Path) -> Result<Self> {
        let data = tokio::fs::read(path).await.or_raise(|| ErrorKind::Library)?;
        let export: Export = serde_json::from_slice(&data).or_raise(|| ErrorKind::Library)?;
        let mut items = Vec::with_capacity(export.items.len());
        for record in export.items {
            let mtime = match record.mtime.and_then(timestamp) {
                Some(t) => t,
                None => file_mtime(&record.path).await.unwrap_or_else(|| {
                    tracing::warn!(item = record.id, path = %record.path.display(), "Library item has no readable modification time");
                    UtcDateTime::UNIX_EPOCH
                }),
            };
            items.push(LibraryItem {
                id: record.id,
                path: record.path,
                format: record.format,
                mtime,
                album_id: record.album_id,
                metadata: metadata(record.fields),
            });
        }
        let mut albums = Vec::with_capacity(export.albums.len());
        for record in export.albums {
            let art_mtime = match (&record.artpath, record.art_mtime.and_then(timestamp)) {
                (_, Some(t)) => Some(t),
                (Some(path), None) => file_mtime(path).await,
                (None, None) => None,
            };
            albums.push(Album {
                id: record.id,
                art_path: record.artpath,
                art_mtime,
                metadata: metadata(record.fields),
            });
        }
        tracing::debug!(items = items.len(), albums = albums.len(), "Loaded library export");
        Ok(Self::new(items, albums))
    }

    fn album_of(&self, item: &LibraryItem) -> Option<&Album> {
        item.album_id.and_then(|id| self.albums.get(&id))
    }
}

#[async_trait]
impl Library for SnapshotLibrary {
    async fn select(&self, expression: &str) -> Result<Vec<LibraryItem>> {
        let query = Query::parse(expression)?;
        if query.is_empty() {
            return Ok(self.items.values().cloned().collect());
        }
        Ok(self
            .items
            .values()
            .filter(|item| {
                let album = self.album_of(item);
                query.matches(&item_view(item, album)) || album.is_some_and(|a| query.matches(&a.metadata))
            })
            .cloned()
            .collect())
    }

    async fn get_album(&self, item: &LibraryItem) -> Result<Option<Album>> {
        Ok(self.album_of(item).cloned())
    }

    async fn get_item(&self, id: ItemId) -> Result<Option<LibraryItem>> {
        Ok(self.items.get(&id).cloned())
    }
}
