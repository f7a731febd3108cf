use crate::ItemId;
use crate::error::{Error, ErrorKind};
use exn::{OptionExt, ResultExt};
use std::path::PathBuf;
use time::UtcDateTime;

/// State of one library item inside one collection.
///
/// Callers only ever hold snapshots; the [`Manifest`](crate::Manifest) owns
/// the authoritative copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionItem {
    /// Path relative to the collection root.
    pub path: PathBuf,
    /// Source modification time at the last sync.
    pub source_mtime: UtcDateTime,
    /// Album art modification time at the last art sync, if art was synced.
    pub art_mtime: Option<UtcDateTime>,
    /// Format tag of the stored file (for links, the source's format).
    pub format: String,
}
impl CollectionItem {
    pub fn new(path: impl Into<PathBuf>, source_mtime: UtcDateTime, format: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            source_mtime,
            art_mtime: None,
            format: format.into(),
        }
    }

    pub fn with_art_mtime(mut self, art_mtime: Option<UtcDateTime>) -> Self {
        self.art_mtime = art_mtime;
        self
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct ItemRow {
    pub(crate) item_id: i64,
    pub(crate) path: String,
    pub(crate) source_mtime: i64,
    pub(crate) art_mtime: Option<i64>,
    pub(crate) format: String,
}
impl ItemRow {
    pub(crate) fn from_model(item_id: ItemId, item: &CollectionItem) -> Result<Self, Error> {
        Ok(Self {
            item_id: i64::try_from(item_id).or_raise(|| ErrorKind::InvalidData("item id"))?,
            path: item.path.to_str().ok_or_raise(|| ErrorKind::InvalidData("path"))?.to_string(),
            source_mtime: to_nanos(item.source_mtime)?,
            art_mtime: item.art_mtime.map(to_nanos).transpose()?,
            format: item.format.clone(),
        })
    }
}
impl TryFrom<ItemRow> for (ItemId, CollectionItem) {
    type Error = Error;
    fn try_from(row: ItemRow) -> Result<Self, Self::Error> {
        let item_id = ItemId::try_from(row.item_id).or_raise(|| ErrorKind::InvalidData("item id"))?;
        let item = CollectionItem {
            path: PathBuf::from(row.path),
            source_mtime: from_nanos(row.source_mtime)?,
            art_mtime: row.art_mtime.map(from_nanos).transpose()?,
            format: row.format,
        };
        Ok((item_id, item))
    }
}

// Nanosecond precision so a file touched twice within one second is still
// seen as newer.
fn to_nanos(timestamp: UtcDateTime) -> Result<i64, Error> {
    i64::try_from(timestamp.unix_timestamp_nanos()).or_raise(|| ErrorKind::InvalidData("timestamp"))
}

fn from_nanos(nanos: i64) -> Result<UtcDateTime, Error> {
    UtcDateTime::from_unix_timestamp_nanos(i128::from(nanos)).or_raise(|| ErrorKind::InvalidData("timestamp"))
}
