//! Read-only views of the host library.
//!
//! Library metadata is dynamic: beyond a set of well-known tag fields every
//! item or album may carry arbitrary user fields. [`Metadata`] keeps them as a
//! typed map and defines how absence is treated:
//!
//! * a [known field](KNOWN_FIELDS) that is absent reads as empty, so
//!   `{{ composer }}` renders as `""` for an item without a composer;
//! * an absent flexible field is absent, and a template referencing it fails
//!   for that item rather than silently rendering a hole into its path.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use time::UtcDateTime;

pub use shadow_manifest::ItemId;
pub type AlbumId = u64;

/// Fields every item is expected to have; absent ones read as empty.
pub const KNOWN_FIELDS: &[&str] = &[
    "album",
    "albumartist",
    "artist",
    "bpm",
    "comments",
    "comp",
    "composer",
    "day",
    "disc",
    "disctotal",
    "genre",
    "grouping",
    "label",
    "lyrics",
    "month",
    "title",
    "track",
    "tracktotal",
    "year",
];

/// A single metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Flag(bool),
    Integer(i64),
    Real(f64),
    Text(String),
}
impl Value {
    /// Whether the value counts as unset (empty text, zero, `false`).
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Flag(b) => !b,
            Self::Integer(i) => *i == 0,
            Self::Real(r) => *r == 0.0,
            Self::Text(s) => s.is_empty(),
        }
    }

    pub fn as_bool(&self) -> bool {
        match self {
            Self::Flag(b) => *b,
            Self::Integer(i) => *i != 0,
            Self::Real(r) => *r != 0.0,
            Self::Text(s) => matches!(s.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn to_template(&self) -> upon::Value {
        match self {
            Self::Flag(b) => upon::Value::Bool(*b),
            Self::Integer(i) => upon::Value::Integer(*i),
            Self::Real(r) => upon::Value::Float(*r),
            Self::Text(s) => upon::Value::String(s.clone()),
        }
    }
}
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flag(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Real(r) => write!(f, "{r}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}
impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}
impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}
impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}
impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Flag(b)
    }
}

/// Field name to value mapping for an item or an album.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, Value>);
impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Text rendering of a field; known fields read as `""` when absent.
    pub fn text(&self, key: &str) -> Option<String> {
        match self.0.get(key) {
            Some(v) => Some(v.to_string()),
            None if KNOWN_FIELDS.contains(&key) => Some(String::new()),
            None => None,
        }
    }

    pub fn flag(&self, key: &str) -> bool {
        self.0.get(key).is_some_and(Value::as_bool)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// These fields on top of `base`.
    pub fn overlay(&self, base: &Metadata) -> Metadata {
        let mut merged = base.0.clone();
        merged.extend(self.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        Metadata(merged)
    }

    /// Template context: every known field (empty when absent) plus every
    /// field actually present.
    pub(crate) fn to_template(&self) -> upon::Value {
        let mut map: BTreeMap<String, upon::Value> =
            KNOWN_FIELDS.iter().map(|k| (k.to_string(), upon::Value::String(String::new()))).collect();
        map.extend(self.0.iter().map(|(k, v)| (k.clone(), v.to_template())));
        upon::Value::Map(map)
    }
}
impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// A track in the host library.
#[derive(Debug, Clone, PartialEq)]
pub struct LibraryItem {
    pub id: ItemId,
    /// Absolute path of the canonical file.
    pub path: PathBuf,
    /// Audio format tag as reported by the library (`"FLAC"`, `"MP3"`, ...).
    pub format: String,
    pub mtime: UtcDateTime,
    pub album_id: Option<AlbumId>,
    pub metadata: Metadata,
}
impl LibraryItem {
    /// Items outside any album.
    pub fn is_singleton(&self) -> bool {
        self.album_id.is_none()
    }
}

/// An album in the host library.
#[derive(Debug, Clone, PartialEq)]
pub struct Album {
    pub id: AlbumId,
    /// Absolute path of the cover image, if the album has one.
    pub art_path: Option<PathBuf>,
    pub art_mtime: Option<UtcDateTime>,
    pub metadata: Metadata,
}
impl Album {
    /// Art path and timestamp, when the album has usable art.
    pub fn art(&self) -> Option<(&PathBuf, UtcDateTime)> {
        self.art_path.as_ref().zip(self.art_mtime)
    }
}

/// Everything about an item that a path template or tag writer may read:
/// the item's own fields over its album's fields.
pub fn item_view(item: &LibraryItem, album: Option<&Album>) -> Metadata {
    let mut view = match album {
        Some(album) => item.metadata.overlay(&album.metadata),
        None => item.metadata.clone(),
    };
    if view.get("albumartist").is_none_or(Value::is_empty)
        && let Some(artist) = view.get("artist").cloned()
    {
        view.insert("albumartist", artist);
    }
    view.insert("format", item.format.clone());
    view.insert("id", item.id as i64);
    view
}
