//! Writing metadata and artwork into stored files.

use crate::art::Artwork;
use crate::error::{ErrorKind, Result};
use crate::model::Metadata;
use async_trait::async_trait;
use exn::{OptionExt, ResultExt};
use lofty::config::WriteOptions;
use lofty::file::TaggedFileExt;
use lofty::picture::{MimeType, Picture, PictureType};
use lofty::tag::{ItemKey, Tag, TagExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Tag-writing primitives. Both calls rewrite the file in place.
#[async_trait]
pub trait TagWriter: Send + Sync {
    async fn write_tags(&self, path: &Path, metadata: &Metadata) -> Result<()>;

    /// Replace the front cover.
    async fn embed_art(&self, path: &Path, artwork: &Artwork) -> Result<()>;
}

pub type TagWriterHandle = Arc<dyn TagWriter>;

/// Library fields and the tag items they are written to.
const FIELDS: &[(&str, ItemKey)] = &[
    ("title", ItemKey::TrackTitle),
    ("artist", ItemKey::TrackArtist),
    ("album", ItemKey::AlbumTitle),
    ("albumartist", ItemKey::AlbumArtist),
    ("genre", ItemKey::Genre),
    ("composer", ItemKey::Composer),
    ("grouping", ItemKey::ContentGroup),
    ("comments", ItemKey::Comment),
    ("lyrics", ItemKey::Lyrics),
    ("label", ItemKey::Label),
    ("bpm", ItemKey::Bpm),
    ("year", ItemKey::Year),
    ("track", ItemKey::TrackNumber),
    ("tracktotal", ItemKey::TrackTotal),
    ("disc", ItemKey::DiscNumber),
    ("disctotal", ItemKey::DiscTotal),
    ("comp", ItemKey::FlagCompilation),
];

/// Tag values to set (`Some`) or clear (`None`) for a metadata view.
fn tag_values(metadata: &Metadata) -> Vec<(ItemKey, Option<String>)> {
    FIELDS
        .iter()
        .map(|(field, key)| {
            let value = match metadata.get(field) {
                None => None,
                Some(v) if v.is_empty() => None,
                Some(v) if *field == "comp" => Some(if v.as_bool() { "1" } else { "0" }.to_string()),
                Some(v) => Some(v.to_string()),
            };
            (key.clone(), value)
        })
        .collect()
}

fn mime_type(extension: &str) -> MimeType {
    match extension {
        "jpg" | "jpeg" => MimeType::Jpeg,
        "png" => MimeType::Png,
        "gif" => MimeType::Gif,
        "bmp" => MimeType::Bmp,
        other => MimeType::Unknown(format!("image/{other}")),
    }
}

/// [`TagWriter`] backed by `lofty`, writing to the file's primary tag.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoftyTagWriter;

impl LoftyTagWriter {
    fn edit(path: &Path, edit: impl FnOnce(&mut Tag)) -> Result<()> {
        let mut file = lofty::read_from_path(path).or_raise(|| ErrorKind::Write)?;
        if file.primary_tag().is_none() {
            let tag_type = file.primary_tag_type();
            file.insert_tag(Tag::new(tag_type));
        }
        let tag = file.primary_tag_mut().ok_or_raise(|| ErrorKind::Write)?;
        edit(tag);
        tag.save_to_path(path, WriteOptions::default()).or_raise(|| ErrorKind::Write)
    }

    async fn blocking(path: &Path, edit: impl FnOnce(&mut Tag) + Send + 'static) -> Result<()> {
        let path = PathBuf::from(path);
        tokio::task::spawn_blocking(move || Self::edit(&path, edit)).await.or_raise(|| ErrorKind::Write)?
    }
}

#[async_trait]
impl TagWriter for LoftyTagWriter {
    async fn write_tags(&self, path: &Path, metadata: &Metadata) -> Result<()> {
        let values = tag_values(metadata);
        Self::blocking(path, move |tag| {
            for (key, value) in values {
                match value {
                    Some(value) => {
                        tag.insert_text(key, value);
                    },
                    None => {
                        tag.remove_key(&key);
                    },
                }
            }
        })
        .await
    }

    async fn embed_art(&self, path: &Path, artwork: &Artwork) -> Result<()> {
        let picture = Picture::new_unchecked(
            PictureType::CoverFront,
            Some(mime_type(&artwork.extension)),
            None,
            artwork.data.to_vec(),
        );
        Self::blocking(path, move |tag| {
            tag.remove_picture_type(PictureType::CoverFront);
            tag.push_picture(picture);
        })
        .await
    }
}
