//! Album art pipeline.
//!
//! Source art is loaded once per album and run, optionally resized to a
//! maximum width and re-encoded, then either embedded into items by the
//! [tag writer](crate::TagWriter) or placed next to them as a sidecar file.
//! Link collections link the sidecar to the library's art file instead of
//! copying it.

use crate::error::{ErrorKind, Result};
use crate::model::{Album, AlbumId};
use crate::represent::relative_to;
use exn::ResultExt;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use shadow_config::{ArtFormat, ArtOptions, LinkType};
use shadow_storage::StorageBackend;
use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

/// JPEG quality when the collection leaves it to the backend.
const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Image operations the pipeline needs.
pub trait ArtProcessor: Send + Sync {
    /// Scale an image down to at most `max_width`, keeping its aspect ratio,
    /// and encode it as `format` (the source's own when `None`) at `quality`.
    ///
    /// Returns `None` for images that are already narrow enough.
    fn resize(
        &self,
        data: &[u8],
        max_width: u32,
        format: Option<ArtFormat>,
        quality: Option<u8>,
    ) -> Result<Option<Vec<u8>>>;

    /// Re-encode an image. Output is always baseline (non-progressive), so
    /// `deinterlace` only forces the re-encode itself.
    fn reformat(&self, data: &[u8], format: ArtFormat, quality: Option<u8>, deinterlace: bool) -> Result<Vec<u8>>;
}

pub type ArtProcessorHandle = Arc<dyn ArtProcessor>;

/// [`ArtProcessor`] backed by the `image` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageArtProcessor;

impl ImageArtProcessor {
    fn load(data: &[u8]) -> Result<(DynamicImage, ImageFormat)> {
        let format = image::guess_format(data).or_raise(|| ErrorKind::Write)?;
        let image = image::load_from_memory_with_format(data, format).or_raise(|| ErrorKind::Write)?;
        Ok((image, format))
    }

    fn encode(image: &DynamicImage, format: ImageFormat, quality: Option<u8>) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        match format {
            ImageFormat::Jpeg => {
                let encoder = JpegEncoder::new_with_quality(&mut buffer, quality.unwrap_or(DEFAULT_JPEG_QUALITY));
                // JPEG has no alpha channel.
                DynamicImage::ImageRgb8(image.to_rgb8()).write_with_encoder(encoder).or_raise(|| ErrorKind::Write)?;
            },
            format => image.write_to(&mut Cursor::new(&mut buffer), format).or_raise(|| ErrorKind::Write)?,
        }
        Ok(buffer)
    }
}

fn image_format(format: ArtFormat) -> ImageFormat {
    match format {
        ArtFormat::Jpeg => ImageFormat::Jpeg,
        ArtFormat::Png => ImageFormat::Png,
    }
}

impl ArtProcessor for ImageArtProcessor {
    fn resize(
        &self,
        data: &[u8],
        max_width: u32,
        format: Option<ArtFormat>,
        quality: Option<u8>,
    ) -> Result<Option<Vec<u8>>> {
        let (image, source_format) = Self::load(data)?;
        if image.width() <= max_width {
            return Ok(None);
        }
        let height = (u64::from(image.height()) * u64::from(max_width) / u64::from(image.width())).max(1);
        let height = u32::try_from(height).unwrap_or(u32::MAX);
        let resized = image.resize_exact(max_width, height, FilterType::Lanczos3);
        Self::encode(&resized, format.map_or(source_format, image_format), quality).map(Some)
    }

    fn reformat(&self, data: &[u8], format: ArtFormat, quality: Option<u8>, _deinterlace: bool) -> Result<Vec<u8>> {
        let (image, _) = Self::load(data)?;
        Self::encode(&image, image_format(format), quality)
    }
}

/// Processed album art, ready to embed or write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artwork {
    pub data: Arc<[u8]>,
    /// File extension matching the encoding, without a dot.
    pub extension: String,
}

fn art_format(extension: &str) -> Option<ArtFormat> {
    match extension.to_lowercase().as_str() {
        "jpg" | "jpeg" => Some(ArtFormat::Jpeg),
        "png" => Some(ArtFormat::Png),
        _ => None,
    }
}

fn extension_of(path: &Path) -> String {
    path.extension().map(|e| e.to_string_lossy().to_lowercase()).unwrap_or_default()
}

/// Per-run art state for one collection.
pub(crate) struct ArtPipeline {
    options: ArtOptions,
    processor: ArtProcessorHandle,
    processed: Mutex<HashMap<AlbumId, Arc<OnceCell<Artwork>>>>,
    sidecars: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<bool>>>>,
}

impl ArtPipeline {
    pub(crate) fn new(options: ArtOptions, processor: ArtProcessorHandle) -> Self {
        Self {
            options,
            processor,
            processed: Mutex::new(HashMap::new()),
            sidecars: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn options(&self) -> &ArtOptions {
        &self.options
    }

    /// The album's art after processing, or `None` if it has none.
    ///
    /// Processing runs at most once per album and run.
    pub(crate) async fn artwork(&self, album: &Album) -> Result<Option<Artwork>> {
        let Some(source) = album.art_path.clone() else {
            return Ok(None);
        };
        let cell = {
            let mut processed = self.processed.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(processed.entry(album.id).or_default())
        };
        let artwork = cell
            .get_or_try_init(|| async {
                let data = tokio::fs::read(&source).await.or_raise(|| ErrorKind::Filesystem)?;
                let options = self.options.clone();
                let processor = Arc::clone(&self.processor);
                let extension = extension_of(&source);
                tokio::task::spawn_blocking(move || process(processor.as_ref(), &options, data, extension))
                    .await
                    .or_raise(|| ErrorKind::Write)?
            })
            .await?;
        Ok(Some(artwork.clone()))
    }

    /// Place the album's sidecar next to the item at `item_path`.
    ///
    /// Each sidecar is written at most once per run, however many items of
    /// the album share its directory. With `link` set, the sidecar links to
    /// the library's art file.
    pub(crate) async fn place_sidecar(
        &self,
        backend: &dyn StorageBackend,
        item_path: &Path,
        album: &Album,
        link: Option<LinkType>,
    ) -> Result<()> {
        let Some(source) = &album.art_path else {
            return Ok(());
        };
        let artwork = match link {
            Some(_) => None,
            None => self.artwork(album).await?,
        };
        let extension = artwork.as_ref().map_or_else(|| extension_of(source), |a| a.extension.clone());
        let dir = item_path.parent().unwrap_or(Path::new(""));
        let sidecar = dir.join(format!("{}.{extension}", self.options.name));

        let lock = {
            let mut sidecars = self.sidecars.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(sidecars.entry(sidecar.clone()).or_default())
        };
        let mut placed = lock.lock().await;
        if *placed {
            return Ok(());
        }
        let placing = match (link, artwork) {
            (Some(LinkType::Absolute), _) => backend.symlink(source, &sidecar).await,
            (Some(LinkType::Relative), _) => {
                let link_dir = backend.root().join(dir);
                backend.symlink(&relative_to(source, &link_dir), &sidecar).await
            },
            (None, Some(artwork)) => backend.write(&sidecar, &artwork.data).await,
            (None, None) => return Ok(()),
        };
        placing.or_raise(|| ErrorKind::Filesystem)?;
        tracing::debug!(collection = backend.name(), path = %sidecar.display(), "Placed album art");
        *placed = true;
        Ok(())
    }
}

fn process(processor: &dyn ArtProcessor, options: &ArtOptions, data: Vec<u8>, extension: String) -> Result<Artwork> {
    let reencode = options.deinterlace || options.quality.is_some();
    let format = options.format.or_else(|| reencode.then(|| art_format(&extension)).flatten());
    // Resizing encodes once, straight into the target format.
    let resized = match options.max_width {
        Some(max_width) => processor.resize(&data, max_width, format, options.quality)?,
        None => None,
    };
    let data = match (resized, format) {
        (Some(resized), _) => resized,
        (None, Some(format)) => processor.reformat(&data, format, options.quality, options.deinterlace)?,
        (None, None) => data,
    };
    let extension = format.map_or(extension, |format| format.extension().to_string());
    Ok(Artwork { data: data.into(), extension })
}
