//! Artwork cache and post-processing


use std::{
    collections::{HashMap, VecDeque},
    io::Cursor,
    sync::Arc,
};

use anyhow::{anyhow, Context as _, Result};
use image::{codecs::jpeg::JpegEncoder, io::Reader as ImageReader, ColorType, ImageFormat};
use serde::{Serialize, Serializer};

use crate::config::{CropWindow, SourcePattern};

/// Bounded key to bytes store with insertion-order eviction.
///
/// A hit does not refresh an entry, and overwriting a key keeps its original position.
/// Owned by the monitor worker, so it carries no locking of its own.
#[derive(Debug)]
pub struct ThumbnailCache {
    capacity: usize,
    entries: HashMap<String, Vec<u8>>,
    order: VecDeque<String>,
}

impl ThumbnailCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity + 1),
            order: VecDeque::with_capacity(capacity + 1),
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    pub fn put(&mut self, key: String, bytes: Vec<u8>) {
        if self.entries.insert(key.clone(), bytes).is_none() {
            self.order.push_back(key);
        }
        while self.entries.len() > self.capacity {
            let Some(oldest) = self.order.pop_front() else { break };
            tracing::debug!(%oldest, "Evicting thumbnail from cache");
            self.entries.remove(&oldest);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Format and dimensions of an encoded image
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ImageInfo {
    #[serde(serialize_with = "serialize_format")]
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub size_bytes: usize,
}

fn serialize_format<S: Serializer>(format: &ImageFormat, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format!("{format:?}").to_uppercase())
}

/// Image decoding and cropping capability used to post-process artwork
pub trait ImageTransform: Send + Sync {
    /// Inspect encoded bytes without decoding pixel data
    fn decode(&self, bytes: &[u8]) -> Result<ImageInfo>;
    /// Crop to `window` and re-encode as `format`. `quality` applies to JPEG only.
    fn crop(&self, bytes: &[u8], window: CropWindow, format: ImageFormat, quality: u8)
        -> Result<Vec<u8>>;
}

/// [`ImageTransform`] backed by the `image` crate
#[derive(Clone, Copy, Debug, Default)]
pub struct ImageCrateTransform;

impl ImageTransform for ImageCrateTransform {
    fn decode(&self, bytes: &[u8]) -> Result<ImageInfo> {
        let reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .context("Failed to read image header")?;
        let format = reader
            .format()
            .ok_or_else(|| anyhow!("Unrecognised image format"))?;
        let (width, height) = reader
            .into_dimensions()
            .context("Failed to read image dimensions")?;
        Ok(ImageInfo {
            format,
            width,
            height,
            size_bytes: bytes.len(),
        })
    }

    fn crop(
        &self,
        bytes: &[u8],
        window: CropWindow,
        format: ImageFormat,
        quality: u8,
    ) -> Result<Vec<u8>> {
        let image = image::load_from_memory_with_format(bytes, format)
            .context("Failed to decode image")?;
        let cropped = image.crop_imm(window.x, window.y, window.width, window.height);

        let mut out = Vec::new();
        if format == ImageFormat::Jpeg {
            let rgb = cropped.to_rgb8();
            JpegEncoder::new_with_quality(&mut out, quality)
                .encode(rgb.as_raw(), rgb.width(), rgb.height(), ColorType::Rgb8)
                .context("Failed to encode cropped JPEG")?;
        } else {
            cropped
                .write_to(&mut Cursor::new(&mut out), format)
                .with_context(|| format!("Failed to encode cropped {format:?}"))?;
        }
        Ok(out)
    }
}

/// Applies the artwork policy before bytes enter the cache.
///
/// Artwork from the fallback source that fully contains the crop window is cropped and
/// re-encoded in its original format. Everything else, and every failure, yields the
/// original bytes.
pub struct ArtworkProcessor {
    source: SourcePattern,
    window: CropWindow,
    jpeg_quality: u8,
    transform: Arc<dyn ImageTransform>,
}

impl std::fmt::Debug for ArtworkProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtworkProcessor")
            .field("source", &self.source)
            .field("window", &self.window)
            .field("jpeg_quality", &self.jpeg_quality)
            .finish_non_exhaustive()
    }
}

impl ArtworkProcessor {
    #[must_use]
    pub fn new(
        source: SourcePattern,
        window: CropWindow,
        jpeg_quality: u8,
        transform: Arc<dyn ImageTransform>,
    ) -> Self {
        Self {
            source,
            window,
            jpeg_quality,
            transform,
        }
    }

    #[must_use]
    pub fn process(&self, app_name: &str, bytes: Vec<u8>) -> Vec<u8> {
        if !self.source.matches(app_name) {
            return bytes;
        }
        match self.try_crop(&bytes) {
            Ok(Some(cropped)) => cropped,
            Ok(None) => bytes,
            Err(e) => {
                tracing::warn!(?e, %app_name, "Failed to crop artwork, keeping original");
                bytes
            }
        }
    }

    fn try_crop(&self, bytes: &[u8]) -> Result<Option<Vec<u8>>> {
        let info = self.transform.decode(bytes)?;
        if !self.window.fits(info.width, info.height) {
            tracing::debug!(
                width = info.width,
                height = info.height,
                "Artwork too small to crop"
            );
            return Ok(None);
        }
        let cropped = self
            .transform
            .crop(bytes, self.window, info.format, self.jpeg_quality)?;
        tracing::debug!(
            from = ?(info.width, info.height),
            to = ?(self.window.width, self.window.height),
            format = ?info.format,
            "Cropped artwork"
        );
        Ok(Some(cropped))
    }
}
