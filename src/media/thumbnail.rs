//! Thumbnails embedded in media messages and profile picture previews.

use std::io::Cursor;
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, Rgb, RgbImage};

use super::MediaType;
use crate::error::Result;

/// Edge length of generated thumbnails in pixels
pub const THUMBNAIL_SIZE: u32 = 96;

/// JPEG quality of generated thumbnails
pub const THUMBNAIL_QUALITY: u8 = 80;

/// Produces JPEG thumbnails for local media files.
///
/// Called from a blocking task; implementations may do file I/O and CPU
/// heavy work directly.
pub trait Thumbnailer: Send + Sync {
    /// Thumbnail of an image file
    fn image_thumbnail(&self, path: &Path) -> Result<Vec<u8>>;

    /// Thumbnail of a video file
    fn video_thumbnail(&self, path: &Path) -> Result<Vec<u8>>;

    /// Thumbnail for any media type; types without a preview get none
    fn thumbnail(&self, path: &Path, kind: MediaType) -> Result<Vec<u8>> {
        match kind {
            MediaType::Image => self.image_thumbnail(path),
            MediaType::Video => self.video_thumbnail(path),
            MediaType::Audio | MediaType::Vcard => Ok(Vec::new()),
        }
    }
}

/// Thumbnailer backed by the `image` crate
#[derive(Debug, Clone, Copy)]
pub struct ImageThumbnailer {
    size: u32,
    quality: u8,
}

impl Default for ImageThumbnailer {
    fn default() -> Self {
        Self {
            size: THUMBNAIL_SIZE,
            quality: THUMBNAIL_QUALITY,
        }
    }
}

impl ImageThumbnailer {
    /// Create with custom edge length and JPEG quality
    pub fn new(size: u32, quality: u8) -> Self {
        Self { size, quality }
    }

    /// Centre-crop to a square, scale to the thumbnail size, encode as JPEG
    pub fn render(&self, img: &DynamicImage) -> Result<Vec<u8>> {
        let (width, height) = img.dimensions();
        let side = width.min(height);
        let square = img.crop_imm((width - side) / 2, (height - side) / 2, side, side);
        let scaled = square.resize_exact(self.size, self.size, FilterType::Lanczos3);

        self.encode(&DynamicImage::ImageRgb8(scaled.to_rgb8()))
    }

    fn encode(&self, img: &DynamicImage) -> Result<Vec<u8>> {
        let mut buf = Cursor::new(Vec::new());
        let encoder = JpegEncoder::new_with_quality(&mut buf, self.quality);
        img.write_with_encoder(encoder)?;
        Ok(buf.into_inner())
    }
}

impl Thumbnailer for ImageThumbnailer {
    fn image_thumbnail(&self, path: &Path) -> Result<Vec<u8>> {
        let img = image::open(path)?;
        self.render(&img)
    }

    fn video_thumbnail(&self, _path: &Path) -> Result<Vec<u8>> {
        // no frame extraction; a neutral dark frame stands in
        let frame = RgbImage::from_pixel(self.size, self.size, Rgb([32, 32, 32]));
        self.encode(&DynamicImage::ImageRgb8(frame))
    }
}
