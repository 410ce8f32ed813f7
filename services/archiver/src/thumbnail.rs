use bytes::Bytes;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};
use std::io::Cursor;
use thiserror::Error;
use tracing::debug;

/// Thumbnail failures; neither affects the relocation they follow
#[derive(Error, Debug)]
pub enum ThumbnailError {
    #[error("failed to decode source image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("failed to encode thumbnail: {0}")]
    Encode(#[source] image::ImageError),
}

/// Produces JPEG thumbnails bounded to a fixed long edge
#[derive(Debug, Clone)]
pub struct ThumbnailGenerator {
    long_edge: u32,
}

impl ThumbnailGenerator {
    pub fn new(long_edge: u32) -> Self {
        Self {
            long_edge: long_edge.max(1),
        }
    }

    pub fn long_edge(&self) -> u32 {
        self.long_edge
    }

    /// Decode `image_bytes`, scale it so its longer side is `long_edge`, and
    /// re-encode it as JPEG
    pub fn generate(&self, image_bytes: &[u8]) -> Result<Bytes, ThumbnailError> {
        let source = image::load_from_memory(image_bytes).map_err(ThumbnailError::Decode)?;
        let (width, height) = source.dimensions();
        let (target_width, target_height) = scaled_dimensions(width, height, self.long_edge);

        debug!(width, height, target_width, target_height, "Generating thumbnail");

        let resized = source.resize_exact(target_width, target_height, FilterType::Lanczos3);

        // JPEG has no alpha channel
        let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());
        let mut buf = Cursor::new(Vec::new());
        rgb.write_to(&mut buf, ImageFormat::Jpeg)
            .map_err(ThumbnailError::Encode)?;

        Ok(Bytes::from(buf.into_inner()))
    }
}

/// Scale `width` x `height` so the longer side equals `long_edge`, keeping the
/// aspect ratio. The shorter side never drops below one pixel.
pub fn scaled_dimensions(width: u32, height: u32, long_edge: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (long_edge, long_edge);
    }

    let scale = |short: u32, long: u32| -> u32 {
        let scaled =
            (u64::from(short) * u64::from(long_edge) + u64::from(long) / 2) / u64::from(long);
        scaled.max(1) as u32
    };

    if width >= height {
        (long_edge, scale(height, width))
    } else {
        (scale(width, height), long_edge)
    }
}
