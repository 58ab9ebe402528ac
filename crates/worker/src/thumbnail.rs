//! JPEG thumbnails for still-image artifacts.

/// Thumbnails fit inside a square of this many pixels.
pub const THUMBNAIL_MAX_EDGE: u32 = 256;

/// JPEG quality used for thumbnails.
pub const THUMBNAIL_JPEG_QUALITY: u8 = 80;

/// Content type of encoded thumbnails.
pub const THUMBNAIL_CONTENT_TYPE: &str = "image/jpeg";

/// Failures on the thumbnail path. Logged by the caller, never surfaced.
#[derive(Debug, thiserror::Error)]
pub enum ThumbnailError {
    /// Built without the `thumbnails` feature.
    #[error("thumbnail support not compiled in")]
    Unsupported,

    #[cfg(feature = "thumbnails")]
    #[error("image processing failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("thumbnail task failed: {0}")]
    Task(String),

    #[error("failed to read artifact: {0}")]
    Io(#[from] std::io::Error),

    #[error("thumbnail upload failed: {0}")]
    Upload(String),
}

/// Downscale an encoded image to fit [`THUMBNAIL_MAX_EDGE`] and re-encode
/// it as RGB JPEG.
///
/// Aspect ratio is preserved and images already small enough are not
/// upscaled. Alpha and palette images are flattened to RGB.
#[cfg(feature = "thumbnails")]
pub fn create_thumbnail(encoded: &[u8]) -> Result<Vec<u8>, ThumbnailError> {
    use image::codecs::jpeg::JpegEncoder;
    use image::imageops::FilterType;

    let img = image::load_from_memory(encoded)?;
    let img = if img.width() > THUMBNAIL_MAX_EDGE || img.height() > THUMBNAIL_MAX_EDGE {
        img.resize(THUMBNAIL_MAX_EDGE, THUMBNAIL_MAX_EDGE, FilterType::Lanczos3)
    } else {
        img
    };

    let rgb = img.to_rgb8();
    let mut out = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, THUMBNAIL_JPEG_QUALITY))?;
    Ok(out)
}

#[cfg(not(feature = "thumbnails"))]
pub fn create_thumbnail(_encoded: &[u8]) -> Result<Vec<u8>, ThumbnailError> {
    Err(ThumbnailError::Unsupported)
}
