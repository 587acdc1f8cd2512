use image::{ImageFormat, RgbImage};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

static SEQ_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A captured color image with timestamp metadata.
///
/// Pixels are dense RGB8, origin top-left. A frame is never mutated once
/// published; later frames supersede it.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub captured_at_ms: i64,
    pub seq: u64,
}

impl Frame {
    pub fn new(image: RgbImage, captured_at_ms: i64, seq: u64) -> Self {
        Self {
            image,
            captured_at_ms,
            seq,
        }
    }

    /// Wrap an image stamped with the current time and the next sequence number.
    pub fn now(image: RgbImage) -> Self {
        let seq = SEQ_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self::new(image, chrono::Utc::now().timestamp_millis(), seq)
    }

    /// Decode a JPEG payload (one MJPEG part or V4L2 buffer).
    pub fn decode_jpeg(jpeg_data: &[u8]) -> Result<Self, FrameError> {
        if jpeg_data.is_empty() {
            return Err(FrameError::Empty);
        }
        let img = image::load_from_memory_with_format(jpeg_data, ImageFormat::Jpeg)
            .map_err(FrameError::Decode)?;
        Ok(Self::now(img.to_rgb8()))
    }

    /// Load an image file of any supported format as a frame.
    pub fn load(path: &Path) -> Result<Self, FrameError> {
        let img = image::open(path).map_err(|e| FrameError::Load(path.display().to_string(), e))?;
        Ok(Self::now(img.to_rgb8()))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Age of the frame relative to `now_ms`, clamped at zero.
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        (now_ms - self.captured_at_ms).max(0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("empty image payload")]
    Empty,
    #[error("failed to decode image: {0}")]
    Decode(image::ImageError),
    #[error("failed to load image {0}: {1}")]
    Load(String, image::ImageError),
}
