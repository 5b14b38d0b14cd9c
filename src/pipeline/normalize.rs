//! Image normalisation: decode uploaded bytes and cap the pixel dimensions.
//!
//! ## Why cap pixels?
//!
//! Phone cameras produce 4000 × 3000 px receipts. Tesseract's runtime grows
//! with pixel count while its accuracy on receipt-sized text plateaus well
//! below that, so anything over `max_dimension` on either edge is scaled down
//! with Lanczos3, preserving the aspect ratio. Images already inside the
//! bounds are passed through untouched.

use crate::error::ReceiptError;
use image::imageops::FilterType;
use image::DynamicImage;
use tracing::debug;

/// A decoded image whose width and height are both ≤ the configured maximum.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    image: DynamicImage,
    original_width: u32,
    original_height: u32,
}

impl NormalizedImage {
    /// The pixel buffer.
    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Dimensions before downsampling.
    pub fn original_dimensions(&self) -> (u32, u32) {
        (self.original_width, self.original_height)
    }

    /// True when the image had to be scaled down.
    pub fn was_resized(&self) -> bool {
        self.original_dimensions() != (self.width(), self.height())
    }
}

/// Decode `bytes` and downsample so neither edge exceeds `max_dimension`.
///
/// # Errors
/// [`ReceiptError::Decode`] when the bytes are empty or not a supported image.
pub fn normalize_image(bytes: &[u8], max_dimension: u32) -> Result<NormalizedImage, ReceiptError> {
    if bytes.is_empty() {
        return Err(ReceiptError::Decode {
            detail: "no image data (0 bytes)".into(),
        });
    }

    let image = image::load_from_memory(bytes).map_err(|e| ReceiptError::Decode {
        detail: e.to_string(),
    })?;
    Ok(fit_within(image, max_dimension))
}

/// Downsample an already decoded image so neither edge exceeds `max_dimension`.
pub fn fit_within(image: DynamicImage, max_dimension: u32) -> NormalizedImage {
    let (original_width, original_height) = (image.width(), image.height());

    let image = if original_width > max_dimension || original_height > max_dimension {
        let resized = image.resize(max_dimension, max_dimension, FilterType::Lanczos3);
        debug!(
            "Downsampled {}x{} → {}x{} px",
            original_width,
            original_height,
            resized.width(),
            resized.height()
        );
        resized
    } else {
        image
    };

    NormalizedImage {
        image,
        original_width,
        original_height,
    }
}
