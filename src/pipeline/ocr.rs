//! Text recognition: constrained Tesseract OCR over a normalized image.
//!
//! Receipts are a single block of left-aligned lines, so page segmentation
//! mode 6 ("assume a uniform block of text") beats the automatic layout
//! analysis. The character whitelist drops the stray glyphs Tesseract likes
//! to hallucinate from thermal-paper noise while keeping everything a
//! merchant line, date or total is made of.
//!
//! ## Why shell out?
//!
//! Invoking the `tesseract` executable keeps the build free of
//! leptonica/tesseract link-time dependencies. The image is staged as a
//! lossless PNG in a temp file that is removed when the call returns.

use crate::error::ReceiptError;
use crate::pipeline::normalize::NormalizedImage;
use image::DynamicImage;
use std::borrow::Cow;
use std::io::ErrorKind;
use std::process::Command;
use tracing::debug;

/// Characters the recognizer may emit.
pub const CHAR_WHITELIST: &str =
    "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz$.,:/- ";

/// LSTM + legacy engine selection (`--oem 3`, engine default).
pub const ENGINE_MODE: u8 = 3;

/// Uniform block of text (`--psm 6`).
pub const PAGE_SEGMENTATION_MODE: u8 = 6;

/// Turns a normalized image into raw text.
///
/// Implementations must be shareable across concurrent requests; the
/// pipeline calls `recognize` from the blocking thread pool.
pub trait TextRecognizer: Send + Sync {
    /// Recognize the text in `image`. An image with no text yields `Ok("")`.
    fn recognize(&self, image: &NormalizedImage) -> Result<String, ReceiptError>;
}

/// [`TextRecognizer`] backed by the `tesseract` command-line program.
#[derive(Debug, Clone)]
pub struct TesseractRecognizer {
    program: String,
}

impl TesseractRecognizer {
    /// Use `program` (a name on `PATH` or an absolute path) as the engine.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// The command-line arguments that follow the input path.
    pub fn engine_args() -> Vec<String> {
        vec![
            "stdout".to_string(),
            "--oem".to_string(),
            ENGINE_MODE.to_string(),
            "--psm".to_string(),
            PAGE_SEGMENTATION_MODE.to_string(),
            "-c".to_string(),
            format!("tessedit_char_whitelist={CHAR_WHITELIST}"),
        ]
    }
}

impl Default for TesseractRecognizer {
    fn default() -> Self {
        Self::new("tesseract")
    }
}

impl TextRecognizer for TesseractRecognizer {
    fn recognize(&self, image: &NormalizedImage) -> Result<String, ReceiptError> {
        let tmp = tempfile::Builder::new()
            .prefix("receipt-ocr-")
            .suffix(".png")
            .tempfile()
            .map_err(|e| ReceiptError::Internal(format!("tempfile: {e}")))?;

        png_encodable(image.image())
            .save_with_format(tmp.path(), image::ImageFormat::Png)
            .map_err(|e| ReceiptError::Internal(format!("Failed to stage OCR image: {e}")))?;

        let output = Command::new(&self.program)
            .arg(tmp.path())
            .args(Self::engine_args())
            .output()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound | ErrorKind::PermissionDenied => {
                    ReceiptError::OcrEngineUnavailable {
                        program: self.program.clone(),
                        detail: e.to_string(),
                    }
                }
                _ => ReceiptError::Recognition {
                    detail: format!("failed to run {}: {e}", self.program),
                },
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ReceiptError::Recognition {
                detail: format!("{} exited with {}: {}", self.program, output.status, stderr.trim()),
            });
        }

        let text = String::from_utf8(output.stdout).map_err(|e| ReceiptError::Recognition {
            detail: format!("OCR output is not UTF-8: {e}"),
        })?;

        debug!(
            "OCR produced {} chars from {}x{} px",
            text.chars().count(),
            image.width(),
            image.height()
        );
        Ok(text)
    }
}

/// PNG has no floating-point colour types; HDR/TIFF float images are
/// quantised to 8-bit RGBA first.
fn png_encodable(image: &DynamicImage) -> Cow<'_, DynamicImage> {
    match image {
        DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_) => {
            Cow::Owned(DynamicImage::ImageRgba8(image.to_rgba8()))
        }
        other => Cow::Borrowed(other),
    }
}
