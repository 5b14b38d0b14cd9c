//! Error types for the receipt2json library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ReceiptError`] — **Fatal**: the request cannot produce a result at all
//!   (undecodable image, OCR engine missing, staging I/O failure). Returned as
//!   `Err(ReceiptError)` from [`crate::extract::Extractor`] entry points.
//!
//! * [`InferenceError`] — **Recovered**: the language-model backend failed
//!   (unreachable, unknown model, malformed reply). It never reaches the
//!   caller as an `Err`; the pipeline converts it into a deterministic
//!   fallback record carrying the error text in its `error` field.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the receipt2json library.
///
/// Backend failures use [`InferenceError`] and are folded into the
/// fallback record rather than propagated here.
#[derive(Debug, Error)]
pub enum ReceiptError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Image file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// The bytes could not be decoded as an image.
    #[error("Could not decode image: {detail}")]
    Decode { detail: String },

    // ── OCR errors ────────────────────────────────────────────────────────
    /// The OCR executable could not be started.
    #[error("OCR engine '{program}' is not available: {detail}\nInstall tesseract or pass --tesseract <PATH>.")]
    OcrEngineUnavailable { program: String, detail: String },

    /// The OCR engine ran but reported a failure.
    #[error("Text recognition failed: {detail}")]
    Recognition { detail: String },

    // ── LLM configuration ─────────────────────────────────────────────────
    /// A named provider could not be initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not write, read or remove a staged upload.
    #[error("Failed to stage upload at '{path}': {source}")]
    StagingFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReceiptError {
    /// True for errors caused by the submitted document itself rather than
    /// by the host (missing engine, I/O, config).
    pub fn is_client_error(&self) -> bool {
        matches!(self, ReceiptError::Decode { .. })
    }
}

/// A failure of the language-model backend.
///
/// Always recovered by [`crate::pipeline::fallback::fallback_record`]; the
/// `Display` text becomes the record's `error` field.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum InferenceError {
    /// The backend could not be reached at all.
    #[error("could not connect to {url}: {detail}")]
    Connection { url: String, detail: String },

    /// The call exceeded the configured timeout.
    #[error("inference timed out after {millis}ms")]
    Timeout { millis: u64 },

    /// The backend does not know the requested model.
    #[error("model '{model}' not found: {detail}")]
    ModelNotFound { model: String, detail: String },

    /// The backend answered with a non-success status.
    #[error("backend returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    /// The backend answered 2xx but the body was not understood.
    #[error("malformed backend response: {detail}")]
    MalformedResponse { detail: String },

    /// An `edgequake-llm` provider returned an error.
    #[error("provider '{provider}' failed: {detail}")]
    Provider { provider: String, detail: String },
}
