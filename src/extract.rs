//! Request orchestration: image bytes in, [`ExtractionResult`] out.
//!
//! [`Extractor`] owns the two engine handles for the life of the process and
//! runs the stages in order for every request:
//!
//! ```text
//! normalize → recognize → build_prompt → run_extraction ─┬─ Extracted → timing-annotated text
//!                                                        └─ Failed    → fallback JSON
//! ```
//!
//! Decode and OCR failures are returned as `Err`; a model failure never is.

use crate::config::ExtractionConfig;
use crate::error::ReceiptError;
use crate::output::{ExtractionResult, ExtractionStats, ResultSource};
use crate::pipeline::fallback::fallback_json;
use crate::pipeline::input::{self, UploadedDocument};
use crate::pipeline::llm::{
    annotate_with_timing, run_extraction, ExtractionOutcome, InferenceBackend, OllamaBackend,
    ProviderBackend,
};
use crate::pipeline::normalize::normalize_image;
use crate::pipeline::ocr::{TesseractRecognizer, TextRecognizer};
use crate::progress::Stage;
use crate::prompts::build_prompt;
use edgequake_llm::ProviderFactory;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// The extraction pipeline with its engines.
///
/// Cheap to share: wrap in an `Arc` and call from any number of tasks.
pub struct Extractor {
    config: ExtractionConfig,
    recognizer: Arc<dyn TextRecognizer>,
    backend: Arc<dyn InferenceBackend>,
}

impl Extractor {
    /// Assemble an extractor from explicit engines.
    pub fn new(
        config: ExtractionConfig,
        recognizer: Arc<dyn TextRecognizer>,
        backend: Arc<dyn InferenceBackend>,
    ) -> Self {
        Self {
            config,
            recognizer,
            backend,
        }
    }

    /// Assemble an extractor with the production engines named by `config`:
    /// Tesseract for OCR and the backend chosen by [`resolve_backend`].
    pub fn from_config(config: ExtractionConfig) -> Result<Self, ReceiptError> {
        let recognizer: Arc<dyn TextRecognizer> =
            Arc::new(TesseractRecognizer::new(config.tesseract_program.clone()));
        let backend = resolve_backend(&config)?;
        info!("Using OCR engine '{}' and backend {}", config.tesseract_program, backend.name());
        Ok(Self::new(config, recognizer, backend))
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Label of the active language-model backend.
    pub fn backend_name(&self) -> String {
        self.backend.name()
    }

    /// Stage an uploaded file under a unique name, read it back and extract.
    pub async fn extract_upload(
        &self,
        bytes: &[u8],
        filename: &str,
    ) -> Result<ExtractionResult, ReceiptError> {
        let doc = input::stage_upload(&self.config.upload_dir, bytes, filename).await?;
        self.extract(&doc).await
    }

    /// Extract from a local image file.
    pub async fn extract_file(&self, path: impl AsRef<Path>) -> Result<ExtractionResult, ReceiptError> {
        let doc = UploadedDocument::from_path(path).await?;
        self.extract(&doc).await
    }

    /// Run the full pipeline over `doc`.
    ///
    /// # Errors
    /// Only decode and OCR failures. A failing language model yields
    /// `Ok` with [`ResultSource::Fallback`].
    pub async fn extract(&self, doc: &UploadedDocument) -> Result<ExtractionResult, ReceiptError> {
        let total_start = Instant::now();
        info!("Extracting '{}' ({} bytes)", doc.filename, doc.bytes.len());

        // ── Step 1+2: Normalize and recognize (blocking) ─────────────────────
        let recognized = self.recognize_blocking(doc.bytes.clone()).await?;
        let raw_text = recognized.text;

        // ── Step 3: Build prompt ─────────────────────────────────────────────
        let prompt = build_prompt(&raw_text, self.config.max_prompt_chars);
        debug!("Prompt: {} chars", prompt.chars().count());

        // ── Step 4: Structured extraction ────────────────────────────────────
        let cb = self.config.progress_callback.as_ref();
        if let Some(cb) = cb {
            cb.on_stage_start(Stage::Extract);
        }
        let timeout = self.config.api_timeout_secs.map(Duration::from_secs);
        let outcome = run_extraction(&self.backend, &prompt, &self.config.sampling, timeout).await;
        let elapsed = outcome.elapsed();

        // ── Step 5: Annotate or fall back ────────────────────────────────────
        if let Some(cb) = cb {
            match &outcome {
                ExtractionOutcome::Extracted { elapsed, .. } => {
                    cb.on_stage_complete(Stage::Extract, *elapsed)
                }
                ExtractionOutcome::Failed { reason, .. } => cb.on_fallback(reason),
            }
        }
        let (content, source) = finish_extraction(outcome, &raw_text);

        let stats = ExtractionStats {
            original_width: recognized.original.0,
            original_height: recognized.original.1,
            normalized_width: recognized.normalized.0,
            normalized_height: recognized.normalized.1,
            raw_text_chars: raw_text.chars().count(),
            prompt_chars: prompt.chars().count(),
            normalize_ms: recognized.normalize_ms,
            ocr_ms: recognized.ocr_ms,
            llm_ms: elapsed.as_millis() as u64,
            total_ms: total_start.elapsed().as_millis() as u64,
        };

        info!(
            ocr_ms = stats.ocr_ms,
            llm_ms = stats.llm_ms,
            total_ms = stats.total_ms,
            fallback = source == ResultSource::Fallback,
            "Extraction complete"
        );

        Ok(ExtractionResult {
            content,
            source,
            elapsed,
            raw_text,
            stats,
        })
    }

    /// Decode, downsample and OCR on the blocking pool.
    async fn recognize_blocking(&self, bytes: Vec<u8>) -> Result<Recognized, ReceiptError> {
        let recognizer = Arc::clone(&self.recognizer);
        let max_dimension = self.config.max_image_dimension;
        let cb = self.config.progress_callback.clone();

        tokio::task::spawn_blocking(move || -> Result<Recognized, ReceiptError> {
            if let Some(ref cb) = cb {
                cb.on_stage_start(Stage::Normalize);
            }
            let start = Instant::now();
            let image = normalize_image(&bytes, max_dimension)?;
            let normalize_elapsed = start.elapsed();
            if let Some(ref cb) = cb {
                cb.on_stage_complete(Stage::Normalize, normalize_elapsed);
                cb.on_stage_start(Stage::Recognize);
            }

            let ocr_start = Instant::now();
            let text = recognizer.recognize(&image)?;
            let ocr_elapsed = ocr_start.elapsed();
            if let Some(ref cb) = cb {
                cb.on_stage_complete(Stage::Recognize, ocr_elapsed);
            }
            debug!(
                "OCR: {} chars in {}ms",
                text.chars().count(),
                ocr_elapsed.as_millis()
            );

            Ok(Recognized {
                text,
                original: image.original_dimensions(),
                normalized: (image.width(), image.height()),
                normalize_ms: normalize_elapsed.as_millis() as u64,
                ocr_ms: ocr_elapsed.as_millis() as u64,
            })
        })
        .await
        .map_err(|e| ReceiptError::Internal(format!("OCR task panicked: {}", e)))?
    }
}

/// Output of the blocking normalize + OCR step.
struct Recognized {
    text: String,
    original: (u32, u32),
    normalized: (u32, u32),
    normalize_ms: u64,
    ocr_ms: u64,
}

/// Turn an extraction outcome into the text handed to the caller.
///
/// `Extracted` responses get the timing prefix; `Failed` ones become the
/// fallback record built from `raw_text`.
pub fn finish_extraction(outcome: ExtractionOutcome, raw_text: &str) -> (String, ResultSource) {
    match outcome {
        ExtractionOutcome::Extracted { response, elapsed } => {
            (annotate_with_timing(&response, elapsed), ResultSource::Model)
        }
        ExtractionOutcome::Failed { reason, .. } => {
            warn!("Falling back to OCR-only record: {}", reason);
            (fallback_json(raw_text, &reason), ResultSource::Fallback)
        }
    }
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Resolve the language-model backend, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`) — used as-is.
/// 2. **Named provider** (`config.provider_name`) — created through
///    [`ProviderFactory::create_llm_provider`] with `config.model`; the
///    factory reads the provider's API key from the environment.
/// 3. **Ollama** at `config.ollama_url` (default).
pub fn resolve_backend(config: &ExtractionConfig) -> Result<Arc<dyn InferenceBackend>, ReceiptError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::new(ProviderBackend::new(
            Arc::clone(provider),
            format!("provider:{}", config.model),
        )));
    }

    if let Some(ref name) = config.provider_name {
        if name != "ollama" {
            let provider = ProviderFactory::create_llm_provider(name, &config.model).map_err(|e| {
                ReceiptError::ProviderNotConfigured {
                    provider: name.clone(),
                    hint: format!("{e}"),
                }
            })?;
            return Ok(Arc::new(ProviderBackend::new(
                provider,
                format!("{}:{}", name, config.model),
            )));
        }
    }

    Ok(Arc::new(OllamaBackend::new(&config.ollama_url, &config.model)))
}
