//! # receipt2json
//!
//! Turn a photographed or scanned receipt into a structured expense record
//! using local OCR and a locally hosted language model.
//!
//! ## Why OCR first?
//!
//! Small local models (the default is `llama3.2:1b` on Ollama) cannot read
//! pixels, and sending a 12-megapixel phone photo to a vision model is slow.
//! Instead the image is downsampled, read by Tesseract with a character
//! whitelist tuned for receipts, and only a short text prefix is handed to
//! the model with a fixed JSON skeleton. If the model cannot be reached the
//! caller still gets a deterministic record holding the OCR text.
//!
//! ## Pipeline Overview
//!
//! ```text
//! image bytes
//!  │
//!  ├─ 1. Stage      unique-named upload file, read back once, removed
//!  ├─ 2. Normalize  decode, Lanczos3 downsample to ≤ 2000 px (spawn_blocking)
//!  ├─ 3. Recognize  tesseract --oem 3 --psm 6 with whitelist (spawn_blocking)
//!  ├─ 4. Prompt     first 400 chars embedded in the expense schema
//!  ├─ 5. Extract    one deterministic chat call, timed
//!  └─ 6. Result     "⚡ Processed in T.TTs" + model text, or fallback JSON
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use receipt2json::{ExtractionConfig, Extractor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Ollama at http://localhost:11434, model llama3.2:1b
//!     let extractor = Extractor::from_config(ExtractionConfig::default())?;
//!     let result = extractor.extract_file("receipt.jpg").await?;
//!     println!("{}", result.content);
//!     eprintln!("ocr {}ms, llm {}ms", result.stats.ocr_ms, result.stats.llm_ms);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `receipt2json` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! The HTTP adapter in [`server`] is always available; the binary's `serve`
//! subcommand is a thin wrapper around [`server::run_server`].

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod server;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExtractionConfig, ExtractionConfigBuilder, SamplingOptions, DEFAULT_MODEL, DEFAULT_OLLAMA_URL};
pub use error::{InferenceError, ReceiptError};
pub use extract::{resolve_backend, Extractor};
pub use output::{ExtractionResult, ExtractionStats, ResultSource, StructuredExpense};
pub use pipeline::fallback::{fallback_json, fallback_record};
pub use pipeline::input::UploadedDocument;
pub use pipeline::llm::{ExtractionOutcome, InferenceBackend, OllamaBackend, ProviderBackend};
pub use pipeline::normalize::NormalizedImage;
pub use pipeline::ocr::{TesseractRecognizer, TextRecognizer};
pub use pipeline::postprocess::parse_expense;
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback, Stage};
pub use prompts::build_prompt;
pub use server::{build_router, run_server};
