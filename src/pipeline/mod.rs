//! Pipeline stages for receipt-to-JSON extraction.
//!
//! Each submodule implements exactly one transformation step so each can be
//! tested alone and the two external engines (OCR, LLM) can be swapped for
//! stubs.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ normalize ──▶ ocr ──▶ prompts ──▶ llm ──┬──▶ annotated response
//! (bytes)   (≤2000 px)   (text)   (≤400 ch)  (timed) └──▶ fallback (on failure)
//! ```
//!
//! 1. [`input`]     — the uploaded document and its uniquely named staging file
//! 2. [`normalize`] — decode and downsample; CPU-bound, runs in `spawn_blocking`
//! 3. [`ocr`]       — constrained Tesseract recognition behind [`ocr::TextRecognizer`]
//! 4. [`llm`]       — the single chat call behind [`llm::InferenceBackend`]
//! 5. [`fallback`]  — deterministic record when the model call fails
//! 6. [`postprocess`] — optional best-effort parse of the result into typed data

pub mod fallback;
pub mod input;
pub mod llm;
pub mod normalize;
pub mod ocr;
pub mod postprocess;
