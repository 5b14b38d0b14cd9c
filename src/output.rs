//! Output types returned by the extraction pipeline.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The target expense record.
///
/// The model path does not guarantee this shape; see
/// [`crate::pipeline::postprocess::parse_expense`] for a best-effort parse.
/// The fallback path always produces it, with `error` set.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StructuredExpense {
    #[serde(default)]
    pub name_of_restaurant: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub amount: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub expense_type: String,
    #[serde(default)]
    pub expense_lines: Vec<String>,
    /// Backend failure detail; present only on fallback records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Where the result text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    /// Verbatim model output with a timing prefix.
    Model,
    /// Deterministic fallback JSON.
    Fallback,
}

/// The terminal artifact of one extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// Text handed to the rendering boundary: annotated model output or
    /// fallback JSON.
    pub content: String,
    /// Which path produced `content`.
    pub source: ResultSource,
    /// Wall-clock time spent in the language-model call (including a failed one).
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
    /// The OCR text the result was derived from.
    pub raw_text: String,
    /// Per-stage statistics.
    pub stats: ExtractionStats,
}

impl ExtractionResult {
    /// True when the language model failed and `content` is the fallback record.
    pub fn is_fallback(&self) -> bool {
        self.source == ResultSource::Fallback
    }
}

/// Timing and size statistics for one extraction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub original_width: u32,
    pub original_height: u32,
    pub normalized_width: u32,
    pub normalized_height: u32,
    /// Characters of OCR text.
    pub raw_text_chars: usize,
    /// Characters of the prompt sent to the model.
    pub prompt_chars: usize,
    pub normalize_ms: u64,
    pub ocr_ms: u64,
    pub llm_ms: u64,
    pub total_ms: u64,
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
