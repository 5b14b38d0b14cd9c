//! Deterministic fallback record for when the language model is unavailable.
//!
//! The user still gets a well-formed expense record: the sentinels make it
//! obvious that no model looked at the receipt, the OCR text is preserved in
//! full, and `error` says why.

use crate::output::StructuredExpense;
use crate::prompts::truncate_chars;

/// `name_of_restaurant` sentinel on fallback records.
pub const BACKEND_UNAVAILABLE: &str = "Error - check Ollama";

/// `date` / `amount` sentinel on fallback records.
pub const NOT_AVAILABLE: &str = "N/A";

/// `expense_type` on fallback records.
pub const FALLBACK_EXPENSE_TYPE: &str = "receipt";

/// Characters of OCR text copied into `description`.
pub const DESCRIPTION_CHARS: usize = 100;

/// Build the fallback record for `raw_text` and failure `reason`.
pub fn fallback_record(raw_text: &str, reason: &str) -> StructuredExpense {
    StructuredExpense {
        name_of_restaurant: BACKEND_UNAVAILABLE.to_string(),
        date: NOT_AVAILABLE.to_string(),
        amount: NOT_AVAILABLE.to_string(),
        description: truncate_chars(raw_text, DESCRIPTION_CHARS).to_string(),
        expense_type: FALLBACK_EXPENSE_TYPE.to_string(),
        expense_lines: vec![raw_text.to_string()],
        error: Some(reason.to_string()),
    }
}

/// Render the fallback record as pretty-printed JSON (two-space indent).
///
/// Never fails: a record made only of strings always serialises.
pub fn fallback_json(raw_text: &str, reason: &str) -> String {
    let record = fallback_record(raw_text, reason);
    match serde_json::to_string_pretty(&record) {
        Ok(json) => json,
        Err(e) => format!(
            "{{\n  \"expense_type\": \"receipt\",\n  \"error\": {}\n}}",
            serde_json::Value::String(format!("{reason}; {e}"))
        ),
    }
}
