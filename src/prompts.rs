//! Prompt construction for structured expense extraction.
//!
//! The template spells out the exact JSON shape so even a 1B model copies the
//! field names instead of inventing its own. Only a prefix of the OCR text is
//! embedded: receipts put the merchant, date and total near the top, and a
//! short prompt keeps time-to-first-token low.

/// Instruction template. `{text}` is replaced with the truncated OCR text.
pub const EXPENSE_PROMPT_TEMPLATE: &str = r#"Extract expense JSON only:
{
  "name_of_restaurant": "",
  "date": "",
  "amount": "",
  "description": "",
  "expense_type": "",
  "expense_lines": []
}

Text: {text}"#;

/// Return at most the first `max_chars` characters of `text`.
///
/// Counts Unicode scalar values, so a multi-byte character is never split.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Build the extraction prompt for `raw_text`.
///
/// Text longer than `max_chars` characters is cut to its first `max_chars`
/// characters; shorter text is embedded unchanged.
pub fn build_prompt(raw_text: &str, max_chars: usize) -> String {
    EXPENSE_PROMPT_TEMPLATE.replace("{text}", truncate_chars(raw_text, max_chars))
}
