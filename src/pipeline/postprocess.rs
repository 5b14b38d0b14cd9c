//! Post-processing: best-effort parse of model output into a [`StructuredExpense`].
//!
//! Small local models rarely return *only* JSON. Typical artefacts:
//!
//! - a ```` ```json ```` fence around the object despite "JSON only"
//! - a sentence of preamble ("Here is the extracted JSON:")
//! - numbers where strings were asked for (`"amount": 4.5`)
//! - objects inside `expense_lines` instead of strings
//! - Windows line endings and zero-width characters copied from OCR
//!
//! The rendered result never depends on this module; it exists for callers
//! that want typed data (the CLI `--json` mode) and returns `None` whenever
//! the text does not contain a recognisable expense object.

use crate::output::StructuredExpense;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

const FIELDS: [&str; 6] = [
    "name_of_restaurant",
    "date",
    "amount",
    "description",
    "expense_type",
    "expense_lines",
];

/// Parse `text` (annotated model output or fallback JSON) into an expense record.
pub fn parse_expense(text: &str) -> Option<StructuredExpense> {
    let s = strip_timing_prefix(text);
    let s = normalise_line_endings(s);
    let s = remove_invisible_chars(&s);
    let s = strip_code_fences(&s);
    let object = first_json_object(&s)?;
    let value: Value = serde_json::from_str(object).ok()?;
    expense_from_value(value.as_object()?)
}

// ── Rule 1: Strip the timing annotation ──────────────────────────────────────

static RE_TIMING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:⚡\s*)?Processed in \d+\.\d{2}s\s*").unwrap());

fn strip_timing_prefix(input: &str) -> &str {
    match RE_TIMING.find(input) {
        Some(m) => &input[m.end()..],
        None => input,
    }
}

// ── Rule 2: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 4: Strip markdown code fences ───────────────────────────────────────

static RE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*\n(.*?)\n?```").unwrap());

fn strip_code_fences(input: &str) -> String {
    if let Some(caps) = RE_FENCE.captures(input) {
        caps[1].to_string()
    } else {
        input.to_string()
    }
}

// ── Rule 5: Locate the first balanced JSON object ────────────────────────────

/// Return the first `{…}` span whose braces balance, ignoring braces inside
/// string literals.
fn first_json_object(input: &str) -> Option<&str> {
    let start = input.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in input[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&input[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

// ── Rule 6: Coerce loosely-typed values ──────────────────────────────────────

fn expense_from_value(obj: &Map<String, Value>) -> Option<StructuredExpense> {
    if !FIELDS.iter().any(|f| obj.contains_key(*f)) {
        return None;
    }

    let text = |key: &str| obj.get(key).map(value_to_text).unwrap_or_default();

    let expense_lines = match obj.get("expense_lines") {
        Some(Value::Array(items)) => items.iter().map(value_to_text).collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![value_to_text(other)],
    };

    Some(StructuredExpense {
        name_of_restaurant: text("name_of_restaurant"),
        date: text("date"),
        amount: text("amount"),
        description: text("description"),
        expense_type: text("expense_type"),
        expense_lines,
        error: obj.get("error").map(value_to_text),
    })
}

fn value_to_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
