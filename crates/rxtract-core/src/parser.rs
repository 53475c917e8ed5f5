//! Tolerant recovery of a JSON record from raw model output.
//!
//! Model responses often wrap the object in prose or a Markdown fence, leave
//! trailing commas, drop the quotes around keys, or use single quotes. The
//! parser tries, in order:
//!
//! 1. The interior of a ```` ```json ```` fence, or else the span from the
//!    first `{` to the last `}`
//! 2. Strict JSON
//! 3. JSON with trailing commas before `}` / `]` removed
//! 4. That text with bare keys quoted and single-quoted strings converted
//!
//! Every failure comes back as a [`ParseFailure`] value. Parsing never panics.
//!
//! ```
//! use rxtract_core::parser::parse;
//! use serde_json::json;
//!
//! let record = parse("Sure! {name: 'x', age: 5,}").unwrap();
//! assert_eq!(serde_json::Value::from(record), json!({"name": "x", "age": 5}));
//! ```

use crate::models::{Record, ERROR_KEY, RAW_TEXT_KEY};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

/// Message used when the text contains no object-like span at all.
pub const NO_JSON_MESSAGE: &str = "Could not extract valid JSON from response";

// All patterns are compile-time constants.
static FENCED_JSON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)```json\s*([\s\S]*?)\s*```").expect("Invalid fence regex"));
static TRAILING_COMMA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",\s*([}\]])").expect("Invalid trailing comma regex"));

/// A response that could not be turned into a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{error}")]
pub struct ParseFailure {
    /// Diagnostic describing why parsing failed
    pub error: String,
    /// The original, unmodified response text
    pub raw_text: String,
}

impl ParseFailure {
    fn new(error: impl Into<String>, raw_text: &str) -> Self {
        Self {
            error: error.into(),
            raw_text: raw_text.to_string(),
        }
    }

    /// Error-shaped record: `{"error": ..., "raw_text": ...}`.
    #[must_use]
    pub fn into_record(self) -> Record {
        let mut record = Record::new();
        record.insert(ERROR_KEY, Value::String(self.error));
        record.insert(RAW_TEXT_KEY, Value::String(self.raw_text));
        record
    }
}

impl From<ParseFailure> for Record {
    fn from(failure: ParseFailure) -> Self {
        failure.into_record()
    }
}

/// Recover a record from raw model output.
///
/// # Errors
///
/// Returns a [`ParseFailure`] carrying a diagnostic and the original text when
/// no object can be recovered.
pub fn parse(raw_text: &str) -> Result<Record, ParseFailure> {
    let Some(candidate) = extract_candidate(raw_text) else {
        warn!("No JSON object found in response ({} bytes)", raw_text.len());
        return Err(ParseFailure::new(NO_JSON_MESSAGE, raw_text));
    };

    if let Ok(record) = parse_object(candidate) {
        return Ok(record);
    }

    let cleaned = strip_trailing_commas(candidate);
    let error = match parse_object(&cleaned) {
        Ok(record) => return Ok(record),
        Err(e) => e,
    };

    let repaired = repair_keys_and_quotes(&cleaned);
    match parse_object(&repaired) {
        Ok(record) => {
            debug!("Recovered record after key/quote repair");
            Ok(record)
        }
        Err(_) => {
            warn!("Unrecoverable JSON in response: {}", error);
            Err(ParseFailure::new(
                format!("Invalid JSON format: {error}"),
                raw_text,
            ))
        }
    }
}

/// Locate the text that should hold the object.
fn extract_candidate(text: &str) -> Option<&str> {
    if let Some(inner) = FENCED_JSON.captures(text).and_then(|c| c.get(1)) {
        return Some(inner.as_str());
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

fn parse_object(text: &str) -> Result<Record, String> {
    let value: Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
    let kind = match &value {
        Value::Object(_) => "object",
        Value::Array(_) => "array",
        Value::String(_) => "string",
        Value::Number(_) => "number",
        Value::Bool(_) => "boolean",
        Value::Null => "null",
    };
    Record::from_value(value).ok_or_else(|| format!("expected a JSON object, found {kind}"))
}

/// Remove commas directly before a closing brace or bracket.
fn strip_trailing_commas(text: &str) -> String {
    TRAILING_COMMA.replace_all(text, "$1").into_owned()
}

/// Quote bare-word keys and rewrite single-quoted strings as JSON strings.
///
/// A bare key is a word directly after `{` or `,` and followed by `:`, outside
/// any string. Apostrophes inside double-quoted strings are left alone; double
/// quotes inside single-quoted strings are escaped.
fn repair_keys_and_quotes(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 16);
    let mut in_double = false;
    let mut in_single = false;
    let mut escaped = false;
    let mut key_position = false;
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        i += 1;

        if escaped {
            escaped = false;
            if in_single && ch == '\'' {
                out.push('\'');
            } else {
                out.push('\\');
                out.push(ch);
            }
            continue;
        }

        if in_double || in_single {
            match ch {
                '\\' => escaped = true,
                '"' if in_single => out.push_str("\\\""),
                '"' => {
                    in_double = false;
                    out.push('"');
                }
                '\'' if in_double => out.push('\''),
                '\'' => {
                    in_single = false;
                    out.push('"');
                }
                _ => out.push(ch),
            }
            continue;
        }

        match ch {
            '"' => {
                in_double = true;
                key_position = false;
                out.push('"');
            }
            '\'' => {
                in_single = true;
                key_position = false;
                out.push('"');
            }
            '{' | ',' => {
                key_position = true;
                out.push(ch);
            }
            c if c.is_whitespace() => out.push(c),
            c if key_position && is_word_char(c) => {
                let start = i - 1;
                while i < chars.len() && is_word_char(chars[i]) {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let next = chars[i..].iter().find(|c| !c.is_whitespace());
                if next == Some(&':') {
                    out.push('"');
                    out.push_str(&word);
                    out.push('"');
                } else {
                    out.push_str(&word);
                }
                key_position = false;
            }
            c => {
                key_position = false;
                out.push(c);
            }
        }
    }

    if escaped {
        out.push('\\');
    }
    out
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parsed(text: &str) -> Value {
        Value::from(parse(text).unwrap())
    }

    #[test]
    fn test_strict_json() {
        assert_eq!(parsed(r#"{"a": 1}"#), json!({"a": 1}));
    }

    #[test]
    fn test_fenced_block_with_prose() {
        let text = "Here is the data:\n```json\n{\"patient_name\": \"Ada\"}\n```\nLet me know!";
        assert_eq!(parsed(text), json!({"patient_name": "Ada"}));
    }

    #[test]
    fn test_fence_marker_case_insensitive() {
        let text = "```JSON\n{\"a\": true}\n```";
        assert_eq!(parsed(text), json!({"a": true}));
    }

    #[test]
    fn test_surrounding_prose_without_fence() {
        let text = "The extracted record is {\"a\": {\"b\": 2}} as requested.";
        assert_eq!(parsed(text), json!({"a": {"b": 2}}));
    }

    #[test]
    fn test_trailing_commas() {
        let text = r#"{"list": [1, 2, ], "x": "y",
        }"#;
        assert_eq!(parsed(text), json!({"list": [1, 2], "x": "y"}));
    }

    #[test]
    fn test_unquoted_keys_single_quotes_trailing_comma() {
        assert_eq!(parsed("`{name: 'x', age: 5,}`"), json!({"name": "x", "age": 5}));
    }

    #[test]
    fn test_nested_repair() {
        let text = "{patient_name: 'Ada', medication_list: [{name: 'Aspirin', dosage: '100mg'},]}";
        assert_eq!(
            parsed(text),
            json!({
                "patient_name": "Ada",
                "medication_list": [{"name": "Aspirin", "dosage": "100mg"}]
            })
        );
    }

    #[test]
    fn test_apostrophe_inside_double_quotes_survives_repair() {
        let text = r#"{note: "patient's notes", 'who': 'Dr. "B"'}"#;
        assert_eq!(
            parsed(text),
            json!({"note": "patient's notes", "who": "Dr. \"B\""})
        );
    }

    #[test]
    fn test_no_braces_is_error() {
        let failure = parse("I could not read the image.").unwrap_err();
        assert_eq!(failure.error, NO_JSON_MESSAGE);
        assert_eq!(failure.raw_text, "I could not read the image.");
    }

    #[test]
    fn test_reversed_braces_is_error() {
        let failure = parse("} nothing here {").unwrap_err();
        assert_eq!(failure.error, NO_JSON_MESSAGE);
    }

    #[test]
    fn test_unrecoverable_keeps_raw_text() {
        let text = "prefix {\"a\": [1, 2} suffix";
        let failure = parse(text).unwrap_err();
        assert!(failure.error.starts_with("Invalid JSON format:"));
        assert_eq!(failure.raw_text, text);
    }

    #[test]
    fn test_fenced_array_is_not_a_record() {
        let failure = parse("```json\n[1, 2]\n```").unwrap_err();
        assert!(failure.error.contains("expected a JSON object, found array"));
    }

    #[test]
    fn test_valid_json_with_comma_brace_in_string_untouched() {
        let text = r#"{"note": "take with food, }"}"#;
        assert_eq!(parsed(text), json!({"note": "take with food, }"}));
    }

    #[test]
    fn test_failure_into_record() {
        let record = parse("nothing").unwrap_err().into_record();
        assert!(record.is_error());
        assert_eq!(record.get(RAW_TEXT_KEY), Some(&json!("nothing")));
    }

    #[test]
    fn test_repair_escaped_single_quote() {
        assert_eq!(repair_keys_and_quotes(r"{'a': 'it\'s'}"), r#"{"a": "it's"}"#);
    }

    #[test]
    fn test_key_like_text_inside_strings_untouched() {
        let text = "{note: 'take 1, then: rest', x: 1,}";
        assert_eq!(parsed(text), json!({"note": "take 1, then: rest", "x": 1}));

        let text = r#"{note: "a, b: c", y: 'd'}"#;
        assert_eq!(parsed(text), json!({"note": "a, b: c", "y": "d"}));
    }

    #[test]
    fn test_repair_leaves_array_values_alone() {
        assert_eq!(
            repair_keys_and_quotes("{list: [1, two, 3], k : 'v'}"),
            r#"{"list": [1, two, 3], "k" : "v"}"#
        );
    }
}
