//! Defensive parsing of line-item provider output
//!
//! The provider returns free text that is usually a JSON array of charge
//! rows, sometimes wrapped in a Markdown code fence, sometimes a structured
//! error envelope, and sometimes empty. Nothing about the shape is
//! guaranteed, so every step here degrades instead of failing.

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::models::CandidateItem;
use crate::normalize::normalize_amount;

/// How far into the raw text we look for an `"error"` key before treating
/// the payload as an error envelope
const ERROR_ENVELOPE_WINDOW: usize = 120;

/// Result of parsing one raw provider response
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedResponse {
    /// Provider signalled a structured failure
    ProviderError { message: String },
    /// Provider returned no content at all
    Empty,
    /// Zero or more surviving candidate items
    Items(Vec<CandidateItem>),
}

/// Parse raw provider text into candidate line items
///
/// Detects error envelopes, strips code fences, parses the remainder as a
/// JSON array, and normalizes each entry. Parse failures and non-array
/// payloads yield `Items(vec![])` rather than an error.
pub fn parse_line_item_response(raw: &str) -> ParsedResponse {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return ParsedResponse::Empty;
    }

    if let Some(message) = detect_error_envelope(trimmed) {
        return ParsedResponse::ProviderError { message };
    }

    let cleaned = strip_code_fence(trimmed);

    let parsed: Vec<Value> = match serde_json::from_str::<Value>(&cleaned) {
        Ok(Value::Array(items)) => items,
        Ok(_) => {
            warn!("Line-item response parsed but is not a JSON array");
            Vec::new()
        }
        Err(e) => {
            warn!(error = %e, "Line-item response is not valid JSON");
            Vec::new()
        }
    };

    let mut candidates = Vec::new();
    for (index, entry) in parsed.iter().enumerate() {
        let Some(obj) = entry.as_object() else {
            continue;
        };

        // First present (non-empty, non-zero) of the known amount keys wins;
        // a present-but-unparsable value drops the candidate.
        let raw_amount = ["debit", "amount", "total"]
            .iter()
            .filter_map(|key| obj.get(*key))
            .find(|v| is_present(v));
        let Some(raw_amount) = raw_amount else {
            debug!(index, "Dropping item without an amount");
            continue;
        };
        let Some(amount) = normalize_amount(raw_amount) else {
            debug!(index, "Dropping item with a non-numeric amount");
            continue;
        };
        if amount <= 0.0 {
            debug!(index, amount, "Dropping non-positive item");
            continue;
        }

        let description = ["description", "item", "name"]
            .iter()
            .filter_map(|key| obj.get(*key).and_then(Value::as_str))
            .map(str::trim)
            .find(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Item {}", index + 1));

        let item_date = ["date", "item_date"]
            .iter()
            .filter_map(|key| obj.get(*key).and_then(Value::as_str))
            .map(str::trim)
            .find(|s| !s.is_empty())
            .and_then(reinterpret_item_date);

        candidates.push(CandidateItem {
            description,
            amount,
            item_date,
        });
    }

    ParsedResponse::Items(candidates)
}

/// Detect the provider's JSON error envelope: `{"error": true, "message": ...}`
///
/// Only payloads starting with `{` and mentioning `"error"` near the start
/// are considered; a payload that looks like an envelope but does not parse
/// falls through to normal handling.
fn detect_error_envelope(trimmed: &str) -> Option<String> {
    if !trimmed.starts_with('{') {
        return None;
    }
    let mut window_end = trimmed.len().min(ERROR_ENVELOPE_WINDOW);
    while !trimmed.is_char_boundary(window_end) {
        window_end -= 1;
    }
    let head = &trimmed[..window_end];
    if !head.contains("\"error\"") {
        return None;
    }
    let payload: Value = serde_json::from_str(trimmed).ok()?;
    let obj = payload.as_object()?;
    let is_error = match obj.get("error") {
        Some(Value::Bool(b)) => *b,
        Some(Value::Null) | None => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64().map(|v| v != 0.0).unwrap_or(false),
        Some(_) => true,
    };
    if !is_error {
        return None;
    }
    let message = obj
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("provider reported an error")
        .to_string();
    Some(message)
}

/// Whether a JSON value counts as "present" when walking key fallbacks
/// (mirrors the provider contract where null, "", and 0 mean absent)
fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Number(n) => n.as_f64().map(|v| v != 0.0).unwrap_or(true),
        Value::Bool(b) => *b,
        _ => true,
    }
}

/// Strip a surrounding triple-backtick fence and an optional `json` label
fn strip_code_fence(text: &str) -> String {
    let cleaned = text.trim();
    if cleaned.starts_with("```") {
        let mut lines: Vec<&str> = cleaned.lines().collect();
        if lines.first().is_some_and(|l| l.starts_with("```")) {
            lines.remove(0);
        }
        if lines.last().is_some_and(|l| l.starts_with("```")) {
            lines.pop();
        }
        return strip_json_label(lines.join("\n").trim());
    }
    strip_json_label(cleaned)
}

/// Models sometimes echo a `json` label even outside the fence line
fn strip_json_label(text: &str) -> String {
    if let Some(head) = text.get(..4) {
        if head.eq_ignore_ascii_case("json") {
            return text[4..].trim_start_matches(':').trim().to_string();
        }
    }
    text.to_string()
}

/// Reinterpret a provider item date into a calendar date
///
/// `DD-MM-YY[YY]` becomes ISO with a naive `20` prefix for 2-digit years;
/// already-ISO dates pass through; anything else is dropped.
fn reinterpret_item_date(raw: &str) -> Option<chrono::NaiveDate> {
    let dv = raw.trim();
    if dv.is_empty() {
        return None;
    }
    let dmy = Regex::new(r"^(\d{2})-(\d{2})-(\d{2,4})$").expect("valid regex");
    if let Some(caps) = dmy.captures(dv) {
        let year_raw = &caps[3];
        let year: i32 = if year_raw.len() == 2 {
            format!("20{}", year_raw).parse().ok()?
        } else {
            year_raw.parse().ok()?
        };
        return chrono::NaiveDate::from_ymd_opt(
            year,
            caps[2].parse().ok()?,
            caps[1].parse().ok()?,
        );
    }
    let iso = Regex::new(r"^(\d{4})-(\d{2})-(\d{2})$").expect("valid regex");
    if let Some(caps) = iso.captures(dv) {
        return chrono::NaiveDate::from_ymd_opt(
            caps[1].parse().ok()?,
            caps[2].parse().ok()?,
            caps[3].parse().ok()?,
        );
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_empty_response() {
        assert_eq!(parse_line_item_response(""), ParsedResponse::Empty);
        assert_eq!(parse_line_item_response("   \n "), ParsedResponse::Empty);
    }

    #[test]
    fn test_error_envelope() {
        let raw = r#"{"error": true, "message": "deployment not found"}"#;
        assert_eq!(
            parse_line_item_response(raw),
            ParsedResponse::ProviderError {
                message: "deployment not found".into()
            }
        );
    }

    #[test]
    fn test_falsy_error_envelope_is_not_an_error() {
        let raw = r#"{"error": false, "message": "all good"}"#;
        // Not an array either, so it degrades to zero items
        assert_eq!(parse_line_item_response(raw), ParsedResponse::Items(vec![]));
    }

    #[test]
    fn test_fenced_json_array() {
        let raw = "```json\n[{\"date\": \"24-09-24\", \"description\": \"Room Charge\", \"debit\": 5000}]\n```";
        let ParsedResponse::Items(items) = parse_line_item_response(raw) else {
            panic!("expected items");
        };
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].description, "Room Charge");
        assert_eq!(items[0].amount, 5000.0);
        assert_eq!(items[0].item_date, NaiveDate::from_ymd_opt(2024, 9, 24));
    }

    #[test]
    fn test_fenced_empty_array() {
        let ParsedResponse::Items(items) = parse_line_item_response("```json\n[]\n```") else {
            panic!("expected items");
        };
        assert!(items.is_empty());
    }

    #[test]
    fn test_field_fallbacks() {
        let raw = r#"[
            {"item": "Breakfast", "amount": "1,250.00"},
            {"name": "Laundry", "total": 300, "item_date": "2024-09-25"},
            {"debit": 120.5}
        ]"#;
        let ParsedResponse::Items(items) = parse_line_item_response(raw) else {
            panic!("expected items");
        };
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].description, "Breakfast");
        assert_eq!(items[0].amount, 1250.0);
        assert_eq!(items[1].description, "Laundry");
        assert_eq!(items[1].item_date, NaiveDate::from_ymd_opt(2024, 9, 25));
        assert_eq!(items[2].description, "Item 3");
    }

    #[test]
    fn test_drops_bad_amounts() {
        let raw = r#"[
            {"description": "Credit", "debit": -120},
            {"description": "Zero", "debit": 0},
            {"description": "Words", "debit": "n/a"},
            {"description": "Missing"},
            {"description": "Keep", "debit": 10}
        ]"#;
        let ParsedResponse::Items(items) = parse_line_item_response(raw) else {
            panic!("expected items");
        };
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].description, "Keep");
    }

    #[test]
    fn test_unknown_date_formats_left_null() {
        let raw = r#"[{"description": "Room", "debit": 100, "date": "Sept 24th"}]"#;
        let ParsedResponse::Items(items) = parse_line_item_response(raw) else {
            panic!("expected items");
        };
        assert_eq!(items[0].item_date, None);
    }

    #[test]
    fn test_garbage_degrades_to_empty_items() {
        assert_eq!(
            parse_line_item_response("the model rambled instead of returning JSON"),
            ParsedResponse::Items(vec![])
        );
        assert_eq!(
            parse_line_item_response(r#"{"not": "an array"}"#),
            ParsedResponse::Items(vec![])
        );
    }

    #[test]
    fn test_non_object_entries_skipped() {
        let raw = r#"[42, "text", {"description": "Ok", "debit": 5}]"#;
        let ParsedResponse::Items(items) = parse_line_item_response(raw) else {
            panic!("expected items");
        };
        assert_eq!(items.len(), 1);
    }
}
