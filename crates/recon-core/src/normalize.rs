//! Field normalization for noisy extracted receipt data
//!
//! Extraction providers return merchant names, amounts, and dates in wildly
//! inconsistent shapes. These helpers canonicalize them into comparable forms.
//! All of them degrade to `None` on bad input rather than returning errors.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use serde_json::Value;

// Compiled once; these run inside the per-receipt scoring loop.
static MERCHANT_SANITIZE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("valid regex"));
static ISO_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})-(\d{1,2})-(\d{1,2})$").expect("valid regex"));
static DMY_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,2})-(\d{1,2})-(\d{4})$").expect("valid regex"));
static DMY_SHORT_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,2})-(\d{1,2})-(\d{2})$").expect("valid regex"));

/// Canonicalize a merchant name for fuzzy comparison
///
/// Lowercases, replaces every run of characters outside `[a-z0-9]` with a
/// single space, collapses whitespace, and trims. `None` stays `None` so
/// callers can distinguish "no data" from "empty after normalization".
pub fn normalize_merchant(name: Option<&str>) -> Option<String> {
    let name = name?;
    let lowered = name.to_lowercase();
    let replaced = MERCHANT_SANITIZE.replace_all(lowered.trim(), " ");
    Some(
        replaced
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" "),
    )
}

/// Round to 2 decimal places, half away from zero
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Best-effort numeric coercion of a JSON value to a 2-decimal amount
///
/// Accepts numbers and numeric strings (thousands separators stripped).
/// Anything else, including NaN/infinite results, yields `None`.
pub fn normalize_amount(value: &Value) -> Option<f64> {
    let raw = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.replace(',', "").trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !raw.is_finite() {
        return None;
    }
    Some(round2(raw))
}

/// Parse a heterogeneous date string into a calendar date
///
/// Accepts ISO (`YYYY-MM-DD`), day-first with `-`, `/`, or `.` separators,
/// and 2-digit years (00-79 are 20xx, 80-99 are 19xx). Only the first
/// whitespace-delimited token is considered, which strips any trailing
/// time-of-day. Unparsable input yields `None`.
pub fn parse_date(value: Option<&str>) -> Option<NaiveDate> {
    let token = value?.split_whitespace().next()?;
    let s = token.replace(['.', '/'], "-");

    if let Some(caps) = ISO_DATE.captures(&s) {
        return NaiveDate::from_ymd_opt(
            caps[1].parse().ok()?,
            caps[2].parse().ok()?,
            caps[3].parse().ok()?,
        );
    }

    if let Some(caps) = DMY_DATE.captures(&s) {
        return NaiveDate::from_ymd_opt(
            caps[3].parse().ok()?,
            caps[2].parse().ok()?,
            caps[1].parse().ok()?,
        );
    }

    if let Some(caps) = DMY_SHORT_DATE.captures(&s) {
        let short: i32 = caps[3].parse().ok()?;
        let year = if short <= 79 { 2000 + short } else { 1900 + short };
        return NaiveDate::from_ymd_opt(year, caps[2].parse().ok()?, caps[1].parse().ok()?);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_merchant_basic() {
        assert_eq!(
            normalize_merchant(Some("JW Marriott, Pune!")),
            Some("jw marriott pune".to_string())
        );
        assert_eq!(
            normalize_merchant(Some("  Uber *TRIP   ")),
            Some("uber trip".to_string())
        );
    }

    #[test]
    fn test_normalize_merchant_none_and_empty() {
        assert_eq!(normalize_merchant(None), None);
        // Empty after normalization stays Some("") so callers can tell
        // "no data" apart from "nothing left".
        assert_eq!(normalize_merchant(Some("!!!")), Some(String::new()));
    }

    #[test]
    fn test_normalize_merchant_idempotent() {
        let once = normalize_merchant(Some("Hôtel-Le Grand  PARIS")).unwrap();
        let twice = normalize_merchant(Some(&once)).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_round2_half_away_from_zero() {
        assert_eq!(round2(0.125), 0.13);
        assert_eq!(round2(-0.125), -0.13);
        assert_eq!(round2(1000.0 / 3.0), 333.33);
    }

    #[test]
    fn test_normalize_amount_coercion() {
        assert_eq!(normalize_amount(&json!(1234.567)), Some(1234.57));
        assert_eq!(normalize_amount(&json!("1,234.50")), Some(1234.5));
        assert_eq!(normalize_amount(&json!(" 42 ")), Some(42.0));
        assert_eq!(normalize_amount(&json!("n/a")), None);
        assert_eq!(normalize_amount(&json!(null)), None);
        assert_eq!(normalize_amount(&json!(true)), None);
    }

    #[test]
    fn test_normalize_amount_stable() {
        let first = normalize_amount(&json!(99.999)).unwrap();
        let second = normalize_amount(&json!(first)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 9, 24).unwrap();
        assert_eq!(parse_date(Some("2024-09-24")), Some(expected));
        assert_eq!(parse_date(Some("24/09/2024")), Some(expected));
        assert_eq!(parse_date(Some("24.09.2024")), Some(expected));
        assert_eq!(parse_date(Some("24-09-24")), Some(expected));
        assert_eq!(parse_date(Some("2024/09/24")), Some(expected));
    }

    #[test]
    fn test_parse_date_two_digit_year_expansion() {
        assert_eq!(
            parse_date(Some("01-02-79")),
            NaiveDate::from_ymd_opt(2079, 2, 1)
        );
        assert_eq!(
            parse_date(Some("01-02-80")),
            NaiveDate::from_ymd_opt(1980, 2, 1)
        );
    }

    #[test]
    fn test_parse_date_strips_time_suffix() {
        assert_eq!(
            parse_date(Some("2024-09-24 14:32:00")),
            NaiveDate::from_ymd_opt(2024, 9, 24)
        );
    }

    #[test]
    fn test_parse_date_unparsable() {
        assert_eq!(parse_date(None), None);
        assert_eq!(parse_date(Some("")), None);
        assert_eq!(parse_date(Some("not a date")), None);
        assert_eq!(parse_date(Some("2024-13-40")), None);
    }
}
