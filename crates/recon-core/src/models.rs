//! Domain models for recon-core

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A manually entered travel expense
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expense {
    pub id: i64,
    pub date: NaiveDate,
    /// Expense category (compared case-insensitively, e.g. "Hotel")
    pub category: String,
    pub merchant: String,
    /// Authoritative amount in home currency
    pub amount: f64,
    /// True once the expense has been included in a submitted report
    pub tagged: bool,
    pub created_at: DateTime<Utc>,
}

/// A new expense to insert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewExpense {
    pub date: NaiveDate,
    pub category: String,
    pub merchant: String,
    pub amount: f64,
    #[serde(default)]
    pub tagged: bool,
}

/// Outcome of the field-extraction step for a receipt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    /// Uploaded, extraction not yet attempted
    #[default]
    Pending,
    /// All key fields extracted
    Extracted,
    /// Extraction ran but the amount was not found
    ExtractedPartial,
    /// Extraction failed (details in error_message)
    Failed,
}

impl ExtractionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Extracted => "extracted",
            Self::ExtractedPartial => "extracted_partial",
            Self::Failed => "error",
        }
    }

    /// True if the receipt carries an extraction failure
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl std::str::FromStr for ExtractionStatus {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        // Providers report granular failure codes like "error_unavailable";
        // anything in the error family collapses to Failed.
        let lower = s.to_lowercase();
        if lower.starts_with("error") {
            return Ok(Self::Failed);
        }
        match lower.as_str() {
            "pending" => Ok(Self::Pending),
            "extracted" => Ok(Self::Extracted),
            "extracted_partial" => Ok(Self::ExtractedPartial),
            _ => Err(Error::InvalidData(format!("Unknown extraction status: {}", s))),
        }
    }
}

impl std::fmt::Display for ExtractionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An uploaded receipt with best-effort extracted fields
///
/// Every extracted field is independently optional; consumers must handle
/// absence rather than assume presence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    pub id: i64,
    pub original_filename: String,
    /// Blob name or local path where the receipt bytes live
    pub stored_path: String,
    pub content_type: Option<String>,
    pub extracted_merchant: Option<String>,
    pub extracted_vendor_name: Option<String>,
    pub extracted_amount: Option<f64>,
    /// Raw extracted date string, parsed lazily during scoring
    pub extracted_date: Option<String>,
    pub extracted_service_start: Option<String>,
    pub extracted_service_end: Option<String>,
    pub status: ExtractionStatus,
    pub error_message: Option<String>,
    /// SHA-256 of the receipt bytes, for deduplication
    pub content_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Receipt {
    /// Merchant field preferred for matching: extraction merchant first,
    /// vendor name as fallback
    pub fn merchant_or_vendor(&self) -> Option<&str> {
        self.extracted_merchant
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| {
                self.extracted_vendor_name
                    .as_deref()
                    .filter(|s| !s.trim().is_empty())
            })
    }
}

/// A new receipt to insert
#[derive(Debug, Clone, Default)]
pub struct NewReceipt {
    pub original_filename: String,
    pub stored_path: String,
    pub content_type: Option<String>,
    pub extracted_merchant: Option<String>,
    pub extracted_vendor_name: Option<String>,
    pub extracted_amount: Option<f64>,
    pub extracted_date: Option<String>,
    pub extracted_service_start: Option<String>,
    pub extracted_service_end: Option<String>,
    pub status: ExtractionStatus,
    pub error_message: Option<String>,
    pub content_hash: Option<String>,
}

/// Per-factor breakdown of a match score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchComponents {
    pub merchant_score: f64,
    pub amount_score: f64,
    pub date_score: f64,
}

/// A suggested (not yet confirmed) receipt-expense pairing
///
/// Ephemeral: produced fresh per request, persisted only after the caller
/// confirms the pairing. Weighted scores may marginally exceed 1.0 due to
/// rounding, so callers must not assume a strict upper bound.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchProposal {
    pub receipt_id: i64,
    pub expense_id: i64,
    pub score: f64,
    /// Human-readable component breakdown; advisory only
    pub rationale: String,
    pub components: MatchComponents,
}

/// A confirmed expense-receipt link
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptLink {
    pub expense_id: i64,
    pub receipt_id: i64,
    pub match_score: f64,
}

/// A persisted line item decomposing one expense
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    pub id: i64,
    pub expense_id: i64,
    pub item_date: Option<NaiveDate>,
    pub description: String,
    pub amount: f64,
}

/// A candidate line item parsed from provider output, not yet persisted
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateItem {
    pub description: String,
    pub amount: f64,
    pub item_date: Option<NaiveDate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extraction_status_roundtrip() {
        for status in [
            ExtractionStatus::Pending,
            ExtractionStatus::Extracted,
            ExtractionStatus::ExtractedPartial,
        ] {
            assert_eq!(status.as_str().parse::<ExtractionStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_extraction_status_error_family() {
        assert_eq!(
            "error_docintel_unavailable"
                .parse::<ExtractionStatus>()
                .unwrap(),
            ExtractionStatus::Failed
        );
        assert_eq!(
            "error".parse::<ExtractionStatus>().unwrap(),
            ExtractionStatus::Failed
        );
        assert!(ExtractionStatus::Failed.is_error());
        assert!(!ExtractionStatus::Extracted.is_error());
    }

    #[test]
    fn test_extraction_status_unknown_rejected() {
        assert!(matches!(
            "bogus".parse::<ExtractionStatus>(),
            Err(Error::InvalidData(_))
        ));
    }

    #[test]
    fn test_merchant_or_vendor_fallback() {
        let mut receipt = Receipt {
            id: 1,
            original_filename: "inv.pdf".into(),
            stored_path: "blob".into(),
            content_type: None,
            extracted_merchant: None,
            extracted_vendor_name: Some("Marriott Hotels".into()),
            extracted_amount: None,
            extracted_date: None,
            extracted_service_start: None,
            extracted_service_end: None,
            status: ExtractionStatus::Extracted,
            error_message: None,
            content_hash: None,
            created_at: Utc::now(),
        };
        assert_eq!(receipt.merchant_or_vendor(), Some("Marriott Hotels"));

        receipt.extracted_merchant = Some("JW Marriott".into());
        assert_eq!(receipt.merchant_or_vendor(), Some("JW Marriott"));

        receipt.extracted_merchant = Some("  ".into());
        assert_eq!(receipt.merchant_or_vendor(), Some("Marriott Hotels"));
    }
}
