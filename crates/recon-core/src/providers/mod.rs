//! Pluggable extraction provider abstraction
//!
//! The core never talks to a document-AI service directly; it consumes two
//! narrow capabilities behind traits so retry/backoff and transport concerns
//! stay inside the adapter:
//!
//! - `FieldExtractor`: receipt bytes in, best-effort structured fields out
//! - `LineItemExtractor`: stored receipt in, raw line-item text out
//!
//! # Configuration
//!
//! The OpenAI-compatible adapter reads:
//! - `OPENAI_COMPATIBLE_HOST`: Server URL (required)
//! - `OPENAI_COMPATIBLE_MODEL`: Model name (default: gpt-4o-mini)
//! - `OPENAI_COMPATIBLE_API_KEY`: API key if required (optional)
//! - `RECEIPT_UPLOAD_DIR`: Directory holding stored receipt bytes

mod mock;
mod openai_compatible;

pub use mock::MockExtractor;
pub use openai_compatible::OpenAICompatibleExtractor;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{ExtractionStatus, NewReceipt};

/// Best-effort structured fields produced by a field-extraction provider
///
/// Every field is independently optional; a provider that found an amount but
/// no merchant reports `ExtractedPartial` rather than failing.
#[derive(Debug, Clone, Default)]
pub struct ExtractionOutcome {
    pub extracted_merchant: Option<String>,
    pub extracted_vendor_name: Option<String>,
    pub extracted_amount: Option<f64>,
    pub extracted_date: Option<String>,
    pub extracted_service_start: Option<String>,
    pub extracted_service_end: Option<String>,
    pub status: ExtractionStatus,
    pub error_message: Option<String>,
}

impl ExtractionOutcome {
    /// Attach upload metadata to build an insertable receipt record
    pub fn into_receipt(
        self,
        original_filename: &str,
        stored_path: &str,
        content_type: Option<&str>,
        content_hash: Option<String>,
    ) -> NewReceipt {
        NewReceipt {
            original_filename: original_filename.to_string(),
            stored_path: stored_path.to_string(),
            content_type: content_type.map(str::to_string),
            extracted_merchant: self.extracted_merchant,
            extracted_vendor_name: self.extracted_vendor_name,
            extracted_amount: self.extracted_amount,
            extracted_date: self.extracted_date,
            extracted_service_start: self.extracted_service_start,
            extracted_service_end: self.extracted_service_end,
            status: self.status,
            error_message: self.error_message,
            content_hash,
        }
    }
}

/// Turns raw receipt bytes into a best-effort structured field set
///
/// Transport failures surface in the outcome's status/error_message rather
/// than as `Err`; `Err` is reserved for local faults (e.g. unreadable file).
#[async_trait]
pub trait FieldExtractor: Send + Sync {
    async fn extract(
        &self,
        data: &[u8],
        filename: &str,
        content_type: Option<&str>,
    ) -> Result<ExtractionOutcome>;
}

/// Turns one stored receipt into raw line-item text
///
/// The returned text is expected (but not guaranteed) to contain a JSON array
/// of `{date, description, debit}` objects; the itemization parser handles
/// everything else defensively.
#[async_trait]
pub trait LineItemExtractor: Send + Sync {
    async fn extract_line_items(&self, stored_path: &str) -> Result<String>;
}
