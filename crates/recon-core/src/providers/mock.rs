//! Mock provider for testing
//!
//! Returns canned responses for both extraction capabilities so the
//! reconciliation pipeline can be exercised without a live model server.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::models::ExtractionStatus;

use super::{ExtractionOutcome, FieldExtractor, LineItemExtractor};

/// Mock extraction provider
///
/// Configure with the raw line-item text and field outcome a test expects;
/// `failing()` simulates a provider that is unreachable.
#[derive(Default)]
pub struct MockExtractor {
    line_items_response: String,
    fields: ExtractionOutcome,
    fail: bool,
    /// stored_paths passed to extract_line_items, for assertions
    pub calls: Mutex<Vec<String>>,
}

impl MockExtractor {
    /// Mock that answers line-item requests with the given raw text
    pub fn with_line_items(raw: &str) -> Self {
        Self {
            line_items_response: raw.to_string(),
            fields: ExtractionOutcome {
                status: ExtractionStatus::Extracted,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Mock that answers field requests with the given outcome
    pub fn with_fields(fields: ExtractionOutcome) -> Self {
        Self {
            fields,
            ..Default::default()
        }
    }

    /// Mock whose every call fails at the transport level
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl FieldExtractor for MockExtractor {
    async fn extract(
        &self,
        _data: &[u8],
        _filename: &str,
        _content_type: Option<&str>,
    ) -> Result<ExtractionOutcome> {
        if self.fail {
            return Ok(ExtractionOutcome {
                status: ExtractionStatus::Failed,
                error_message: Some("mock provider unavailable".into()),
                ..Default::default()
            });
        }
        Ok(self.fields.clone())
    }
}

#[async_trait]
impl LineItemExtractor for MockExtractor {
    async fn extract_line_items(&self, stored_path: &str) -> Result<String> {
        self.calls
            .lock()
            .expect("mock call log poisoned")
            .push(stored_path.to_string());
        if self.fail {
            return Err(Error::Provider("mock provider unavailable".into()));
        }
        Ok(self.line_items_response.clone())
    }
}
