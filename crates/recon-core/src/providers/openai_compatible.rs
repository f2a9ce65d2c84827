//! OpenAI-compatible extraction provider
//!
//! Works with any server implementing the OpenAI `/v1/chat/completions` API
//! with vision support (Azure OpenAI via gateway, vLLM, LocalAI, etc.).
//! Receipt bytes are sent inline as a data URI; the model is instructed to
//! answer with strict JSON, but nothing downstream relies on it complying.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::models::ExtractionStatus;
use crate::normalize::normalize_amount;

use super::{ExtractionOutcome, FieldExtractor, LineItemExtractor};

/// Transport attempts per request (retry policy lives here, not in the core)
const MAX_ATTEMPTS: usize = 2;

const FIELDS_PROMPT: &str = "You are an expert at reading travel receipts and invoices. \
Extract the following from the attached receipt and return STRICT JSON with keys: \
merchant (string), vendor_name (string), amount (number, grand total), \
date (YYYY-MM-DD), service_start (YYYY-MM-DD), service_end (YYYY-MM-DD). \
Use null for anything you cannot find. Return JSON only.";

const LINE_ITEMS_PROMPT: &str = "You are an expert in understanding hotel invoices. \
Given an invoice image or PDF, extract only the debit (charge) line-items with \
positive amounts. Return a STRICT JSON array of objects with: date, description, \
reference (if any), debit (number). Return JSON only.";

/// OpenAI-compatible provider adapter
#[derive(Clone)]
pub struct OpenAICompatibleExtractor {
    http_client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    /// Directory where uploaded receipt bytes live (stored_path is relative)
    upload_dir: PathBuf,
}

impl OpenAICompatibleExtractor {
    /// Create a new adapter
    pub fn new(base_url: &str, model: &str, upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            http_client: Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: None,
            upload_dir: upload_dir.into(),
        }
    }

    /// Create with an API key
    pub fn with_api_key(
        base_url: &str,
        model: &str,
        upload_dir: impl Into<PathBuf>,
        api_key: &str,
    ) -> Self {
        let mut adapter = Self::new(base_url, model, upload_dir);
        adapter.api_key = Some(api_key.to_string());
        adapter
    }

    /// Create from environment variables
    ///
    /// Required: `OPENAI_COMPATIBLE_HOST`
    /// Optional: `OPENAI_COMPATIBLE_MODEL` (default: gpt-4o-mini),
    /// `OPENAI_COMPATIBLE_API_KEY`, `RECEIPT_UPLOAD_DIR` (default: uploads)
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("OPENAI_COMPATIBLE_HOST").ok()?;
        let model = std::env::var("OPENAI_COMPATIBLE_MODEL")
            .unwrap_or_else(|_| "gpt-4o-mini".to_string());
        let upload_dir =
            std::env::var("RECEIPT_UPLOAD_DIR").unwrap_or_else(|_| "uploads".to_string());

        let mut adapter = Self::new(&host, &model, upload_dir);
        adapter.api_key = std::env::var("OPENAI_COMPATIBLE_API_KEY").ok();
        Some(adapter)
    }

    /// Make a vision chat completion request with bounded retry
    async fn vision_completion(&self, prompt: &str, data: &[u8], mime: &str) -> Result<String> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(data);
        let data_uri = format!("data:{};base64,{}", mime, encoded);

        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: vec![
                    ContentPart::Text {
                        text: prompt.to_string(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url: data_uri },
                    },
                ],
            }],
            temperature: Some(0.2),
            max_tokens: Some(4096),
            stream: false,
        };

        let mut last_error: Option<Error> = None;
        for attempt in 1..=MAX_ATTEMPTS {
            match self.send(&request).await {
                Ok(content) => return Ok(content),
                Err(e) => {
                    warn!(attempt, error = %e, "Provider request failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| Error::Provider("no attempts made".into())))
    }

    async fn send(&self, request: &ChatCompletionRequest) -> Result<String> {
        let mut req_builder = self
            .http_client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .json(request);

        if let Some(ref api_key) = self.api_key {
            req_builder = req_builder.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = req_builder.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Provider(format!(
                "provider API error {}: {}",
                status, body
            )));
        }

        let chat_response: ChatCompletionResponse = response.json().await?;

        chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| Error::Provider("no choices in provider response".into()))
    }
}

/// MIME type for a stored receipt, by extension (image/png when unknown)
fn mime_for_path(path: &str) -> &'static str {
    let ext = path.rsplit('.').next().unwrap_or("").to_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        _ => "image/png",
    }
}

/// Extract the outermost JSON object from a model response
fn extract_json_object(response: &str) -> Option<&str> {
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    (start < end).then(|| &response[start..=end])
}

/// Fields as the model reports them, before normalization
#[derive(Debug, Deserialize)]
struct FieldPayload {
    #[serde(default)]
    merchant: Option<String>,
    #[serde(default)]
    vendor_name: Option<String>,
    #[serde(default)]
    amount: Option<Value>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    service_start: Option<String>,
    #[serde(default)]
    service_end: Option<String>,
}

#[async_trait]
impl FieldExtractor for OpenAICompatibleExtractor {
    async fn extract(
        &self,
        data: &[u8],
        filename: &str,
        content_type: Option<&str>,
    ) -> Result<ExtractionOutcome> {
        let mime = content_type.unwrap_or_else(|| mime_for_path(filename));

        let response = match self.vision_completion(FIELDS_PROMPT, data, mime).await {
            Ok(text) => text,
            Err(e) => {
                // Degrade to an errored outcome so the receipt is still recorded
                return Ok(ExtractionOutcome {
                    status: ExtractionStatus::Failed,
                    error_message: Some(e.to_string()),
                    ..Default::default()
                });
            }
        };

        let Some(json_str) = extract_json_object(&response) else {
            return Ok(ExtractionOutcome {
                status: ExtractionStatus::Failed,
                error_message: Some("no JSON object in provider response".into()),
                ..Default::default()
            });
        };
        let payload: FieldPayload = match serde_json::from_str(json_str) {
            Ok(p) => p,
            Err(e) => {
                return Ok(ExtractionOutcome {
                    status: ExtractionStatus::Failed,
                    error_message: Some(format!("invalid field JSON: {}", e)),
                    ..Default::default()
                });
            }
        };

        let amount = payload.amount.as_ref().and_then(normalize_amount);
        let status = if amount.is_some() {
            ExtractionStatus::Extracted
        } else {
            ExtractionStatus::ExtractedPartial
        };
        debug!(filename, ?status, "Field extraction complete");

        Ok(ExtractionOutcome {
            extracted_merchant: payload.merchant.filter(|s| !s.trim().is_empty()),
            extracted_vendor_name: payload.vendor_name.filter(|s| !s.trim().is_empty()),
            extracted_amount: amount,
            extracted_date: payload.date.filter(|s| !s.trim().is_empty()),
            extracted_service_start: payload.service_start.filter(|s| !s.trim().is_empty()),
            extracted_service_end: payload.service_end.filter(|s| !s.trim().is_empty()),
            status,
            error_message: None,
        })
    }
}

#[async_trait]
impl LineItemExtractor for OpenAICompatibleExtractor {
    async fn extract_line_items(&self, stored_path: &str) -> Result<String> {
        let full_path = self.upload_dir.join(stored_path);
        let data = std::fs::read(&full_path)?;
        let mime = mime_for_path(stored_path);

        self.vision_completion(LINE_ITEMS_PROMPT, &data, mime).await
    }
}

/// OpenAI chat completion request
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

/// Chat message (always multimodal here)
#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: Vec<ContentPart>,
}

/// Content part for multimodal messages
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

/// Image URL for vision requests
#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

/// OpenAI chat completion response
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_for_path() {
        assert_eq!(mime_for_path("scan.JPG"), "image/jpeg");
        assert_eq!(mime_for_path("invoice.pdf"), "application/pdf");
        assert_eq!(mime_for_path("f79da3cb.png"), "image/png");
        assert_eq!(mime_for_path("noextension"), "image/png");
    }

    #[test]
    fn test_extract_json_object() {
        assert_eq!(
            extract_json_object("Here you go: {\"a\": 1} hope that helps"),
            Some("{\"a\": 1}")
        );
        assert_eq!(extract_json_object("no json here"), None);
    }
}
