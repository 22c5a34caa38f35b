//! Semantic plausibility check of rule-based TOC text.
//!
//! The locator works on layout alone and regularly picks up lists of figures
//! or a page mixing the TOC with body text. One classification call decides
//! whether the serialized area really is a TOC and, for mixed content,
//! extracts only the main-document entries.

use crate::completion::{complete_structured, CompletionClient, CompletionRequest, OutputSchema};
use crate::config::{CompletionConfig, ModelBinding};
use crate::error::CompletionError;
use crate::prompts::{content_validation_user_prompt, CONTENT_VALIDATION_SYSTEM_PROMPT};
use crate::usage::UsageRecord;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const COMPONENT: &str = "toc-content-validator";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TocContentType {
    PureToc,
    Mixed,
    ResourceOnly,
    Invalid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentValidationResult {
    pub is_valid: bool,
    pub confidence: f32,
    pub content_type: TocContentType,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub extracted_toc_markdown: Option<String>,
}

/// Outcome plus the usage of the call (if one was made).
#[derive(Debug, Clone)]
pub struct ContentValidation {
    pub result: ContentValidationResult,
    pub usage: Option<UsageRecord>,
}

fn schema() -> OutputSchema {
    OutputSchema::of::<ContentValidationResult>(
        "toc_content_validation",
        json!({
            "type": "object",
            "properties": {
                "isValid": {"type": "boolean"},
                "confidence": {"type": "number", "minimum": 0, "maximum": 1},
                "contentType": {"type": "string", "enum": ["pure_toc", "mixed", "resource_only", "invalid"]},
                "reason": {"type": "string"},
                "extractedTocMarkdown": {"type": ["string", "null"]}
            },
            "required": ["isValid", "confidence", "contentType", "reason", "extractedTocMarkdown"]
        }),
    )
}

pub struct TocContentValidator {
    client: Arc<dyn CompletionClient>,
    binding: ModelBinding,
    params: CompletionConfig,
    threshold: f32,
}

impl TocContentValidator {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        binding: ModelBinding,
        params: CompletionConfig,
        threshold: f32,
    ) -> Self {
        Self {
            client,
            binding,
            params,
            threshold,
        }
    }

    /// Classify `markdown`. Blank input short-circuits to `invalid` without a call.
    pub async fn validate(&self, markdown: &str) -> Result<ContentValidation, CompletionError> {
        if markdown.trim().is_empty() {
            debug!("TOC content validation skipped: empty input");
            return Ok(ContentValidation {
                result: ContentValidationResult {
                    is_valid: false,
                    confidence: 1.0,
                    content_type: TocContentType::Invalid,
                    reason: "empty input".to_string(),
                    extracted_toc_markdown: None,
                },
                usage: None,
            });
        }

        let request = CompletionRequest::text(
            schema(),
            CONTENT_VALIDATION_SYSTEM_PROMPT,
            content_validation_user_prompt(markdown),
            &self.binding,
            &self.params,
        )
        .tagged(COMPONENT, "validation");
        let out = complete_structured::<ContentValidationResult>(self.client.as_ref(), request).await?;
        let mut result = out.output;
        if !(0.0..=1.0).contains(&result.confidence) {
            warn!(
                "TOC content validator returned confidence {} outside [0, 1]; treating as 0",
                result.confidence
            );
            result.confidence = 0.0;
        }
        info!(
            "TOC content classified as {:?} (valid={}, confidence={:.2}): {}",
            result.content_type, result.is_valid, result.confidence, result.reason
        );
        Ok(ContentValidation {
            result,
            usage: Some(out.usage),
        })
    }

    pub fn is_valid(&self, result: &ContentValidationResult) -> bool {
        result.is_valid && result.confidence >= self.threshold
    }

    /// Text to hand to the structured extractor, if any.
    pub fn valid_markdown(&self, result: &ContentValidationResult, original: &str) -> Option<String> {
        match result.content_type {
            TocContentType::PureToc => Some(original.to_string()),
            TocContentType::Mixed => result
                .extracted_toc_markdown
                .as_ref()
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            TocContentType::ResourceOnly | TocContentType::Invalid => None,
        }
    }
}
