//! Batched check of parsed captions against their original text.

use super::AlignedCaption;
use crate::completion::{complete_structured, CompletionClient, CompletionRequest, OutputSchema};
use crate::config::{CompletionConfig, ModelBinding};
use crate::error::ChapterError;
use crate::prompts::{caption_validation_user_prompt, CAPTION_VALIDATION_SYSTEM_PROMPT};
use crate::usage::UsageTracker;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

pub const COMPONENT: &str = "caption-validator";

#[derive(Debug, Deserialize)]
struct ValidationOutput {
    results: Vec<bool>,
}

fn schema() -> OutputSchema {
    OutputSchema::of::<ValidationOutput>(
        "caption_validation",
        json!({
            "type": "object",
            "properties": {
                "results": {"type": "array", "items": {"type": "boolean"}}
            },
            "required": ["results"]
        }),
    )
}

pub struct CaptionValidator {
    client: Arc<dyn CompletionClient>,
    binding: ModelBinding,
    params: CompletionConfig,
    batch_size: usize,
    tracker: UsageTracker,
}

impl CaptionValidator {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        binding: ModelBinding,
        params: CompletionConfig,
        batch_size: usize,
        tracker: UsageTracker,
    ) -> Self {
        Self {
            client,
            binding,
            params,
            batch_size,
            tracker,
        }
    }

    /// One verdict per item, in order.
    ///
    /// Any failed call, or a reply with the wrong number of verdicts, is a
    /// [`ChapterError::CaptionValidation`].
    pub async fn validate(&self, items: &[AlignedCaption]) -> Result<Vec<bool>, ChapterError> {
        let mut verdicts = Vec::with_capacity(items.len());
        for batch in items.chunks(self.batch_size.max(1)) {
            let rows: Vec<(String, String, Option<String>)> = batch
                .iter()
                .map(|a| {
                    (
                        a.original.clone(),
                        a.caption.full_text.clone(),
                        a.caption.num.clone(),
                    )
                })
                .collect();
            let request = CompletionRequest::text(
                schema(),
                CAPTION_VALIDATION_SYSTEM_PROMPT,
                caption_validation_user_prompt(&rows),
                &self.binding,
                &self.params,
            )
            .tagged(COMPONENT, "validation");
            let out = complete_structured::<ValidationOutput>(self.client.as_ref(), request)
                .await
                .map_err(|e| ChapterError::CaptionValidation(e.to_string()))?;
            self.tracker.record(out.usage);

            if out.output.results.len() != batch.len() {
                return Err(ChapterError::CaptionValidation(format!(
                    "expected {} verdicts, got {}",
                    batch.len(),
                    out.output.results.len()
                )));
            }
            verdicts.extend(out.output.results);
        }
        Ok(verdicts)
    }
}
