//! Batched caption parsing.

use super::{align_parsed, AlignedCaption, Caption, ResourceKind};
use crate::completion::{complete_structured, CompletionClient, CompletionRequest, OutputSchema};
use crate::config::{CompletionConfig, ModelBinding};
use crate::error::ChapterError;
use crate::prompts::{caption_parse_user_prompt, CAPTION_PARSE_SYSTEM_PROMPT};
use crate::usage::UsageTracker;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

pub const COMPONENT: &str = "caption-parser";

#[derive(Debug, Deserialize)]
struct ParseOutput {
    captions: Vec<Caption>,
}

fn schema() -> OutputSchema {
    OutputSchema::of::<ParseOutput>(
        "caption_parse",
        json!({
            "type": "object",
            "properties": {
                "captions": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "fullText": {"type": "string"},
                            "num": {"type": ["string", "null"]}
                        },
                        "required": ["fullText", "num"]
                    }
                }
            },
            "required": ["captions"]
        }),
    )
}

pub struct CaptionParser {
    client: Arc<dyn CompletionClient>,
    binding: ModelBinding,
    params: CompletionConfig,
    /// Captions per call; `0` means one call per caption, strictly sequential.
    batch_size: usize,
    concurrency: usize,
    component: String,
    tracker: UsageTracker,
}

impl CaptionParser {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        binding: ModelBinding,
        params: CompletionConfig,
        batch_size: usize,
        concurrency: usize,
        tracker: UsageTracker,
    ) -> Self {
        Self {
            client,
            binding,
            params,
            batch_size,
            concurrency: concurrency.max(1),
            component: COMPONENT.to_string(),
            tracker,
        }
    }

    /// Usage tag for this parser's calls.
    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = component.into();
        self
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    /// Parse `(index, text)` items. Items a batch reply does not account for
    /// are dropped with a warning.
    pub async fn parse(
        &self,
        items: &[(usize, String)],
        kind: ResourceKind,
    ) -> Result<Vec<AlignedCaption>, ChapterError> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let (chunk, in_flight) = if self.batch_size == 0 {
            (1, 1)
        } else {
            (self.batch_size, self.concurrency)
        };

        let batches: Vec<Vec<AlignedCaption>> = stream::iter(items.chunks(chunk))
            .map(|batch| self.parse_batch(batch, kind))
            .buffered(in_flight)
            .try_collect()
            .await?;
        Ok(batches.into_iter().flatten().collect())
    }

    async fn parse_batch(
        &self,
        batch: &[(usize, String)],
        kind: ResourceKind,
    ) -> Result<Vec<AlignedCaption>, ChapterError> {
        let texts: Vec<String> = batch.iter().map(|(_, t)| t.clone()).collect();
        debug!("{}: parsing {} {} caption(s)", self.component, texts.len(), kind);
        let request = CompletionRequest::text(
            schema(),
            CAPTION_PARSE_SYSTEM_PROMPT,
            caption_parse_user_prompt(kind.as_str(), &texts),
            &self.binding,
            &self.params,
        )
        .tagged(&self.component, "parse");
        let out = complete_structured::<ParseOutput>(self.client.as_ref(), request).await?;
        self.tracker.record(out.usage);
        align_parsed(batch, out.output.captions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::scripted::ScriptedCompletionClient;
    use crate::config::ModelSpec;
    use serde_json::Value;

    fn parser(client: Arc<ScriptedCompletionClient>, batch_size: usize) -> CaptionParser {
        CaptionParser::new(
            client,
            ModelBinding::single(ModelSpec::default()),
            CompletionConfig::default(),
            batch_size,
            4,
            UsageTracker::new(),
        )
    }

    /// Echo every numbered input line back as a caption without a label.
    fn echo(client: &ScriptedCompletionClient) {
        client.respond_with(COMPONENT, |req| {
            let captions: Vec<Value> = req
                .content
                .text()
                .lines()
                .filter_map(|l| l.split_once(". "))
                .filter(|(n, _)| n.chars().all(|c| c.is_ascii_digit()))
                .map(|(_, t)| json!({"fullText": t, "num": null}))
                .collect();
            Ok(json!({ "captions": captions }))
        });
    }

    fn items(n: usize) -> Vec<(usize, String)> {
        (0..n).map(|i| (i * 2, format!("Caption {i}"))).collect()
    }

    #[tokio::test]
    async fn batches_keep_input_order() {
        let client = Arc::new(ScriptedCompletionClient::new());
        echo(&client);
        let p = parser(client.clone(), 2);
        let out = p.parse(&items(5), ResourceKind::Image).await.unwrap();
        assert_eq!(client.call_count(), 3);
        let idx: Vec<_> = out.iter().map(|a| a.index).collect();
        assert_eq!(idx, [0, 2, 4, 6, 8]);
        assert_eq!(out[4].caption.full_text, "Caption 4");
    }

    #[tokio::test]
    async fn zero_batch_size_is_one_call_per_caption() {
        let client = Arc::new(ScriptedCompletionClient::new());
        let p = parser(client.clone(), 0).with_component("caption-parser-fallback");
        client.respond_with("caption-parser-fallback", |req| {
            let t = req.content.text().lines().nth(2).unwrap_or_default();
            let t = t.split_once(". ").map(|(_, t)| t).unwrap_or_default();
            Ok(json!({"captions": [{"fullText": t, "num": "Figure 1"}]}))
        });
        let out = p.parse(&items(3), ResourceKind::Table).await.unwrap();
        assert_eq!(client.calls_for("caption-parser-fallback").len(), 3);
        assert!(out.iter().all(|a| a.caption.num.as_deref() == Some("Figure 1")));
    }

    #[tokio::test]
    async fn empty_input_makes_no_call() {
        let client = Arc::new(ScriptedCompletionClient::new());
        let p = parser(client.clone(), 10);
        assert!(p.parse(&[], ResourceKind::Image).await.unwrap().is_empty());
        assert_eq!(client.call_count(), 0);
    }
}
