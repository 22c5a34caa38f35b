//! Vision fallback: find the TOC by looking at page images.
//!
//! Used when the rule-based locator finds nothing or its text is rejected by
//! the plausibility check. Two batches at most:
//!
//! ```text
//! pages 1..=first ──▶ found? ──yes──▶ continues && pages left? ──▶ continuation batch, merge
//!                      │
//!                      no ──▶ pages first+1..=first+second ──▶ found? ──▶ markdown | None
//! ```

use crate::completion::{complete_structured, CompletionClient, CompletionRequest, OutputSchema};
use crate::config::{CompletionConfig, ModelBinding, VisionConfig};
use crate::error::ChapterError;
use crate::pipeline::pages::PageImageSource;
use crate::prompts::{vision_continuation_prompt, vision_first_batch_prompt, VISION_TOC_SYSTEM_PROMPT};
use crate::usage::UsageTracker;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const COMPONENT: &str = "vision-toc-extractor";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VisionTocOutput {
    has_toc: bool,
    #[serde(default)]
    toc_markdown: Option<String>,
    #[serde(default)]
    continues_on_next_page: bool,
}

impl VisionTocOutput {
    /// TOC markdown, if the model reported one with actual content.
    fn markdown(&self) -> Option<&str> {
        if !self.has_toc {
            return None;
        }
        self.toc_markdown
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

fn schema() -> OutputSchema {
    OutputSchema::of::<VisionTocOutput>(
        "vision_toc",
        json!({
            "type": "object",
            "properties": {
                "hasToc": {"type": "boolean"},
                "tocMarkdown": {"type": "string"},
                "continuesOnNextPage": {"type": "boolean"}
            },
            "required": ["hasToc", "tocMarkdown", "continuesOnNextPage"]
        }),
    )
}

pub struct VisionTocLocator {
    client: Arc<dyn CompletionClient>,
    binding: ModelBinding,
    params: CompletionConfig,
    batches: VisionConfig,
    pages: PageImageSource,
    tracker: UsageTracker,
}

impl VisionTocLocator {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        binding: ModelBinding,
        params: CompletionConfig,
        batches: VisionConfig,
        pages: PageImageSource,
        tracker: UsageTracker,
    ) -> Self {
        Self {
            client,
            binding,
            params,
            batches,
            pages,
            tracker,
        }
    }

    /// TOC markdown read from the first pages, or `None` if there is none.
    pub async fn extract(&self, total_pages: u32) -> Result<Option<String>, ChapterError> {
        if total_pages == 0 {
            return Ok(None);
        }

        let first_end = self.batches.first_batch_size.max(1).min(total_pages);
        let second_end = first_end
            .saturating_add(self.batches.second_batch_size)
            .min(total_pages);

        let first = self
            .ask(1, first_end, vision_first_batch_prompt(1, first_end), "first-batch")
            .await?;

        if let Some(out) = first {
            let Some(markdown) = out.markdown().map(str::to_string) else {
                return self.search_second_batch(first_end, second_end).await;
            };
            if out.continues_on_next_page && first_end < second_end {
                return Ok(Some(self.continue_toc(markdown, first_end + 1, second_end).await));
            }
            info!("Vision TOC found in pages 1-{}", first_end);
            return Ok(Some(markdown));
        }
        self.search_second_batch(first_end, second_end).await
    }

    async fn search_second_batch(
        &self,
        first_end: u32,
        second_end: u32,
    ) -> Result<Option<String>, ChapterError> {
        if first_end >= second_end {
            debug!("Vision TOC: no pages left after the first batch");
            return Ok(None);
        }
        let start = first_end + 1;
        let out = self
            .ask(start, second_end, vision_first_batch_prompt(start, second_end), "second-batch")
            .await?;
        let markdown = out.as_ref().and_then(|o| o.markdown()).map(str::to_string);
        match &markdown {
            Some(_) => info!("Vision TOC found in pages {}-{}", start, second_end),
            None => info!("Vision TOC not found in the first {} pages", second_end),
        }
        Ok(markdown)
    }

    /// Merge a continuation batch into `markdown`; any failure keeps `markdown` as is.
    async fn continue_toc(&self, markdown: String, start: u32, end: u32) -> String {
        let prompt = vision_continuation_prompt(start, end);
        match self.ask(start, end, prompt, "continuation").await {
            Ok(Some(out)) => match out.markdown() {
                Some(more) => {
                    info!("Vision TOC continues on pages {}-{}", start, end);
                    format!("{}\n{}", markdown.trim(), more)
                }
                None => markdown,
            },
            Ok(None) => markdown,
            Err(e) => {
                warn!("Vision TOC continuation failed, keeping first batch: {}", e);
                markdown
            }
        }
    }

    /// One vision call over pages `start..=end`. `Ok(None)` when no page image exists.
    async fn ask(
        &self,
        start: u32,
        end: u32,
        prompt: String,
        phase: &str,
    ) -> Result<Option<VisionTocOutput>, ChapterError> {
        let images = self.pages.load_range(start, end).await;
        if images.is_empty() {
            warn!("No page images for pages {}-{}, skipping vision call", start, end);
            return Ok(None);
        }
        debug!("Vision TOC {}: {} page image(s)", phase, images.len());
        let request = CompletionRequest::vision(
            schema(),
            VISION_TOC_SYSTEM_PROMPT,
            prompt,
            images,
            &self.binding,
            &self.params,
        )
        .tagged(COMPONENT, phase);
        let out = complete_structured::<VisionTocOutput>(self.client.as_ref(), request).await?;
        self.tracker.record(out.usage);
        Ok(Some(out.output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::scripted::ScriptedCompletionClient;
    use crate::config::ModelSpec;
    use crate::pipeline::pages::write_test_pages;
    use serde_json::Value;
    use tempfile::TempDir;

    fn reply(has: bool, md: &str, cont: bool) -> Value {
        json!({"hasToc": has, "tocMarkdown": md, "continuesOnNextPage": cont})
    }

    fn locator(client: Arc<ScriptedCompletionClient>, pages: u32) -> (VisionTocLocator, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        write_test_pages(dir.path(), pages);
        let loc = VisionTocLocator::new(
            client,
            ModelBinding::single(ModelSpec::default()),
            CompletionConfig::default(),
            VisionConfig::default(),
            PageImageSource::new(dir.path()),
            UsageTracker::new(),
        );
        (loc, dir)
    }

    #[tokio::test]
    async fn zero_pages_returns_none_without_calls() {
        let client = Arc::new(ScriptedCompletionClient::new());
        let (loc, _dir) = locator(client.clone(), 0);
        assert_eq!(loc.extract(0).await.unwrap(), None);
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn continuation_is_merged() {
        let client = Arc::new(ScriptedCompletionClient::new());
        client.push(COMPONENT, reply(true, "- 1. Intro ..... 1\n", true));
        client.push(COMPONENT, reply(true, "  - 9. Annex ..... 90", false));
        let (loc, _dir) = locator(client.clone(), 15);

        let md = loc.extract(15).await.unwrap().unwrap();
        assert_eq!(md, "- 1. Intro ..... 1\n- 9. Annex ..... 90");

        let calls = client.calls();
        assert_eq!(calls[0].image_count, 10);
        assert_eq!(calls[1].phase, "continuation");
        assert_eq!(calls[1].image_count, 5);
        assert_eq!(loc.tracker.len(), 2);
    }

    #[tokio::test]
    async fn continuation_failure_keeps_first_batch() {
        let client = Arc::new(ScriptedCompletionClient::new());
        client.push(COMPONENT, reply(true, "- A ..... 1", true));
        client.push_error(COMPONENT, "timeout");
        let (loc, _dir) = locator(client, 12);
        assert_eq!(loc.extract(12).await.unwrap().as_deref(), Some("- A ..... 1"));
    }

    #[tokio::test]
    async fn no_continuation_when_document_ends() {
        let client = Arc::new(ScriptedCompletionClient::new());
        client.push(COMPONENT, reply(true, "- A ..... 1", true));
        let (loc, _dir) = locator(client.clone(), 6);
        assert_eq!(loc.extract(6).await.unwrap().as_deref(), Some("- A ..... 1"));
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn second_batch_is_disjoint() {
        let client = Arc::new(ScriptedCompletionClient::new());
        client.push(COMPONENT, reply(false, "", false));
        client.push(COMPONENT, reply(true, "- B ..... 3", false));
        let (loc, _dir) = locator(client.clone(), 25);
        assert_eq!(loc.extract(25).await.unwrap().as_deref(), Some("- B ..... 3"));

        let calls = client.calls();
        assert_eq!(calls[1].phase, "second-batch");
        assert!(calls[1].user_text.contains("pages 11 to 20"));
        assert_eq!(calls[1].image_count, 10);
    }

    #[tokio::test]
    async fn empty_markdown_counts_as_not_found() {
        let client = Arc::new(ScriptedCompletionClient::new());
        client.push(COMPONENT, reply(true, "   ", false));
        client.push(COMPONENT, reply(false, "", false));
        let (loc, _dir) = locator(client.clone(), 20);
        assert_eq!(loc.extract(20).await.unwrap(), None);
        assert_eq!(client.call_count(), 2);
    }

    #[tokio::test]
    async fn first_batch_failure_is_fatal() {
        let client = Arc::new(ScriptedCompletionClient::new());
        client.push_error(COMPONENT, "401");
        let (loc, _dir) = locator(client, 5);
        let err = loc.extract(5).await.unwrap_err();
        assert!(matches!(err, ChapterError::Completion(_)));
    }
}
