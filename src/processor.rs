//! The document processing controller.
//!
//! ```text
//! ParsedDocument
//!  │
//!  ├─ 1. Normalize   clean texts, split body / furniture / footnotes
//!  ├─ 2. Pages       PDF page → printed page map from headers/footers
//!  ├─ 3. TOC         locator → plausibility → (rule text | vision) → extractor
//!  ├─ 4. Resources   images ∥ tables (caption pipeline), then footnotes
//!  └─ 5. Chapters    TOC forest + content → chapter tree
//! ```
//!
//! Cancellation is cooperative: the flag is checked before each stage, never
//! inside one, so a completion call already in flight always finishes.

use crate::caption::CaptionPipeline;
use crate::completion::provider::LlmCompletionClient;
use crate::completion::CompletionClient;
use crate::config::{ProcessorConfig, ResolvedModels};
use crate::document::{ParsedDocument, RefResolver, TocAreaSerializer};
use crate::error::ChapterError;
use crate::ids::{IdAllocator, IdKind};
use crate::output::ProcessingResult;
use crate::pipeline::chapters::{assemble_chapters, ChapterContent};
use crate::pipeline::normalize::normalize_document;
use crate::pipeline::page_range::{resolve_page_ranges, PrintedPageIndex};
use crate::pipeline::pages::PageImageSource;
use crate::pipeline::resources::{
    allocate_ids, convert_footnotes, convert_images, convert_tables, picture_count, table_count,
};
use crate::progress::ProcessingStage;
use crate::toc::{TocAreaLocator, TocContentValidator, TocEntry, TocExtractor, TocSource, VisionTocLocator};
use crate::usage::UsageTracker;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Shared cancellation switch. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs the whole pipeline over parsed documents.
pub struct DocumentProcessor {
    config: ProcessorConfig,
    models: ResolvedModels,
    client: Arc<dyn CompletionClient>,
    cancel: CancellationFlag,
}

impl DocumentProcessor {
    pub fn new(config: ProcessorConfig, client: Arc<dyn CompletionClient>) -> Self {
        let models = config.resolve_models();
        Self {
            config,
            models,
            client,
            cancel: CancellationFlag::new(),
        }
    }

    /// Processor backed by `edgequake-llm` providers. Every configured model
    /// is instantiated up front so a missing API key fails here.
    pub fn with_llm(config: ProcessorConfig) -> Result<Self, ChapterError> {
        let models = config.resolve_models();
        let client = LlmCompletionClient::new(config.completion.retry_backoff_ms);
        client.preflight(
            [
                &models.toc_extractor,
                &models.content_validator,
                &models.vision_toc,
                &models.caption_parser,
                &models.caption_validator,
            ]
            .into_iter()
            .flat_map(|b| [&b.primary, &b.fallback]),
        )?;
        Ok(Self::new(config, Arc::new(client)))
    }

    /// Handle that cancels this processor's runs at the next stage boundary.
    /// Once set, the flag stays set.
    pub fn cancel_handle(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    pub fn models(&self) -> &ResolvedModels {
        &self.models
    }

    /// Process `doc`. `output_dir` is the parser's output directory holding
    /// `pages/page_{n}.png`.
    pub async fn process(
        &self,
        doc: &ParsedDocument,
        report_id: &str,
        output_dir: impl AsRef<Path>,
    ) -> Result<ProcessingResult, ChapterError> {
        let started = Instant::now();
        let total_pages = doc.total_pages();
        info!("Processing report '{}' ({} pages)", report_id, total_pages);

        let tracker = UsageTracker::new();
        let mut ids = IdAllocator::new();
        let pages = PageImageSource::new(output_dir);

        // ── Stage 1: Text normalization ─────────────────────────────────────
        self.begin(ProcessingStage::TextNormalization)?;
        let text = normalize_document(doc);
        self.end(ProcessingStage::TextNormalization, &tracker, None);

        // ── Stage 2: Page ranges ────────────────────────────────────────────
        self.begin(ProcessingStage::PageRangeResolution)?;
        let page_range_map = resolve_page_ranges(&text.furniture, total_pages);
        let printed = PrintedPageIndex::new(&page_range_map);
        self.end(ProcessingStage::PageRangeResolution, &tracker, None);

        // ── Stage 3: TOC ────────────────────────────────────────────────────
        self.begin(ProcessingStage::TocExtraction)?;
        let calls_before = tracker.len();
        let (toc, toc_source) = self.extract_toc(doc, total_pages, &pages, &tracker).await?;
        self.end(ProcessingStage::TocExtraction, &tracker, Some(calls_before));

        // ── Stage 4: Resources ──────────────────────────────────────────────
        self.begin(ProcessingStage::ResourceConversion)?;
        let calls_before = tracker.len();
        let captions = CaptionPipeline::new(
            self.client.clone(),
            &self.models,
            &self.config.caption,
            &self.config.completion,
            tracker.clone(),
        );
        let image_ids = allocate_ids(&mut ids, IdKind::Image, picture_count(doc));
        let table_ids = allocate_ids(&mut ids, IdKind::Table, table_count(doc));
        let (images, tables) = tokio::join!(
            convert_images(doc, image_ids, &captions),
            convert_tables(doc, table_ids, &captions),
        );
        let images = images?;
        let tables = tables?;
        let footnotes = convert_footnotes(&text.footnotes, &mut ids);
        self.end(ProcessingStage::ResourceConversion, &tracker, Some(calls_before));

        // ── Stage 5: Chapters ───────────────────────────────────────────────
        self.begin(ProcessingStage::ChapterAssembly)?;
        let content = ChapterContent {
            body: &text.body,
            images: &images,
            tables: &tables,
            footnotes: &footnotes,
        };
        let chapters = assemble_chapters(&toc, &printed, &content, &mut ids);
        self.end(ProcessingStage::ChapterAssembly, &tracker, None);

        let usage = tracker.snapshot();
        info!(
            "Processed '{}': {} chapters, {} images, {} tables, {} footnotes, {} completion calls in {}ms",
            report_id,
            chapters.len(),
            images.len(),
            tables.len(),
            footnotes.len(),
            usage.len(),
            started.elapsed().as_millis()
        );

        Ok(ProcessingResult {
            report_id: report_id.to_string(),
            toc_source,
            chapters,
            images,
            tables,
            footnotes,
            page_range_map,
            usage,
        })
    }

    fn begin(&self, stage: ProcessingStage) -> Result<(), ChapterError> {
        if self.cancel.is_cancelled() {
            warn!("Cancellation requested, not starting {}", stage);
            return Err(ChapterError::Aborted {
                stage: stage.to_string(),
            });
        }
        info!("Stage {} started", stage);
        if let Some(cb) = &self.config.progress_callback {
            cb.on_stage_start(stage);
        }
        Ok(())
    }

    /// Finish `stage`. `calls_before` is the tracker length at stage start
    /// for stages that may call the model; a usage snapshot follows if it grew.
    fn end(&self, stage: ProcessingStage, tracker: &UsageTracker, calls_before: Option<usize>) {
        debug!("Stage {} complete", stage);
        if let Some(cb) = &self.config.progress_callback {
            cb.on_stage_complete(stage);
            if calls_before.is_some_and(|n| tracker.len() > n) {
                cb.on_usage(&tracker.summary());
            }
        }
    }

    /// Rule-based text if plausible, else vision; one vision retry when the
    /// rule-based text structures into zero entries.
    async fn extract_toc(
        &self,
        doc: &ParsedDocument,
        total_pages: u32,
        pages: &PageImageSource,
        tracker: &UsageTracker,
    ) -> Result<(Vec<TocEntry>, TocSource), ChapterError> {
        let vision = VisionTocLocator::new(
            self.client.clone(),
            self.models.vision_toc.clone(),
            self.config.completion.clone(),
            self.config.vision.clone(),
            pages.clone(),
            tracker.clone(),
        );
        let extractor = TocExtractor::new(
            self.client.clone(),
            self.models.toc_extractor.clone(),
            self.config.completion.clone(),
            &self.config.toc,
            (total_pages > 0).then_some(total_pages),
            tracker.clone(),
        );

        let (markdown, source) = match self.rule_based_markdown(doc, tracker).await {
            Some(md) => (md, TocSource::RuleBased),
            None => match vision.extract(total_pages).await? {
                Some(md) => (md, TocSource::Vision),
                None => {
                    return Err(ChapterError::TocNotFound {
                        reason: "neither the document structure nor the page images contain a TOC"
                            .to_string(),
                    })
                }
            },
        };

        let extracted = extractor.extract(&markdown).await?;
        if !extracted.entries.is_empty() {
            return Ok((extracted.entries, source));
        }
        if source == TocSource::Vision {
            return Err(ChapterError::TocNotFound {
                reason: "TOC read from page images has no entries".to_string(),
            });
        }

        warn!("Rule-based TOC text has no entries, retrying with page images");
        let Some(md) = vision.extract(total_pages).await? else {
            return Err(ChapterError::TocNotFound {
                reason: "rule-based TOC has no entries and page images contain no TOC".to_string(),
            });
        };
        let retried = extractor.extract(&md).await?;
        if retried.entries.is_empty() {
            return Err(ChapterError::TocNotFound {
                reason: "TOC has no entries from either source".to_string(),
            });
        }
        Ok((retried.entries, TocSource::Vision))
    }

    /// Locate, serialize and plausibility-check the TOC area. `None` means
    /// fall through to vision.
    async fn rule_based_markdown(&self, doc: &ParsedDocument, tracker: &UsageTracker) -> Option<String> {
        let resolver = RefResolver::new(doc);
        let area = match TocAreaLocator::new(resolver, self.config.toc.max_search_pages).find() {
            Ok(area) => area,
            Err(e) => {
                warn!("Rule-based TOC search failed, trying page images: {}", e);
                return None;
            }
        };
        let markdown = TocAreaSerializer::new(resolver).serialize(&area);
        debug!(
            "TOC area pages {}-{}, {} node(s), {} chars",
            area.start_page,
            area.end_page,
            area.item_refs.len(),
            markdown.len()
        );

        let validator = TocContentValidator::new(
            self.client.clone(),
            self.models.content_validator.clone(),
            self.config.completion.clone(),
            self.config.toc.validation_threshold,
        );
        let checked = match validator.validate(&markdown).await {
            Ok(checked) => checked,
            Err(e) => {
                warn!("TOC plausibility check failed, trying page images: {}", e);
                return None;
            }
        };
        if let Some(usage) = checked.usage {
            tracker.record(usage);
        }
        if !validator.is_valid(&checked.result) {
            warn!(
                "TOC area rejected as {:?} (confidence {:.2}), trying page images",
                checked.result.content_type, checked.result.confidence
            );
            return None;
        }
        let valid = validator.valid_markdown(&checked.result, &markdown);
        if valid.is_none() {
            warn!("Mixed TOC area without extracted entries, trying page images");
        }
        valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::scripted::ScriptedCompletionClient;
    use crate::document::fixtures::DocBuilder;
    use crate::document::TextLabel;
    use crate::pipeline::pages::write_test_pages;
    use crate::progress::ProcessingProgressCallback;
    use crate::usage::UsageSummary;
    use serde_json::json;
    use std::sync::Mutex;

    fn toc_doc() -> ParsedDocument {
        let mut b = DocBuilder::new().pages(12);
        b.text(None, TextLabel::SectionHeader, 2, "Contents");
        b.list(
            2,
            &["1. Introduction ..... 1", "2. Methods ..... 4", "3. Results ..... 8"],
        );
        b.text(None, TextLabel::SectionHeader, 3, "1. Introduction");
        b.text(None, TextLabel::Text, 3, "Intro body.");
        b.text(None, TextLabel::Text, 6, "Methods body.");
        b.text(None, TextLabel::PageFooter, 3, "1");
        b.build()
    }

    fn script_rule_based(client: &ScriptedCompletionClient) {
        client.push(
            "toc-content-validator",
            json!({"isValid": true, "confidence": 0.95, "contentType": "pure_toc",
                   "reason": "list of chapters", "extractedTocMarkdown": null}),
        );
        client.push(
            "toc-extractor",
            json!({"entries": [
                {"title": "Introduction", "level": 1, "pageNo": 1, "children": []},
                {"title": "Methods", "level": 1, "pageNo": 4, "children": []},
                {"title": "Results", "level": 1, "pageNo": 8, "children": []}
            ]}),
        );
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
        usage_calls: Mutex<Vec<u64>>,
    }

    impl ProcessingProgressCallback for Recorder {
        fn on_stage_start(&self, stage: ProcessingStage) {
            self.events.lock().unwrap().push(format!("start:{stage}"));
        }
        fn on_usage(&self, summary: &UsageSummary) {
            self.usage_calls.lock().unwrap().push(summary.calls);
        }
    }

    #[tokio::test]
    async fn rule_based_run_assembles_chapters() {
        let client = Arc::new(ScriptedCompletionClient::new());
        script_rule_based(&client);
        let recorder = Arc::new(Recorder::default());
        let config = ProcessorConfig::builder()
            .progress_callback(recorder.clone())
            .build()
            .unwrap();
        let processor = DocumentProcessor::new(config, client.clone());
        let dir = tempfile::tempdir().unwrap();

        let result = processor.process(&toc_doc(), "r-1", dir.path()).await.unwrap();
        assert_eq!(result.toc_source, TocSource::RuleBased);
        assert_eq!(result.chapters.len(), 3);
        // Printed page 1 is PDF page 3.
        assert_eq!(result.chapters[0].pdf_page, 3);
        assert_eq!(result.chapters[1].pdf_page, 6);
        assert!(result.chapters[1].text_blocks.contains(&"Methods body.".to_string()));
        assert_eq!(result.usage.len(), 2);
        assert_eq!(client.calls_for("vision-toc-extractor").len(), 0);

        let events = recorder.events.lock().unwrap().clone();
        assert_eq!(events.len(), 5);
        assert_eq!(events[2], "start:toc-extraction");
        assert_eq!(*recorder.usage_calls.lock().unwrap(), [2]);
    }

    #[tokio::test]
    async fn missing_rule_based_toc_falls_back_to_vision() {
        let mut b = DocBuilder::new().pages(3);
        b.text(None, TextLabel::Text, 1, "Just prose, no contents.");
        let doc = b.build();
        let dir = tempfile::tempdir().unwrap();
        write_test_pages(dir.path(), 3);

        let client = Arc::new(ScriptedCompletionClient::new());
        client.push(
            "vision-toc-extractor",
            json!({"hasToc": true, "tocMarkdown": "- Only chapter ..... 1", "continuesOnNextPage": false}),
        );
        client.push(
            "toc-extractor",
            json!({"entries": [{"title": "Only chapter", "level": 1, "pageNo": 1, "children": []}]}),
        );
        let processor = DocumentProcessor::new(ProcessorConfig::default(), client.clone());
        let result = processor.process(&doc, "r-2", dir.path()).await.unwrap();

        assert_eq!(result.toc_source, TocSource::Vision);
        assert_eq!(client.calls_for("vision-toc-extractor").len(), 1);
        assert!(client.calls_for("toc-content-validator").is_empty());
        assert_eq!(result.chapters[0].text_blocks, ["Just prose, no contents."]);
    }

    #[tokio::test]
    async fn zero_entries_retry_with_vision_once() {
        let dir = tempfile::tempdir().unwrap();
        write_test_pages(dir.path(), 12);
        let client = Arc::new(ScriptedCompletionClient::new());
        client.push(
            "toc-content-validator",
            json!({"isValid": true, "confidence": 0.9, "contentType": "pure_toc",
                   "reason": "ok", "extractedTocMarkdown": null}),
        );
        client.push("toc-extractor", json!({"entries": []}));
        client.push(
            "vision-toc-extractor",
            json!({"hasToc": true, "tocMarkdown": "- A ..... 1", "continuesOnNextPage": false}),
        );
        client.push(
            "toc-extractor",
            json!({"entries": [{"title": "A", "level": 1, "pageNo": 1, "children": []}]}),
        );
        let processor = DocumentProcessor::new(ProcessorConfig::default(), client.clone());
        let result = processor.process(&toc_doc(), "r-3", dir.path()).await.unwrap();
        assert_eq!(result.toc_source, TocSource::Vision);
        assert_eq!(client.calls_for("toc-extractor").len(), 2);
    }

    #[tokio::test]
    async fn no_toc_anywhere_is_toc_not_found() {
        let mut b = DocBuilder::new().pages(2);
        b.text(None, TextLabel::Text, 1, "prose");
        let doc = b.build();
        let dir = tempfile::tempdir().unwrap();
        write_test_pages(dir.path(), 2);
        let client = Arc::new(ScriptedCompletionClient::new());
        client.push(
            "vision-toc-extractor",
            json!({"hasToc": false, "tocMarkdown": "", "continuesOnNextPage": false}),
        );
        let processor = DocumentProcessor::new(ProcessorConfig::default(), client);
        let err = processor.process(&doc, "r-4", dir.path()).await.unwrap_err();
        assert_eq!(err.kind(), "TocNotFoundError");
    }

    #[tokio::test]
    async fn cancelled_processor_aborts_before_first_stage() {
        let client = Arc::new(ScriptedCompletionClient::new());
        let processor = DocumentProcessor::new(ProcessorConfig::default(), client.clone());
        processor.cancel_handle().cancel();
        let err = processor.process(&toc_doc(), "r-5", "/tmp").await.unwrap_err();
        match err {
            ChapterError::Aborted { stage } => assert_eq!(stage, "text-normalization"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn cancellation_is_checked_between_stages() {
        struct CancelAfterToc(CancellationFlag);
        impl ProcessingProgressCallback for CancelAfterToc {
            fn on_stage_complete(&self, stage: ProcessingStage) {
                if stage == ProcessingStage::TocExtraction {
                    self.0.cancel();
                }
            }
        }

        let client = Arc::new(ScriptedCompletionClient::new());
        script_rule_based(&client);
        let flag = CancellationFlag::new();
        let config = ProcessorConfig::builder()
            .progress_callback(Arc::new(CancelAfterToc(flag.clone())))
            .build()
            .unwrap();
        let mut processor = DocumentProcessor::new(config, client.clone());
        processor.cancel = flag;

        let err = processor.process(&toc_doc(), "r-6", "/tmp").await.unwrap_err();
        assert!(matches!(err, ChapterError::Aborted { ref stage } if stage == "resource-conversion"));
        // The TOC stage ran to completion before the flag was observed.
        assert_eq!(client.call_count(), 2);
    }
}
