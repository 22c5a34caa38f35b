//! # edgequake-chapters
//!
//! Turn a parsed document (Docling-style JSON) into a chapter tree whose
//! chapters start on the right PDF page, with every text block, image, table
//! and footnote attached to the chapter it belongs to.
//!
//! ## Why this crate?
//!
//! Layout parsers give you texts, tables and pictures with page numbers, but
//! no chapters. The table of contents has them, yet it lists *printed* page
//! numbers, is often a list or a table or just a picture, and sometimes is
//! not recognised as a TOC at all. This crate finds it (structure first,
//! page images second), has an LLM structure it into a validated forest,
//! and maps printed pages back to PDF pages.
//!
//! ## Pipeline Overview
//!
//! ```text
//! ParsedDocument
//!  │
//!  ├─ 1. Normalize   clean texts, split body / furniture / footnotes
//!  ├─ 2. Pages       printed page numbers from headers and footers
//!  ├─ 3. TOC         rule-based locator → plausibility → vision fallback
//!  │                 → structured extraction with validation feedback
//!  ├─ 4. Resources   images ∥ tables with LLM caption parsing, footnotes
//!  └─ 5. Chapters    content attached to the deepest open chapter
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_chapters::{load_document, DocumentProcessor, ProcessorConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider picked from EDGEQUAKE_LLM_PROVIDER / OPENAI_API_KEY etc.
//!     let config = ProcessorConfig::default();
//!     let processor = DocumentProcessor::with_llm(config)?;
//!     let doc = load_document("out/report.json").await?;
//!     let result = processor.process(&doc, "report-1", "out").await?;
//!     result.write_json("out/chapters.json").await?;
//!     eprintln!("{} chapters, {} tokens",
//!         result.chapters.len(),
//!         result.usage_summary().total_tokens);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `chapters` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `test-util` | off | Exports `ScriptedCompletionClient`, an in-memory client for tests |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-chapters = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod caption;
pub mod completion;
pub mod config;
pub mod document;
pub mod error;
pub mod ids;
pub mod output;
pub mod pipeline;
pub mod processor;
pub mod progress;
pub mod prompts;
pub mod toc;
pub mod usage;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use caption::{Caption, ResourceKind};
pub use completion::provider::LlmCompletionClient;
#[cfg(any(test, feature = "test-util"))]
pub use completion::scripted::{RecordedCall, ScriptedCompletionClient};
pub use completion::{CompletionClient, CompletionRequest, RawCompletion};
pub use config::{
    CaptionConfig, CompletionConfig, ModelBinding, ModelSpec, ModelsConfig, ProcessorConfig,
    ProcessorConfigBuilder, ResolvedModels, Stage, TocConfig, VisionConfig,
};
pub use document::ParsedDocument;
pub use error::{ChapterError, CompletionError};
pub use ids::{IdAllocator, IdKind};
pub use output::{Chapter, Footnote, ImageResource, ProcessingResult, TableResource};
pub use pipeline::input::load_document;
pub use pipeline::page_range::PageRange;
pub use processor::{CancellationFlag, DocumentProcessor};
pub use progress::{NoopProgressCallback, ProcessingProgressCallback, ProcessingStage, ProgressCallback};
pub use toc::{TocEntry, TocSource};
pub use usage::{ModelRole, UsageRecord, UsageSummary, UsageTracker};
