//! Progress-callback trait for controller stage events.
//!
//! Inject an [`Arc<dyn ProcessingProgressCallback>`] via
//! [`crate::config::ProcessorConfigBuilder::progress_callback`] to receive
//! events as the controller moves through its stages, plus a cumulative
//! token-usage snapshot after every stage that issued completion calls.
//!
//! # Example
//!
//! ```rust
//! use edgequake_chapters::{ProcessingProgressCallback, ProcessingStage, ProcessorConfig, UsageSummary};
//! use std::sync::{Arc, atomic::{AtomicU64, Ordering}};
//!
//! struct TokenMeter {
//!     total: AtomicU64,
//! }
//!
//! impl ProcessingProgressCallback for TokenMeter {
//!     fn on_usage(&self, summary: &UsageSummary) {
//!         self.total.store(summary.total_tokens, Ordering::SeqCst);
//!     }
//! }
//!
//! let meter = Arc::new(TokenMeter { total: AtomicU64::new(0) });
//! let config = ProcessorConfig::builder()
//!     .progress_callback(meter as Arc<dyn ProcessingProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::usage::UsageSummary;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Controller stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessingStage {
    TextNormalization,
    PageRangeResolution,
    TocExtraction,
    ResourceConversion,
    ChapterAssembly,
}

impl ProcessingStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStage::TextNormalization => "text-normalization",
            ProcessingStage::PageRangeResolution => "page-range-resolution",
            ProcessingStage::TocExtraction => "toc-extraction",
            ProcessingStage::ResourceConversion => "resource-conversion",
            ProcessingStage::ChapterAssembly => "chapter-assembly",
        }
    }
}

impl fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Called by the controller as it moves through its stages.
///
/// Implementations must be `Send + Sync`: image and table conversion run
/// concurrently and the callback is shared through an `Arc`. All methods
/// have default no-op implementations.
pub trait ProcessingProgressCallback: Send + Sync {
    /// Called before a stage starts.
    fn on_stage_start(&self, stage: ProcessingStage) {
        let _ = stage;
    }

    /// Called after a stage finished successfully.
    fn on_stage_complete(&self, stage: ProcessingStage) {
        let _ = stage;
    }

    /// Cumulative usage after a stage that issued completion calls.
    fn on_usage(&self, summary: &UsageSummary) {
        let _ = summary;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ProcessingProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ProcessorConfig`].
pub type ProgressCallback = Arc<dyn ProcessingProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl ProcessingProgressCallback for Recorder {
        fn on_stage_start(&self, stage: ProcessingStage) {
            self.events.lock().unwrap().push(format!("start:{stage}"));
        }

        fn on_stage_complete(&self, stage: ProcessingStage) {
            self.events.lock().unwrap().push(format!("done:{stage}"));
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_stage_start(ProcessingStage::TocExtraction);
        cb.on_stage_complete(ProcessingStage::TocExtraction);
        cb.on_usage(&UsageSummary::default());
    }

    #[test]
    fn recorder_receives_events_in_order() {
        let rec = Recorder::default();
        rec.on_stage_start(ProcessingStage::TextNormalization);
        rec.on_stage_complete(ProcessingStage::TextNormalization);
        let events = rec.events.lock().unwrap();
        assert_eq!(
            *events,
            vec!["start:text-normalization", "done:text-normalization"]
        );
    }

    #[test]
    fn stage_serializes_kebab_case() {
        let s = serde_json::to_string(&ProcessingStage::ChapterAssembly).unwrap();
        assert_eq!(s, "\"chapter-assembly\"");
    }
}
