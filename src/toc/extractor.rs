//! Structured TOC extraction with a bounded correction loop.
//!
//! ```text
//! Attempt{0} ──call──▶ normalize ──validate──┬─ valid / empty / disabled ─▶ Accept
//!                                            ├─ invalid, n < max ─────────▶ Attempt{n+1, prior entries, prior issues}
//!                                            └─ invalid, n = max ─────────▶ Exhausted(last result)
//! ```
//!
//! Attempt 0 is tagged `extraction`, attempt n ≥ 1 is tagged `correction-n`
//! and sees the previous tree together with the rules it broke.

use super::types::{normalize_entries, TocEntry};
use super::validation::{TocValidator, ValidationIssue, ValidationOptions, ValidationResult};
use crate::completion::{complete_structured, CompletionClient, CompletionRequest, OutputSchema};
use crate::config::{CompletionConfig, ModelBinding, TocConfig};
use crate::error::ChapterError;
use crate::prompts::{toc_correction_user_prompt, toc_extraction_user_prompt, TOC_EXTRACTION_SYSTEM_PROMPT};
use crate::usage::{UsageRecord, UsageTracker};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const COMPONENT: &str = "toc-extractor";

#[derive(Debug, Deserialize)]
struct ExtractionOutput {
    entries: Vec<TocEntry>,
}

fn schema() -> OutputSchema {
    OutputSchema::of::<ExtractionOutput>(
        "toc_entries",
        json!({
            "type": "object",
            "properties": {
                "entries": {"type": "array", "items": {"$ref": "#/$defs/entry"}}
            },
            "required": ["entries"],
            "$defs": {
                "entry": {
                    "type": "object",
                    "properties": {
                        "title": {"type": "string"},
                        "level": {"type": "integer", "minimum": 1},
                        "pageNo": {"type": "integer", "minimum": 1},
                        "children": {"type": "array", "items": {"$ref": "#/$defs/entry"}}
                    },
                    "required": ["title", "level", "pageNo", "children"]
                }
            }
        }),
    )
}

/// Entries plus the usage of every call made to get them.
#[derive(Debug, Clone)]
pub struct ExtractResult {
    pub entries: Vec<TocEntry>,
    pub usages: Vec<UsageRecord>,
}

/// One pass through the loop. `n == 0` is the initial extraction.
#[derive(Debug, Clone, Default)]
pub(crate) struct Attempt {
    pub n: u32,
    pub prior_entries: Vec<TocEntry>,
    pub prior_issues: Vec<ValidationIssue>,
}

impl Attempt {
    fn phase(&self) -> String {
        if self.n == 0 {
            "extraction".to_string()
        } else {
            format!("correction-{}", self.n)
        }
    }
}

#[derive(Debug)]
pub(crate) enum Transition {
    Accept(Vec<TocEntry>),
    NextAttempt(Attempt),
    Exhausted(ValidationResult),
}

/// `validation` is `None` when the tree was not validated (disabled or empty).
pub(crate) fn next_step(
    attempt: &Attempt,
    entries: Vec<TocEntry>,
    validation: Option<ValidationResult>,
    max_retries: u32,
) -> Transition {
    match validation {
        None => Transition::Accept(entries),
        Some(result) if result.valid => Transition::Accept(entries),
        Some(result) if attempt.n >= max_retries => Transition::Exhausted(result),
        Some(result) => Transition::NextAttempt(Attempt {
            n: attempt.n + 1,
            prior_entries: entries,
            prior_issues: result.issues,
        }),
    }
}

pub struct TocExtractor {
    client: Arc<dyn CompletionClient>,
    binding: ModelBinding,
    params: CompletionConfig,
    validator: Option<TocValidator>,
    max_validation_retries: u32,
    tracker: UsageTracker,
}

impl TocExtractor {
    /// `total_pages` bounds V002/V007; pass `None` when unknown.
    pub fn new(
        client: Arc<dyn CompletionClient>,
        binding: ModelBinding,
        params: CompletionConfig,
        toc: &TocConfig,
        total_pages: Option<u32>,
        tracker: UsageTracker,
    ) -> Self {
        let validator = toc.validate_structure.then(|| {
            TocValidator::new(ValidationOptions {
                total_pages,
                max_title_length: toc.max_title_length,
                first_entry_max_ratio: toc.first_entry_max_ratio,
            })
        });
        Self {
            client,
            binding,
            params,
            validator,
            max_validation_retries: toc.max_validation_retries,
            tracker,
        }
    }

    pub async fn extract(&self, markdown: &str) -> Result<ExtractResult, ChapterError> {
        if markdown.trim().is_empty() {
            return Err(ChapterError::TocParse("TOC markdown is empty".to_string()));
        }

        let mut usages = Vec::new();
        let mut attempt = Attempt::default();
        loop {
            let entries = self.call_model(markdown, &attempt, &mut usages).await?;
            let validation = match &self.validator {
                Some(v) if !entries.is_empty() => Some(v.validate(&entries)),
                _ => None,
            };
            if let Some(result) = validation.as_ref().filter(|r| !r.valid) {
                warn!(
                    "TOC attempt {} failed validation with {} issue(s)",
                    attempt.n, result.error_count
                );
            }
            match next_step(&attempt, entries, validation, self.max_validation_retries) {
                Transition::Accept(entries) => {
                    info!(
                        "TOC extracted: {} top-level entries after {} attempt(s)",
                        entries.len(),
                        attempt.n + 1
                    );
                    return Ok(ExtractResult { entries, usages });
                }
                Transition::NextAttempt(next) => attempt = next,
                Transition::Exhausted(result) => return Err(ChapterError::TocValidation { result }),
            }
        }
    }

    async fn call_model(
        &self,
        markdown: &str,
        attempt: &Attempt,
        usages: &mut Vec<UsageRecord>,
    ) -> Result<Vec<TocEntry>, ChapterError> {
        let user_prompt = if attempt.n == 0 {
            toc_extraction_user_prompt(markdown)
        } else {
            toc_correction_user_prompt(attempt.n, markdown, &attempt.prior_entries, &attempt.prior_issues)
        };
        let phase = attempt.phase();
        debug!("TOC {} call", phase);
        let request = CompletionRequest::text(
            schema(),
            TOC_EXTRACTION_SYSTEM_PROMPT,
            user_prompt,
            &self.binding,
            &self.params,
        )
        .tagged(COMPONENT, &phase);

        let out = complete_structured::<ExtractionOutput>(self.client.as_ref(), request)
            .await
            .map_err(|e| ChapterError::TocParse(format!("{phase} failed: {e}")))?;
        self.tracker.record(out.usage.clone());
        usages.push(out.usage);
        Ok(normalize_entries(out.output.entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::scripted::ScriptedCompletionClient;
    use crate::config::ModelSpec;
    use serde_json::Value;

    fn extractor(client: Arc<ScriptedCompletionClient>, toc: TocConfig) -> TocExtractor {
        TocExtractor::new(
            client,
            ModelBinding::single(ModelSpec::default()),
            CompletionConfig::default(),
            &toc,
            Some(100),
            UsageTracker::new(),
        )
    }

    fn entry(title: &str, level: u32, page: u32) -> Value {
        json!({"title": title, "level": level, "pageNo": page, "children": []})
    }

    fn invalid_tree(last_title: &str) -> Value {
        json!({"entries": [entry("Chapter 1", 1, 10), entry(last_title, 1, 3)]})
    }

    #[tokio::test]
    async fn two_chapter_scenario() {
        let client = Arc::new(ScriptedCompletionClient::new());
        client.push(
            COMPONENT,
            json!({"entries": [entry("Chapter 1", 1, 1), entry("Chapter 2", 1, 10)]}),
        );
        let ex = extractor(client.clone(), TocConfig::default());
        let out = ex.extract("- Chapter 1 ..... 1\n- Chapter 2 ..... 10").await.unwrap();
        assert_eq!(out.entries.len(), 2);
        assert_eq!(out.entries[0].page_no, 1);
        assert_eq!(out.usages.len(), 1);
        assert_eq!(out.usages[0].phase, "extraction");
        assert_eq!(ex.tracker.len(), 1);
    }

    #[tokio::test]
    async fn empty_markdown_is_a_parse_error() {
        let client = Arc::new(ScriptedCompletionClient::new());
        let ex = extractor(client.clone(), TocConfig::default());
        let err = ex.extract("   ").await.unwrap_err();
        assert!(matches!(err, ChapterError::TocParse(_)));
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn completion_failure_is_a_parse_error() {
        let client = Arc::new(ScriptedCompletionClient::new());
        client.push_error(COMPONENT, "503");
        let ex = extractor(client, TocConfig::default());
        let err = ex.extract("- A ... 1").await.unwrap_err();
        assert_eq!(err.kind(), "TocParseError");
    }

    #[tokio::test]
    async fn levels_are_normalized() {
        let client = Arc::new(ScriptedCompletionClient::new());
        client.push(
            COMPONENT,
            json!({"entries": [{"title": " Part I ", "level": 4, "pageNo": 1,
                "children": [entry("1.1", 9, 2)]}]}),
        );
        let ex = extractor(client, TocConfig::default());
        let out = ex.extract("- Part I ... 1").await.unwrap();
        assert_eq!(out.entries[0].title, "Part I");
        assert_eq!(out.entries[0].level, 1);
        assert_eq!(out.entries[0].children[0].level, 2);
    }

    #[tokio::test]
    async fn correction_feeds_issues_back() {
        let client = Arc::new(ScriptedCompletionClient::new());
        client.push(COMPONENT, invalid_tree("Chapter 2"));
        client.push(
            COMPONENT,
            json!({"entries": [entry("Chapter 1", 1, 10), entry("Chapter 2", 1, 30)]}),
        );
        let ex = extractor(client.clone(), TocConfig::default());
        let out = ex.extract("- Chapter 1 ... 10\n- Chapter 2 ... 30").await.unwrap();
        assert_eq!(out.entries[1].page_no, 30);

        let phases: Vec<_> = out.usages.iter().map(|u| u.phase.as_str()).collect();
        assert_eq!(phases, ["extraction", "correction-1"]);
        let calls = client.calls();
        assert!(calls[1].user_text.contains("[V001]"));
        assert!(calls[1].user_text.contains("Correction attempt 1"));
    }

    #[tokio::test]
    async fn retries_are_bounded_and_report_last_attempt() {
        let client = Arc::new(ScriptedCompletionClient::new());
        for title in ["a", "b", "c", "last"] {
            client.push(COMPONENT, invalid_tree(title));
        }
        client.push(COMPONENT, json!({"entries": [entry("never", 1, 1)]}));
        let ex = extractor(client.clone(), TocConfig::default());
        let err = ex.extract("- x ... 1").await.unwrap_err();

        assert_eq!(client.call_count(), 4);
        assert_eq!(client.calls()[3].phase, "correction-3");
        match err {
            ChapterError::TocValidation { result } => {
                assert!(result.has_code("V001"));
                assert_eq!(result.issues[0].entry.title, "last");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(ex.tracker.len(), 4);
    }

    #[tokio::test]
    async fn disabled_validation_accepts_first_result() {
        let client = Arc::new(ScriptedCompletionClient::new());
        client.push(COMPONENT, invalid_tree("Chapter 2"));
        let toc = TocConfig {
            validate_structure: false,
            ..Default::default()
        };
        let ex = extractor(client.clone(), toc);
        let out = ex.extract("- x ... 1").await.unwrap();
        assert_eq!(out.entries.len(), 2);
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn zero_entries_are_accepted_without_validation() {
        let client = Arc::new(ScriptedCompletionClient::new());
        client.push(COMPONENT, json!({"entries": []}));
        let ex = extractor(client.clone(), TocConfig::default());
        let out = ex.extract("List of figures").await.unwrap();
        assert!(out.entries.is_empty());
        assert_eq!(client.call_count(), 1);
    }

    #[test]
    fn transition_table() {
        let invalid = ValidationResult::from_issues(vec![ValidationIssue::new(
            crate::toc::validation::ValidationRule::PageOrder,
            "x",
            "[1]",
            &TocEntry::new("b", 1, 1),
        )]);
        let a0 = Attempt::default();
        assert!(matches!(next_step(&a0, vec![], None, 3), Transition::Accept(_)));
        assert!(matches!(
            next_step(&a0, vec![], Some(ValidationResult::from_issues(vec![])), 3),
            Transition::Accept(_)
        ));
        match next_step(&a0, vec![TocEntry::new("b", 1, 1)], Some(invalid.clone()), 3) {
            Transition::NextAttempt(next) => {
                assert_eq!(next.n, 1);
                assert_eq!(next.phase(), "correction-1");
                assert_eq!(next.prior_entries.len(), 1);
                assert_eq!(next.prior_issues.len(), 1);
            }
            other => panic!("unexpected transition: {other:?}"),
        }
        let a3 = Attempt {
            n: 3,
            ..Default::default()
        };
        assert!(matches!(next_step(&a3, vec![], Some(invalid), 3), Transition::Exhausted(_)));
        assert_eq!(a0.phase(), "extraction");
    }
}
