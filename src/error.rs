//! Error types for the edgequake-chapters library.
//!
//! Two distinct error types reflect two distinct failure boundaries:
//!
//! * [`ChapterError`] - **Fatal**: the run cannot produce a chapter tree
//!   (no TOC anywhere, TOC still invalid after every correction, cancelled,
//!   unreadable input). Returned as `Err(ChapterError)` from
//!   [`crate::processor::DocumentProcessor::process`].
//!
//! * [`CompletionError`] - a single completion call failed after the
//!   completion client exhausted its own retry budget. Stages decide whether
//!   that is fatal (TOC extraction) or recoverable (vision continuation).
//!
//! Locally recovered failures (rule-based TOC miss, plausibility rejection,
//! caption count mismatch) never surface here; they are logged with `warn!`.

use crate::toc::validation::ValidationResult;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-chapters library.
#[derive(Debug, Error)]
pub enum ChapterError {
    // ── TOC errors ────────────────────────────────────────────────────────
    /// No strategy (rule-based, vision) located a usable table of contents,
    /// or structuring produced zero entries even after the vision retry.
    #[error("Table of contents not found: {reason}")]
    TocNotFound { reason: String },

    /// TOC markdown was empty or the structuring call failed outright.
    #[error("Failed to parse table of contents: {0}")]
    TocParse(String),

    /// The structured TOC still violates structural rules after every
    /// correction attempt. Carries the last attempt's issues only.
    #[error("{}", format_validation_failure(.result))]
    TocValidation { result: ValidationResult },

    // ── Control flow ──────────────────────────────────────────────────────
    /// Cooperative cancellation was observed at a stage boundary.
    #[error("Processing aborted before stage '{stage}'")]
    Aborted { stage: String },

    // ── Caption errors ────────────────────────────────────────────────────
    /// The batched caption validation call itself failed.
    #[error("Caption validation failed: {0}")]
    CaptionValidation(String),

    // ── Input errors ──────────────────────────────────────────────────────
    /// Input document was not found at the given path.
    #[error("Document file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists but does not hold a parsed document.
    #[error("Invalid parsed document '{path}': {detail}")]
    InvalidDocument { path: PathBuf, detail: String },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// A completion call failed in a stage that cannot recover from it.
    #[error(transparent)]
    Completion(#[from] CompletionError),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (broken invariant).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure of a single schema-constrained completion call.
#[derive(Debug, Clone, Error)]
pub enum CompletionError {
    /// The provider rejected the request or the transport failed.
    #[error("provider '{model}' failed: {detail}")]
    Provider { model: String, detail: String },

    /// The model answered, but not with JSON matching the requested schema.
    #[error("model '{model}' returned output not matching schema '{schema}': {detail}")]
    InvalidOutput {
        model: String,
        schema: String,
        detail: String,
    },

    /// Primary (and fallback, if any) exhausted their attempts.
    #[error("completion for {component}/{phase} failed after {attempts} attempts: {last_error}")]
    Exhausted {
        component: String,
        phase: String,
        attempts: u32,
        last_error: String,
    },
}

impl ChapterError {
    /// Short machine-friendly name of the error kind, used in logs and the CLI.
    pub fn kind(&self) -> &'static str {
        match self {
            ChapterError::TocNotFound { .. } => "TocNotFoundError",
            ChapterError::TocParse(_) => "TocParseError",
            ChapterError::TocValidation { .. } => "TocValidationError",
            ChapterError::Aborted { .. } => "AbortError",
            ChapterError::CaptionValidation(_) => "CaptionValidationError",
            ChapterError::FileNotFound { .. }
            | ChapterError::PermissionDenied { .. }
            | ChapterError::InvalidDocument { .. } => "InputError",
            ChapterError::ProviderNotConfigured { .. } | ChapterError::Completion(_) => {
                "CompletionError"
            }
            ChapterError::OutputWriteFailed { .. } => "OutputError",
            ChapterError::InvalidConfig(_) => "ConfigError",
            ChapterError::Internal(_) => "InternalError",
        }
    }
}

fn format_validation_failure(result: &ValidationResult) -> String {
    let mut msg = format!(
        "TOC validation failed with {} error(s)",
        result.error_count
    );
    for issue in result.issues.iter().take(5) {
        msg.push_str(&format!(
            "\n  [{}] {} (at {})",
            issue.code, issue.message, issue.path
        ));
    }
    if result.issues.len() > 5 {
        msg.push_str(&format!("\n  … and {} more", result.issues.len() - 5));
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toc::types::TocEntry;
    use crate::toc::validation::{ValidationIssue, ValidationRule};

    #[test]
    fn toc_not_found_display() {
        let e = ChapterError::TocNotFound {
            reason: "vision search found nothing".into(),
        };
        assert!(e.to_string().contains("vision search found nothing"));
        assert_eq!(e.kind(), "TocNotFoundError");
    }

    #[test]
    fn toc_validation_display_lists_issues() {
        let entry = TocEntry::new("Chapter 2", 1, 3);
        let result = ValidationResult::from_issues(vec![ValidationIssue::new(
            ValidationRule::PageOrder,
            "page 3 comes before previous sibling page 10",
            "[1]",
            &entry,
        )]);
        let e = ChapterError::TocValidation { result };
        let msg = e.to_string();
        assert!(msg.contains("1 error"), "got: {msg}");
        assert!(msg.contains("V001"), "got: {msg}");
    }

    #[test]
    fn aborted_display() {
        let e = ChapterError::Aborted {
            stage: "toc-extraction".into(),
        };
        assert!(e.to_string().contains("toc-extraction"));
        assert_eq!(e.kind(), "AbortError");
    }

    #[test]
    fn completion_error_converts() {
        let e: ChapterError = CompletionError::Provider {
            model: "gpt-4.1-nano".into(),
            detail: "429".into(),
        }
        .into();
        assert_eq!(e.kind(), "CompletionError");
        assert!(e.to_string().contains("gpt-4.1-nano"));
    }
}
