//! Structural validation of an extracted TOC forest.
//!
//! | Code | Rule |
//! |------|------|
//! | V001 | sibling page numbers are non-decreasing |
//! | V002 | page number within `1..=total_pages` |
//! | V003 | title is not empty |
//! | V004 | title no longer than `max_title_length` |
//! | V005 | child does not start before its parent |
//! | V006 | no two siblings share `(title, page_no)` |
//! | V007 | first entry starts within `first_entry_max_ratio` of the document |

use super::types::TocEntry;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValidationRule {
    PageOrder,
    PageRange,
    EmptyTitle,
    TitleLength,
    ChildBeforeParent,
    Duplicate,
    FirstEntryTooLate,
}

impl ValidationRule {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationRule::PageOrder => "V001",
            ValidationRule::PageRange => "V002",
            ValidationRule::EmptyTitle => "V003",
            ValidationRule::TitleLength => "V004",
            ValidationRule::ChildBeforeParent => "V005",
            ValidationRule::Duplicate => "V006",
            ValidationRule::FirstEntryTooLate => "V007",
        }
    }
}

impl fmt::Display for ValidationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// One rule violation, with the offending entry (children stripped).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub code: String,
    pub message: String,
    pub path: String,
    pub entry: TocEntry,
}

impl ValidationIssue {
    pub fn new(
        rule: ValidationRule,
        message: impl Into<String>,
        path: impl Into<String>,
        entry: &TocEntry,
    ) -> Self {
        Self {
            code: rule.code().to_string(),
            message: message.into(),
            path: path.into(),
            entry: TocEntry::new(entry.title.clone(), entry.level, entry.page_no),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub valid: bool,
    pub error_count: usize,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn from_issues(issues: Vec<ValidationIssue>) -> Self {
        Self {
            valid: issues.is_empty(),
            error_count: issues.len(),
            issues,
        }
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.issues.iter().any(|i| i.code == code)
    }
}

#[derive(Debug, Clone)]
pub struct ValidationOptions {
    /// Document page count; `None` skips the upper bound of V002 and V007.
    pub total_pages: Option<u32>,
    pub max_title_length: usize,
    pub first_entry_max_ratio: f32,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            total_pages: None,
            max_title_length: 200,
            first_entry_max_ratio: 0.3,
        }
    }
}

pub struct TocValidator {
    options: ValidationOptions,
}

impl TocValidator {
    pub fn new(options: ValidationOptions) -> Self {
        Self { options }
    }

    pub fn validate(&self, entries: &[TocEntry]) -> ValidationResult {
        let mut issues = Vec::new();
        self.check_first_entry(entries, &mut issues);
        self.check_siblings(entries, None, "", &mut issues);
        ValidationResult::from_issues(issues)
    }

    fn check_first_entry(&self, entries: &[TocEntry], issues: &mut Vec<ValidationIssue>) {
        let (Some(total), Some(first)) = (self.options.total_pages, entries.first()) else {
            return;
        };
        if total == 0 {
            return;
        }
        let limit = (total as f32 * self.options.first_entry_max_ratio).ceil() as u32;
        if first.page_no > limit.max(1) {
            issues.push(ValidationIssue::new(
                ValidationRule::FirstEntryTooLate,
                format!(
                    "first entry starts on page {} but a {}-page document should start by page {}",
                    first.page_no, total, limit
                ),
                "[0]",
                first,
            ));
        }
    }

    fn check_siblings(
        &self,
        siblings: &[TocEntry],
        parent: Option<&TocEntry>,
        prefix: &str,
        issues: &mut Vec<ValidationIssue>,
    ) {
        let mut seen: HashSet<(&str, u32)> = HashSet::new();
        let mut prev: Option<&TocEntry> = None;

        for (i, entry) in siblings.iter().enumerate() {
            let path = if prefix.is_empty() {
                format!("[{i}]")
            } else {
                format!("{prefix}.children[{i}]")
            };
            let title = entry.title.trim();

            if title.is_empty() {
                issues.push(ValidationIssue::new(
                    ValidationRule::EmptyTitle,
                    "title is empty",
                    &path,
                    entry,
                ));
            } else if title.chars().count() > self.options.max_title_length {
                issues.push(ValidationIssue::new(
                    ValidationRule::TitleLength,
                    format!(
                        "title has {} characters (max {})",
                        title.chars().count(),
                        self.options.max_title_length
                    ),
                    &path,
                    entry,
                ));
            }

            let out_of_range = entry.page_no < 1
                || self.options.total_pages.is_some_and(|t| t > 0 && entry.page_no > t);
            if out_of_range {
                issues.push(ValidationIssue::new(
                    ValidationRule::PageRange,
                    match self.options.total_pages {
                        Some(t) => format!("page {} is outside 1..={}", entry.page_no, t),
                        None => format!("page {} is not a valid page number", entry.page_no),
                    },
                    &path,
                    entry,
                ));
            }

            if let Some(p) = prev {
                if entry.page_no < p.page_no {
                    issues.push(ValidationIssue::new(
                        ValidationRule::PageOrder,
                        format!(
                            "page {} comes before previous sibling \"{}\" on page {}",
                            entry.page_no, p.title, p.page_no
                        ),
                        &path,
                        entry,
                    ));
                }
            }

            if let Some(parent) = parent {
                if entry.page_no < parent.page_no {
                    issues.push(ValidationIssue::new(
                        ValidationRule::ChildBeforeParent,
                        format!(
                            "child starts on page {} before parent \"{}\" on page {}",
                            entry.page_no, parent.title, parent.page_no
                        ),
                        &path,
                        entry,
                    ));
                }
            }

            if !seen.insert((title, entry.page_no)) {
                issues.push(ValidationIssue::new(
                    ValidationRule::Duplicate,
                    format!("duplicate sibling \"{}\" on page {}", title, entry.page_no),
                    &path,
                    entry,
                ));
            }

            self.check_siblings(&entry.children, Some(entry), &path, issues);
            prev = Some(entry);
        }
    }
}
