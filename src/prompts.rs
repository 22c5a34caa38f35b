//! Prompts for every completion-calling stage.
//!
//! Centralising prompts here keeps the stage modules focused on control flow
//! and lets unit tests inspect prompt text directly without a model.
//! Output shapes are not described here; each stage attaches its own JSON
//! schema to the request.

use crate::toc::types::TocEntry;
use crate::toc::validation::ValidationIssue;

// ── Content plausibility ─────────────────────────────────────────────────

pub const CONTENT_VALIDATION_SYSTEM_PROMPT: &str = r#"You review text that a rule-based detector believes is the table of contents (TOC) of a document.

Classify the text into exactly one content type:
- "pure_toc": only table-of-contents entries of the main document (chapter/section titles with page numbers)
- "mixed": TOC entries of the main document mixed with other material (lists of figures/tables, body text, headers)
- "resource_only": only a list of figures, tables, photos or drawings, no main-document entries
- "invalid": not a table of contents at all

Rules:
1. isValid is true only for "pure_toc" and "mixed".
2. confidence is your certainty in the classification, between 0 and 1.
3. For "mixed", put ONLY the main-document TOC entries into extractedTocMarkdown, preserving their order,
   hierarchy (indentation) and page numbers exactly as written. For every other type set it to null.
4. reason is one short sentence explaining the decision."#;

pub fn content_validation_user_prompt(markdown: &str) -> String {
    format!("Text to classify:\n\n\"\"\"\n{markdown}\n\"\"\"")
}

// ── Structured TOC extraction ────────────────────────────────────────────

pub const TOC_EXTRACTION_SYSTEM_PROMPT: &str = r#"You convert a document's table of contents (given as markdown) into a JSON tree.

Rules:
1. Every entry has: title (exact text, without leader dots and without the page number), level, pageNo, children.
2. pageNo is the page number printed next to the entry, as an integer. Convert Roman numerals (i, ii, iv …) to integers.
3. Nest sub-sections under their parent section in children. Use numbering (1, 1.1, 1.1.1), indentation
   and typography to decide the hierarchy. Top-level entries have level 1, their children level 2, and so on.
4. Keep entries in document order. Do not invent entries and do not drop any.
5. Skip lists of figures, lists of tables and similar resource indexes.
6. If the text contains no table-of-contents entries, return an empty entries array."#;

pub fn toc_extraction_user_prompt(markdown: &str) -> String {
    format!("Table of contents:\n\n\"\"\"\n{markdown}\n\"\"\"")
}

/// Failure modes the correction prompt reminds the model of.
pub const COMMON_TOC_MISTAKES: &str = r#"Common mistakes to check:
- Hierarchy confusion: a numbered sub-section (e.g. "2.3") placed at the top level, or a chapter nested under the previous chapter.
- Page misreads: Roman numerals (front matter) mixed with Arabic page numbers, or digits merged with the title or leader dots.
- Page order: within one list of siblings, page numbers must never decrease, and a child never starts before its parent."#;

/// Correction prompt for attempt `attempt` (1-based) after validation failed.
pub fn toc_correction_user_prompt(
    attempt: u32,
    markdown: &str,
    previous: &[TocEntry],
    issues: &[ValidationIssue],
) -> String {
    let mut issue_lines = String::new();
    for issue in issues {
        let entry = serde_json::to_string(&issue.entry).unwrap_or_default();
        issue_lines.push_str(&format!(
            "- [{}] {} at {} - entry: {}\n",
            issue.code, issue.message, issue.path, entry
        ));
    }
    let previous_json = serde_json::to_string_pretty(previous).unwrap_or_else(|_| "[]".into());
    format!(
        "Correction attempt {attempt}. Your previous result violated these structural rules:\n\
{issue_lines}\n\
{COMMON_TOC_MISTAKES}\n\n\
Original table of contents:\n\"\"\"\n{markdown}\n\"\"\"\n\n\
Your previous result:\n{previous_json}\n\n\
Return the complete corrected tree, not only the changed entries."
    )
}

// ── Vision TOC search ────────────────────────────────────────────────────

pub const VISION_TOC_SYSTEM_PROMPT: &str = r#"You are given consecutive page images from the beginning of a document.

Find the document's table of contents (TOC) among them.
1. hasToc is true only if at least one image shows main-document TOC entries (titles with page numbers).
   Lists of figures or tables alone do not count.
2. tocMarkdown reproduces every TOC entry you can see as a markdown list, one entry per line,
   indenting sub-entries by two spaces, keeping the printed page number at the end of each line
   (e.g. "- 1. Introduction ..... 1"). Use an empty string if hasToc is false.
3. continuesOnNextPage is true if the TOC runs to the last image and likely continues beyond it."#;

pub fn vision_first_batch_prompt(start_page: u32, end_page: u32) -> String {
    format!("These are pages {start_page} to {end_page}. Locate the table of contents.")
}

pub fn vision_continuation_prompt(start_page: u32, end_page: u32) -> String {
    format!(
        "These are pages {start_page} to {end_page}. They follow a table of contents that ended on the previous page. \
Extract only the TOC entries that continue on these pages; set hasToc to false if the TOC does not continue."
    )
}

// ── Captions ─────────────────────────────────────────────────────────────

pub const CAPTION_PARSE_SYSTEM_PROMPT: &str = r#"You split figure and table captions into their label and full text.

For every input caption return one object, in the same order as the input:
- fullText: the caption text exactly as given
- num: the label prefix with its index as printed (e.g. "Figure 1", "Fig. 2-3", "Table 4", "그림 1", "표 2", "図3"),
  or null if the caption has no recognizable label

Return exactly as many objects as there are input captions."#;

pub fn caption_parse_user_prompt(resource_type: &str, captions: &[String]) -> String {
    let mut s = format!("Resource type: {resource_type}\nCaptions:\n");
    for (i, c) in captions.iter().enumerate() {
        s.push_str(&format!("{}. {}\n", i + 1, c));
    }
    s
}

pub const CAPTION_VALIDATION_SYSTEM_PROMPT: &str = r#"You verify caption parses.

For each item you get the original caption text and a parse { fullText, num }. An item is valid when:
1. fullText matches the original text (whitespace differences are fine).
2. num is the label prefix actually printed at the start of the caption (e.g. "Figure 3"), or null when there is none.

Return one boolean per item, in input order."#;

pub fn caption_validation_user_prompt(items: &[(String, String, Option<String>)]) -> String {
    let mut s = String::from("Items:\n");
    for (i, (original, full, num)) in items.iter().enumerate() {
        s.push_str(&format!(
            "{}. original: {:?} | fullText: {:?} | num: {}\n",
            i + 1,
            original,
            full,
            num.as_deref().map(|n| format!("{n:?}")).unwrap_or_else(|| "null".into())
        ));
    }
    s
}
