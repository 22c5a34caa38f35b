//! Rule-based TOC area search.
//!
//! Two stages, first match wins:
//!
//! 1. **Keyword search** - a short text such as "Contents" / "목차" / "目次"
//!    within the first `max_search_pages` pages. The smallest list/group or
//!    table enclosing it is the candidate; when the heading sits directly in
//!    the body, the first container following it is used instead.
//! 2. **Structural scoring** - every list/group and table in the page window
//!    that looks like a TOC is scored; the highest score wins.
//!
//! The winner is then expanded over consecutive pages in both directions,
//! pulling in containers that carry a continuation marker or independently
//! look like a TOC, until a page yields nothing new.

use crate::document::{Node, RefResolver, TableItem, TableLabel};
use crate::error::ChapterError;
use crate::toc::types::TocAreaResult;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

static RE_TOC_KEYWORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(?:table\s+of\s+contents|contents|목\s*차|차\s*례|目\s*次|目\s*录|目\s*錄|inhaltsverzeichnis|inhalt|sommaire|table\s+des\s+mati[èe]res|[íi]ndice|contenido|содержание|оглавление)\s*[:：]?\s*$",
    )
    .unwrap()
});

static RE_CONTINUATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[(\[（]\s*(?:continued|cont'?d?\.?|suite|fortsetzung|계\s*속|続き|続|续|續)\s*[)\]）]")
        .unwrap()
});

static RE_TRAILING_PAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?:(?:[.…·・‥_\-]{2,}|\s)\s*\d{1,4}|(?:[.…·・‥_\-]{2,}|…)\s*(?:[ivxlcdm]{1,7}|[IVXLCDM]{1,7}))\s*$",
    )
    .unwrap()
});

static RE_NUMERIC_CELL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*\d{1,4}\s*$").unwrap());

/// Minimum number of entries a container needs to look like a TOC.
const MIN_TOC_ROWS: usize = 3;

/// Bonus for tables the parser already labelled as a document index.
const DOCUMENT_INDEX_BONUS: i64 = 50;

pub fn is_toc_keyword(text: &str) -> bool {
    RE_TOC_KEYWORD.is_match(text)
}

pub fn has_continuation_marker(text: &str) -> bool {
    RE_CONTINUATION.is_match(text)
}

pub fn ends_with_page_number(text: &str) -> bool {
    RE_TRAILING_PAGE.is_match(text.trim_end())
}

pub struct TocAreaLocator<'a> {
    resolver: RefResolver<'a>,
    max_search_pages: u32,
}

impl<'a> TocAreaLocator<'a> {
    pub fn new(resolver: RefResolver<'a>, max_search_pages: u32) -> Self {
        Self {
            resolver,
            max_search_pages: max_search_pages.max(1),
        }
    }

    /// Locate the TOC area, or `TocNotFound` if neither stage finds a candidate.
    pub fn find(&self) -> Result<TocAreaResult, ChapterError> {
        let (candidate, strategy) = match self.find_by_keyword() {
            Some(node) => (node, "keyword"),
            None => match self.find_by_structure() {
                Some(node) => (node, "structure"),
                None => {
                    return Err(ChapterError::TocNotFound {
                        reason: format!(
                            "no TOC keyword or TOC-like list/table in the first {} pages",
                            self.max_search_pages
                        ),
                    })
                }
            },
        };

        let page = self.resolver.page_of(&candidate).unwrap_or(1);
        let area = self.expand(candidate.self_ref().to_string(), page);
        info!(
            "TOC area found by {} search: {} node(s), pages {}-{}",
            strategy,
            area.item_refs.len(),
            area.start_page,
            area.end_page
        );
        Ok(area)
    }

    fn in_window(&self, node: &Node<'a>) -> Option<u32> {
        self.resolver
            .page_of(node)
            .filter(|p| *p >= 1 && *p <= self.max_search_pages)
    }

    // ── Stage 1: keyword ─────────────────────────────────────────────────

    fn find_by_keyword(&self) -> Option<Node<'a>> {
        let doc = self.resolver.document();
        for text in &doc.texts {
            if text.label.is_furniture() || !is_toc_keyword(&text.text) {
                continue;
            }
            let node = Node::Text(text);
            let Some(page) = self.in_window(&node) else {
                continue;
            };
            debug!("TOC keyword {:?} at {} (page {})", text.text.trim(), text.self_ref, page);

            if let Some(container) = self.enclosing_container(&node) {
                return Some(container);
            }
            if let Some(container) = self.following_container(&node, page) {
                return Some(container);
            }
        }
        None
    }

    fn enclosing_container(&self, node: &Node<'a>) -> Option<Node<'a>> {
        let mut current = self.resolver.parent_of(node);
        let mut guard = 0;
        while let Some(n) = current {
            if n.is_toc_container() {
                return Some(n);
            }
            guard += 1;
            if guard > 64 {
                break;
            }
            current = self.resolver.parent_of(&n);
        }
        None
    }

    /// The first list/table after a heading among its siblings, on the same
    /// or the next page.
    fn following_container(&self, heading: &Node<'a>, page: u32) -> Option<Node<'a>> {
        let parent = self.resolver.parent_of(heading)?;
        let siblings = parent.children();
        let pos = siblings.iter().position(|c| c.cref == heading.self_ref())?;
        siblings[pos + 1..]
            .iter()
            .filter_map(|c| self.resolver.resolve(&c.cref))
            .take_while(|n| self.resolver.page_of(n).is_none_or(|p| p <= page + 1))
            .find(|n| n.is_toc_container())
    }

    // ── Stage 2: structural scoring ──────────────────────────────────────

    fn find_by_structure(&self) -> Option<Node<'a>> {
        let mut best: Option<(i64, Node<'a>)> = None;
        for node in self.resolver.containers() {
            let Some(page) = self.in_window(&node) else {
                continue;
            };
            let Some(score) = self.score(&node, page) else {
                continue;
            };
            debug!("TOC candidate {} on page {} scored {}", node.self_ref(), page, score);
            if best.as_ref().is_none_or(|(s, _)| score > *s) {
                best = Some((score, node));
            }
        }
        best.map(|(_, n)| n)
    }

    /// Score of a TOC-like container, `None` if it does not qualify.
    fn score(&self, node: &Node<'a>, page: u32) -> Option<i64> {
        let page_weight = (self.max_search_pages as i64 - page as i64 + 1) * 10;
        match node {
            Node::Group(_) => {
                let (children, with_pages) = self.group_stats(node);
                if !group_qualifies(children, with_pages) {
                    return None;
                }
                Some(page_weight + children as i64 * 2 + with_pages as i64 * 5)
            }
            Node::Table(t) => {
                let (rows, numeric_rows) = table_stats(t)?;
                let bonus = if t.label == TableLabel::DocumentIndex {
                    DOCUMENT_INDEX_BONUS
                } else {
                    0
                };
                Some(page_weight + rows as i64 * 2 + numeric_rows as i64 * 5 + bonus)
            }
            _ => None,
        }
    }

    /// (direct children, children ending in a page number)
    fn group_stats(&self, node: &Node<'a>) -> (usize, usize) {
        let children = self.resolver.resolve_many(node.children());
        let with_pages = children
            .iter()
            .filter(|c| ends_with_page_number(&self.resolver.plain_text(c)))
            .count();
        (children.len(), with_pages)
    }

    fn looks_like_toc(&self, node: &Node<'a>) -> bool {
        match node {
            Node::Group(_) => {
                let (children, with_pages) = self.group_stats(node);
                group_qualifies(children, with_pages)
            }
            Node::Table(t) => table_stats(t).is_some(),
            _ => false,
        }
    }

    // ── Expansion ────────────────────────────────────────────────────────

    fn expand(&self, seed: String, page: u32) -> TocAreaResult {
        let total = self.resolver.document().total_pages().max(page);
        let mut refs = vec![seed];
        let (mut start, mut end) = (page, page);

        let mut p = start;
        while p > 1 {
            p -= 1;
            let found = self.continuation_on_page(p, &refs);
            if found.is_empty() {
                break;
            }
            debug!("TOC area extends back to page {}: {:?}", p, found);
            refs = found.into_iter().chain(refs).collect();
            start = p;
        }

        let mut p = end;
        while p < total {
            p += 1;
            let found = self.continuation_on_page(p, &refs);
            if found.is_empty() {
                break;
            }
            debug!("TOC area extends forward to page {}: {:?}", p, found);
            refs.extend(found);
            end = p;
        }

        TocAreaResult::new(refs, start, end)
    }

    fn continuation_on_page(&self, page: u32, included: &[String]) -> Vec<String> {
        let page_marked = self.resolver.document().texts.iter().any(|t| {
            t.prov.first().is_some_and(|p| p.page_no == page) && has_continuation_marker(&t.text)
        });

        let mut found: Vec<String> = Vec::new();
        for node in self.resolver.containers() {
            if self.resolver.page_of(&node) != Some(page) {
                continue;
            }
            let self_ref = node.self_ref().to_string();
            if included.contains(&self_ref) {
                continue;
            }
            let mut blocked: Vec<String> = included.to_vec();
            blocked.extend(found.iter().cloned());
            if self.resolver.is_descendant_of(&node, &blocked) {
                continue;
            }
            let marked = page_marked || has_continuation_marker(&self.resolver.plain_text(&node));
            if marked || self.looks_like_toc(&node) {
                found.push(self_ref);
            }
        }
        found
    }
}

fn group_qualifies(children: usize, with_pages: usize) -> bool {
    children >= MIN_TOC_ROWS && with_pages * 2 > children
}

/// (rows, rows whose last non-empty cell is numeric) for a qualifying table.
fn table_stats(table: &TableItem) -> Option<(usize, usize)> {
    let data = &table.data;
    if data.num_rows < MIN_TOC_ROWS || data.num_cols < 2 {
        return None;
    }
    let grid = data.grid();
    let numeric_rows = grid
        .iter()
        .filter(|row| {
            row.iter()
                .rev()
                .find(|c| !c.is_empty())
                .is_some_and(|c| RE_NUMERIC_CELL.is_match(c))
        })
        .count();
    if numeric_rows * 2 > grid.len() {
        Some((grid.len(), numeric_rows))
    } else {
        None
    }
}
