//! Page-range resolution: PDF page → printed page numbers.
//!
//! TOC entries carry *printed* page numbers while the parsed document knows
//! only *PDF* pages. Printed numbers are read from numeric page headers and
//! footers (`12`, `- 12 -`, `Page 12`, `12 / 200`, and `12-13` for scanned
//! two-page spreads). Pages without a reading are filled by offset from the
//! nearest page that has one; a document without any reading maps to itself.
//!
//! Front-matter pages that would fall before printed page 1 map to
//! `PageRange { start: 0, end: 0 }`.

use super::normalize::TextBlock;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Printed page numbers shown on one PDF page (`start == end` unless a spread).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    pub start: u32,
    pub end: u32,
}

impl PageRange {
    pub fn single(n: u32) -> Self {
        Self { start: n, end: n }
    }

    fn width(&self) -> u32 {
        self.end.saturating_sub(self.start) + 1
    }
}

static RE_DASHED: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[-–—]\s*(\d{1,4})\s*[-–—]$").unwrap());
static RE_SPREAD: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{1,4})\s*[-–]\s*(\d{1,4})$").unwrap());
static RE_OF_TOTAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:page\s+)?(\d{1,4})\s*(?:/|of)\s*\d{1,4}$").unwrap());
static RE_PLAIN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:page|p\.|pg\.?|페이지)?\s*(\d{1,4})(?:\s*(?:쪽|페이지|頁))?$").unwrap());

/// Printed page number(s) in a header/footer text, if it is purely numeric.
pub fn parse_printed_page(text: &str) -> Option<PageRange> {
    let t = text.trim();
    if let Some(c) = RE_DASHED.captures(t) {
        return c[1].parse().ok().map(PageRange::single);
    }
    if let Some(c) = RE_SPREAD.captures(t) {
        let a: u32 = c[1].parse().ok()?;
        let b: u32 = c[2].parse().ok()?;
        return (b == a + 1).then_some(PageRange { start: a, end: b });
    }
    if let Some(c) = RE_OF_TOTAL.captures(t) {
        return c[1].parse().ok().map(PageRange::single);
    }
    RE_PLAIN
        .captures(t)
        .and_then(|c| c[1].parse().ok())
        .map(PageRange::single)
}

/// Build the PDF page → printed range map for pages `1..=total_pages`.
pub fn resolve_page_ranges(furniture: &[TextBlock], total_pages: u32) -> BTreeMap<u32, PageRange> {
    let known = read_known_pages(furniture, total_pages);
    debug!("Printed page numbers read on {} of {} pages", known.len(), total_pages);

    let mut map = BTreeMap::new();
    for page in 1..=total_pages {
        let range = match known.get(&page) {
            Some(r) => *r,
            None => interpolate(&known, page),
        };
        map.insert(page, range);
    }
    map
}

/// Readings per PDF page; readings that go backwards are dropped.
fn read_known_pages(furniture: &[TextBlock], total_pages: u32) -> BTreeMap<u32, PageRange> {
    let upper = total_pages.saturating_mul(2).saturating_add(50);
    let mut known: BTreeMap<u32, PageRange> = BTreeMap::new();
    let mut last: Option<PageRange> = None;

    let mut blocks: Vec<&TextBlock> = furniture
        .iter()
        .filter(|b| b.page_no >= 1 && b.page_no <= total_pages)
        .collect();
    blocks.sort_by_key(|b| b.page_no);

    for block in blocks {
        if known.contains_key(&block.page_no) {
            continue;
        }
        let Some(range) = parse_printed_page(&block.text) else {
            continue;
        };
        if range.start == 0 || range.end > upper {
            continue;
        }
        if last.is_some_and(|l| range.start <= l.end) {
            continue;
        }
        known.insert(block.page_no, range);
        last = Some(range);
    }
    known
}

fn interpolate(known: &BTreeMap<u32, PageRange>, page: u32) -> PageRange {
    if let Some((&kp, kr)) = known.range(..page).next_back() {
        let step = kr.width();
        let start = kr.end + 1 + (page - kp - 1) * step;
        return PageRange {
            start,
            end: start + step - 1,
        };
    }
    if let Some((&kp, kr)) = known.range(page..).next() {
        let step = kr.width() as i64;
        let start = kr.start as i64 - (kp - page) as i64 * step;
        if start < 1 {
            return PageRange::single(0);
        }
        return PageRange {
            start: start as u32,
            end: (start + step - 1) as u32,
        };
    }
    PageRange::single(page)
}

/// Printed page → PDF page lookup built from a resolved map.
#[derive(Debug, Clone, Default)]
pub struct PrintedPageIndex {
    printed_to_pdf: BTreeMap<u32, u32>,
    total_pages: u32,
}

impl PrintedPageIndex {
    pub fn new(map: &BTreeMap<u32, PageRange>) -> Self {
        let mut printed_to_pdf = BTreeMap::new();
        for (&pdf, range) in map {
            if range.start == 0 {
                continue;
            }
            for printed in range.start..=range.end {
                printed_to_pdf.entry(printed).or_insert(pdf);
            }
        }
        Self {
            printed_to_pdf,
            total_pages: map.keys().next_back().copied().unwrap_or(0),
        }
    }

    /// PDF page showing `printed`. Numbers past the last reading are
    /// extrapolated and clamped to the document.
    pub fn to_pdf_page(&self, printed: u32) -> u32 {
        if let Some(&pdf) = self.printed_to_pdf.get(&printed) {
            return pdf;
        }
        let guess = match self.printed_to_pdf.range(..printed).next_back() {
            Some((&p, &pdf)) => pdf + (printed - p),
            None => match self.printed_to_pdf.iter().next() {
                Some((&p, &pdf)) => pdf.saturating_sub(p - printed),
                None => printed,
            },
        };
        if self.total_pages == 0 {
            guess
        } else {
            guess.clamp(1, self.total_pages)
        }
    }
}
