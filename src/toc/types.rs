//! TOC data types shared by the locator, extractor and chapter assembly.

use serde::{Deserialize, Serialize};

/// One table-of-contents entry. Entries form a forest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TocEntry {
    pub title: String,
    pub level: u32,
    pub page_no: u32,
    #[serde(default)]
    pub children: Vec<TocEntry>,
}

impl TocEntry {
    pub fn new(title: impl Into<String>, level: u32, page_no: u32) -> Self {
        Self {
            title: title.into(),
            level,
            page_no,
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<TocEntry>) -> Self {
        self.children = children;
        self
    }
}

/// Force `level` to match tree depth (roots are 1) and trim titles,
/// whatever the model proposed.
pub fn normalize_entries(entries: Vec<TocEntry>) -> Vec<TocEntry> {
    normalize_at(entries, 1)
}

fn normalize_at(entries: Vec<TocEntry>, level: u32) -> Vec<TocEntry> {
    entries
        .into_iter()
        .map(|e| TocEntry {
            title: e.title.trim().to_string(),
            level,
            page_no: e.page_no,
            children: normalize_at(e.children, level + 1),
        })
        .collect()
}

/// Number of entries in the whole forest.
pub fn count_entries(entries: &[TocEntry]) -> usize {
    entries.iter().map(|e| 1 + count_entries(&e.children)).sum()
}

/// The located TOC region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TocAreaResult {
    pub item_refs: Vec<String>,
    pub start_page: u32,
    pub end_page: u32,
}

impl TocAreaResult {
    pub fn new(item_refs: Vec<String>, start_page: u32, end_page: u32) -> Self {
        Self {
            item_refs,
            start_page,
            end_page,
        }
    }
}

/// Where the markdown handed to the structured extractor came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TocSource {
    RuleBased,
    Vision,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn normalize_overrides_levels_and_trims() {
        let raw = vec![TocEntry::new("  Part I ", 3, 1).with_children(vec![
            TocEntry::new("Chapter 1", 1, 1).with_children(vec![TocEntry::new(" 1.1 ", 7, 2)]),
        ])];
        let n = normalize_entries(raw);
        assert_eq!(n[0].title, "Part I");
        assert_eq!(n[0].level, 1);
        assert_eq!(n[0].children[0].level, 2);
        assert_eq!(n[0].children[0].children[0].level, 3);
        assert_eq!(n[0].children[0].children[0].title, "1.1");
        assert_eq!(count_entries(&n), 3);
    }

    #[test]
    fn entry_deserializes_without_children() {
        let e: TocEntry =
            serde_json::from_str(r#"{"title":"Intro","level":1,"pageNo":3}"#).unwrap();
        assert!(e.children.is_empty());
        assert_eq!(e.page_no, 3);
    }

    fn arb_entry() -> impl Strategy<Value = TocEntry> {
        let leaf = ("[a-z ]{0,8}", 0u32..10, 1u32..500)
            .prop_map(|(t, l, p)| TocEntry::new(t, l, p));
        leaf.prop_recursive(3, 24, 4, |inner| {
            ("[a-z ]{0,8}", 0u32..10, 1u32..500, prop::collection::vec(inner, 0..4))
                .prop_map(|(t, l, p, c)| TocEntry::new(t, l, p).with_children(c))
        })
    }

    fn levels_match_depth(entries: &[TocEntry], depth: u32) -> bool {
        entries
            .iter()
            .all(|e| e.level == depth && levels_match_depth(&e.children, depth + 1))
    }

    proptest! {
        #[test]
        fn normalized_levels_follow_depth(forest in prop::collection::vec(arb_entry(), 0..5)) {
            let before = count_entries(&forest);
            let n = normalize_entries(forest);
            prop_assert!(levels_match_depth(&n, 1));
            prop_assert_eq!(count_entries(&n), before);
        }
    }
}
