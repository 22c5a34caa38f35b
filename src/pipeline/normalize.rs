//! Text normalization: the parsed document's texts → clean text streams.
//!
//! Parsers leave zero-width characters, soft hyphens and ragged whitespace
//! in extracted text. Every text is cleaned the same way here, then routed
//! into one of three streams:
//!
//! - `body`      - running text in reading order, attached to chapters later
//! - `furniture` - page headers/footers, used only to read printed page numbers
//! - `footnotes` - converted into footnote resources
//!
//! Captions owned by a picture or table are left to the resource stage.

use crate::document::{ContentLayer, Node, ParsedDocument, RefResolver, TextItem, TextLabel};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use tracing::debug;

/// One cleaned text item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextBlock {
    pub self_ref: String,
    pub label: TextLabel,
    /// 1-indexed PDF page; 0 when the parser recorded none.
    pub page_no: u32,
    pub text: String,
}

#[derive(Debug, Clone, Default)]
pub struct NormalizedText {
    pub body: Vec<TextBlock>,
    pub furniture: Vec<TextBlock>,
    pub footnotes: Vec<TextBlock>,
}

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Strip invisible Unicode and collapse whitespace runs to one space.
pub fn normalize_text(input: &str) -> String {
    let visible = input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    );
    RE_WHITESPACE.replace_all(visible.trim(), " ").into_owned()
}

fn is_furniture(t: &TextItem) -> bool {
    t.label.is_furniture() || t.content_layer == ContentLayer::Furniture
}

/// Walk the body tree in reading order and route every non-empty text.
pub fn normalize_document(doc: &ParsedDocument) -> NormalizedText {
    let resolver = RefResolver::new(doc);
    let mut out = NormalizedText::default();
    let mut visited = HashSet::new();
    walk(&resolver, Node::Body(&doc.body), &mut out, &mut visited, 0);

    // Furniture is usually not linked from the body.
    for t in doc.texts.iter().filter(|t| is_furniture(t)) {
        if visited.insert(t.self_ref.clone()) {
            push_block(&mut out.furniture, t);
        }
    }
    out.furniture.sort_by_key(|b| b.page_no);

    debug!(
        "Normalized texts: {} body, {} furniture, {} footnotes",
        out.body.len(),
        out.furniture.len(),
        out.footnotes.len()
    );
    out
}

fn walk<'a>(
    resolver: &RefResolver<'a>,
    node: Node<'a>,
    out: &mut NormalizedText,
    visited: &mut HashSet<String>,
    depth: usize,
) {
    if depth > 64 || !visited.insert(node.self_ref().to_string()) {
        return;
    }
    match node {
        // Picture/table children are their captions and footnotes.
        Node::Picture(_) | Node::Table(_) => return,
        Node::Text(t) => {
            if is_furniture(t) {
                push_block(&mut out.furniture, t);
            } else if t.label == TextLabel::Footnote {
                push_block(&mut out.footnotes, t);
            } else {
                push_block(&mut out.body, t);
            }
        }
        Node::Body(_) | Node::Group(_) => {}
    }
    for child in node.children() {
        if let Some(c) = resolver.resolve(&child.cref) {
            walk(resolver, c, out, visited, depth + 1);
        }
    }
}

fn push_block(stream: &mut Vec<TextBlock>, t: &TextItem) {
    let text = normalize_text(&t.text);
    if text.is_empty() {
        return;
    }
    stream.push(TextBlock {
        self_ref: t.self_ref.clone(),
        label: t.label,
        page_no: t.prov.first().map(|p| p.page_no).unwrap_or(0),
        text,
    });
}
