//! Linear markdown rendering of TOC-area nodes.
//!
//! The plausibility validator and the structured extractor both work on
//! text, so the located nodes are flattened here: groups become nested
//! bullet lists, tables become GFM pipe tables, loose texts become lines.

use super::resolver::{Node, RefResolver};
use crate::toc::types::TocAreaResult;
use std::collections::HashSet;
use tracing::warn;

/// Same bound the resolver's walks use.
const MAX_DEPTH: usize = 64;

pub struct TocAreaSerializer<'a> {
    resolver: RefResolver<'a>,
}

impl<'a> TocAreaSerializer<'a> {
    pub fn new(resolver: RefResolver<'a>) -> Self {
        Self { resolver }
    }

    pub fn serialize(&self, area: &TocAreaResult) -> String {
        let mut blocks = Vec::new();
        for node in self.resolver.resolve_many(&area.item_refs) {
            let mut out = String::new();
            let mut seen = HashSet::new();
            self.render(&node, 0, &mut seen, &mut out);
            let block = out.trim_end().to_string();
            if !block.is_empty() {
                blocks.push(block);
            }
        }
        blocks.join("\n\n")
    }

    fn render(&self, node: &Node<'a>, depth: usize, seen: &mut HashSet<&'a str>, out: &mut String) {
        if depth > MAX_DEPTH || !seen.insert(node.self_ref()) {
            warn!("Skipping repeated or too deep TOC node {}", node.self_ref());
            return;
        }
        match node {
            Node::Text(t) => {
                let text = t.text.trim();
                if !text.is_empty() {
                    if depth == 0 {
                        out.push_str(text);
                    } else {
                        out.push_str(&"  ".repeat(depth - 1));
                        out.push_str("- ");
                        out.push_str(text);
                    }
                    out.push('\n');
                }
                // Nested lists hang off list items in some parser outputs.
                for child in node.children() {
                    if let Some(c) = self.resolver.resolve(&child.cref) {
                        self.render(&c, depth + 1, seen, out);
                    }
                }
            }
            Node::Group(_) | Node::Body(_) => {
                for child in node.children() {
                    if let Some(c) = self.resolver.resolve(&child.cref) {
                        self.render(&c, depth + 1, seen, out);
                    }
                }
            }
            Node::Table(t) => {
                let grid = t.data.grid();
                for (i, row) in grid.iter().enumerate() {
                    let cells: Vec<String> = row.iter().map(|c| c.replace('|', "\\|")).collect();
                    out.push_str("| ");
                    out.push_str(&cells.join(" | "));
                    out.push_str(" |\n");
                    if i == 0 {
                        out.push('|');
                        out.push_str(&" --- |".repeat(row.len().max(1)));
                        out.push('\n');
                    }
                }
            }
            Node::Picture(_) => {}
        }
    }
}
