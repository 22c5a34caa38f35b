//! Reference resolution over a [`ParsedDocument`].

use super::{first_page, GroupItem, NodeRef, ParsedDocument, PictureItem, TableItem, TextItem};

/// A borrowed view of any node reachable through a reference.
#[derive(Debug, Clone, Copy)]
pub enum Node<'a> {
    Body(&'a GroupItem),
    Text(&'a TextItem),
    Group(&'a GroupItem),
    Table(&'a TableItem),
    Picture(&'a PictureItem),
}

impl<'a> Node<'a> {
    pub fn self_ref(&self) -> &'a str {
        match self {
            Node::Body(g) | Node::Group(g) => &g.self_ref,
            Node::Text(t) => &t.self_ref,
            Node::Table(t) => &t.self_ref,
            Node::Picture(p) => &p.self_ref,
        }
    }

    pub fn parent(&self) -> Option<&'a NodeRef> {
        match self {
            Node::Body(_) => None,
            Node::Group(g) => g.parent.as_ref(),
            Node::Text(t) => t.parent.as_ref(),
            Node::Table(t) => t.parent.as_ref(),
            Node::Picture(p) => p.parent.as_ref(),
        }
    }

    pub fn children(&self) -> &'a [NodeRef] {
        match self {
            Node::Body(g) | Node::Group(g) => &g.children,
            Node::Text(t) => &t.children,
            Node::Table(t) => &t.children,
            Node::Picture(p) => &p.children,
        }
    }

    /// Lists, groups and tables are the containers a TOC can render as.
    pub fn is_toc_container(&self) -> bool {
        matches!(self, Node::Group(_) | Node::Table(_))
    }
}

/// Walks references of one document.
#[derive(Debug, Clone, Copy)]
pub struct RefResolver<'a> {
    doc: &'a ParsedDocument,
}

impl<'a> RefResolver<'a> {
    pub fn new(doc: &'a ParsedDocument) -> Self {
        Self { doc }
    }

    pub fn document(&self) -> &'a ParsedDocument {
        self.doc
    }

    pub fn resolve(&self, cref: &str) -> Option<Node<'a>> {
        if cref == "#/body" {
            return Some(Node::Body(&self.doc.body));
        }
        let rest = cref.strip_prefix("#/")?;
        let (kind, idx) = rest.split_once('/')?;
        let idx: usize = idx.parse().ok()?;
        match kind {
            "texts" => self.doc.texts.get(idx).map(Node::Text),
            "groups" => self.doc.groups.get(idx).map(Node::Group),
            "tables" => self.doc.tables.get(idx).map(Node::Table),
            "pictures" => self.doc.pictures.get(idx).map(Node::Picture),
            _ => None,
        }
    }

    pub fn resolve_text(&self, cref: &str) -> Option<&'a TextItem> {
        match self.resolve(cref)? {
            Node::Text(t) => Some(t),
            _ => None,
        }
    }

    pub fn resolve_group(&self, cref: &str) -> Option<&'a GroupItem> {
        match self.resolve(cref)? {
            Node::Group(g) => Some(g),
            _ => None,
        }
    }

    pub fn resolve_table(&self, cref: &str) -> Option<&'a TableItem> {
        match self.resolve(cref)? {
            Node::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn resolve_picture(&self, cref: &str) -> Option<&'a PictureItem> {
        match self.resolve(cref)? {
            Node::Picture(p) => Some(p),
            _ => None,
        }
    }

    /// Resolve every reference, silently skipping dangling ones.
    pub fn resolve_many<S: AsRef<str>>(&self, refs: &[S]) -> Vec<Node<'a>> {
        refs.iter().filter_map(|r| self.resolve(r.as_ref())).collect()
    }

    pub fn parent_of(&self, node: &Node<'a>) -> Option<Node<'a>> {
        node.parent().and_then(|p| self.resolve(&p.cref))
    }

    /// First page a node appears on: its own provenance, else the first
    /// descendant that has one.
    pub fn page_of(&self, node: &Node<'a>) -> Option<u32> {
        self.page_of_depth(node, 0)
    }

    fn page_of_depth(&self, node: &Node<'a>, depth: usize) -> Option<u32> {
        if depth > 64 {
            return None;
        }
        let own = match node {
            Node::Text(t) => first_page(&t.prov),
            Node::Table(t) => first_page(&t.prov),
            Node::Picture(p) => first_page(&p.prov),
            Node::Body(_) | Node::Group(_) => None,
        };
        own.or_else(|| {
            node.children()
                .iter()
                .filter_map(|c| self.resolve(&c.cref))
                .find_map(|c| self.page_of_depth(&c, depth + 1))
        })
    }

    /// Whether `node` sits below any reference in `ancestors`.
    pub fn is_descendant_of(&self, node: &Node<'a>, ancestors: &[String]) -> bool {
        let mut current = self.parent_of(node);
        let mut guard = 0;
        while let Some(n) = current {
            if ancestors.iter().any(|a| a == n.self_ref()) {
                return true;
            }
            guard += 1;
            if guard > 64 {
                break;
            }
            current = self.parent_of(&n);
        }
        false
    }

    /// Concatenated text of a node's subtree, space-separated.
    pub fn plain_text(&self, node: &Node<'a>) -> String {
        let mut out = Vec::new();
        self.collect_text(node, &mut out, 0);
        out.join(" ")
    }

    fn collect_text(&self, node: &Node<'a>, out: &mut Vec<String>, depth: usize) {
        if depth > 64 {
            return;
        }
        match node {
            Node::Text(t) => {
                if !t.text.trim().is_empty() {
                    out.push(t.text.trim().to_string());
                }
            }
            Node::Table(t) => {
                for row in t.data.grid() {
                    out.extend(row.into_iter().filter(|c| !c.is_empty()));
                }
            }
            _ => {}
        }
        for child in node.children() {
            if let Some(c) = self.resolve(&child.cref) {
                self.collect_text(&c, out, depth + 1);
            }
        }
    }

    /// Every group and table in document order (arena order).
    pub fn containers(&self) -> impl Iterator<Item = Node<'a>> + 'a {
        let groups = self.doc.groups.iter().map(Node::Group);
        let tables = self.doc.tables.iter().map(Node::Table);
        groups.chain(tables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::fixtures::DocBuilder;
    use crate::document::{GroupLabel, TableLabel, TextLabel};

    #[test]
    fn resolves_each_kind() {
        let mut b = DocBuilder::new();
        let t = b.text(None, TextLabel::Text, 1, "hello");
        let g = b.group(None, GroupLabel::List);
        let tb = b.table(2, TableLabel::Table, &[&["a", "1"]]);
        let p = b.picture(3, None);
        let doc = b.build();
        let r = RefResolver::new(&doc);
        assert_eq!(r.resolve_text(&t).unwrap().text, "hello");
        assert!(r.resolve_group(&g).is_some());
        assert!(r.resolve_table(&tb).is_some());
        assert!(r.resolve_picture(&p).is_some());
        assert!(matches!(r.resolve("#/body"), Some(Node::Body(_))));
        assert!(r.resolve("#/texts/99").is_none());
        assert!(r.resolve("garbage").is_none());
        assert!(r.resolve_text(&g).is_none());
    }

    #[test]
    fn resolve_many_skips_dangling() {
        let mut b = DocBuilder::new();
        let t = b.text(None, TextLabel::Text, 1, "x");
        let doc = b.build();
        let r = RefResolver::new(&doc);
        let nodes = r.resolve_many(&[t.as_str(), "#/texts/5"]);
        assert_eq!(nodes.len(), 1);
    }

    #[test]
    fn group_page_comes_from_first_child() {
        let mut b = DocBuilder::new();
        let g = b.list(4, &["Intro ..... 1", "Body ..... 5"]);
        let doc = b.build();
        let r = RefResolver::new(&doc);
        let node = r.resolve(&g).unwrap();
        assert_eq!(r.page_of(&node), Some(4));
        assert_eq!(r.plain_text(&node), "Intro ..... 1 Body ..... 5");
    }

    #[test]
    fn descendant_check_walks_parents() {
        let mut b = DocBuilder::new();
        let outer = b.group(None, GroupLabel::List);
        let inner = b.group(Some(&outer), GroupLabel::List);
        let item = b.text(Some(&inner), TextLabel::ListItem, 1, "nested");
        let doc = b.build();
        let r = RefResolver::new(&doc);
        let node = r.resolve(&item).unwrap();
        assert!(r.is_descendant_of(&node, &[outer.clone()]));
        let inner_node = r.resolve(&inner).unwrap();
        assert!(!r.is_descendant_of(&inner_node, &[item]));
    }
}
