//! Parsed-document model (Docling JSON subset).
//!
//! The upstream parser emits a flat set of arrays (`texts`, `groups`,
//! `tables`, `pictures`) linked by JSON-pointer-like references such as
//! `#/texts/12`. Structure lives in the `parent` / `children` links; pages
//! live in each item's provenance. Only the fields this crate reads are
//! modelled; everything else in the input is ignored on deserialization.

pub mod resolver;
pub mod serializer;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use resolver::{Node, RefResolver};
pub use serializer::TocAreaSerializer;

/// Reference to another node, serialized as `{"$ref": "#/texts/0"}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRef {
    #[serde(rename = "$ref")]
    pub cref: String,
}

impl AsRef<str> for NodeRef {
    fn as_ref(&self) -> &str {
        &self.cref
    }
}

impl NodeRef {
    pub fn new(cref: impl Into<String>) -> Self {
        Self { cref: cref.into() }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentLayer {
    #[default]
    Body,
    Furniture,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub l: f32,
    pub t: f32,
    pub r: f32,
    pub b: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    /// 1-indexed PDF page.
    pub page_no: u32,
    #[serde(default)]
    pub bbox: Option<BoundingBox>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextLabel {
    Title,
    SectionHeader,
    Text,
    Paragraph,
    ListItem,
    Caption,
    Footnote,
    PageHeader,
    PageFooter,
    Reference,
    Formula,
    Code,
    #[serde(other)]
    Other,
}

impl TextLabel {
    pub fn is_furniture(&self) -> bool {
        matches!(self, TextLabel::PageHeader | TextLabel::PageFooter)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextItem {
    pub self_ref: String,
    #[serde(default)]
    pub parent: Option<NodeRef>,
    #[serde(default)]
    pub children: Vec<NodeRef>,
    #[serde(default)]
    pub content_layer: ContentLayer,
    pub label: TextLabel,
    #[serde(default)]
    pub prov: Vec<Provenance>,
    #[serde(default)]
    pub orig: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupLabel {
    List,
    OrderedList,
    Group,
    KeyValueArea,
    FormArea,
    Section,
    Chapter,
    #[serde(other)]
    Unspecified,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupItem {
    pub self_ref: String,
    #[serde(default)]
    pub parent: Option<NodeRef>,
    #[serde(default)]
    pub children: Vec<NodeRef>,
    #[serde(default)]
    pub content_layer: ContentLayer,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_group_label")]
    pub label: GroupLabel,
}

fn default_group_label() -> GroupLabel {
    GroupLabel::Unspecified
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableLabel {
    Table,
    DocumentIndex,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableCell {
    #[serde(default)]
    pub text: String,
    pub start_row_offset_idx: usize,
    pub end_row_offset_idx: usize,
    pub start_col_offset_idx: usize,
    pub end_col_offset_idx: usize,
    #[serde(default)]
    pub column_header: bool,
    #[serde(default)]
    pub row_header: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableData {
    #[serde(default)]
    pub num_rows: usize,
    #[serde(default)]
    pub num_cols: usize,
    #[serde(default)]
    pub table_cells: Vec<TableCell>,
}

impl TableData {
    /// Dense `num_rows × num_cols` text grid. Spanning cells repeat their text
    /// in every covered slot.
    pub fn grid(&self) -> Vec<Vec<String>> {
        let mut grid = vec![vec![String::new(); self.num_cols]; self.num_rows];
        for cell in &self.table_cells {
            let rows = cell.start_row_offset_idx..cell.end_row_offset_idx.max(cell.start_row_offset_idx + 1);
            for r in rows {
                let cols = cell.start_col_offset_idx..cell.end_col_offset_idx.max(cell.start_col_offset_idx + 1);
                for c in cols {
                    if let Some(slot) = grid.get_mut(r).and_then(|row| row.get_mut(c)) {
                        *slot = cell.text.trim().to_string();
                    }
                }
            }
        }
        grid
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableItem {
    pub self_ref: String,
    #[serde(default)]
    pub parent: Option<NodeRef>,
    #[serde(default)]
    pub children: Vec<NodeRef>,
    #[serde(default)]
    pub content_layer: ContentLayer,
    #[serde(default = "default_table_label")]
    pub label: TableLabel,
    #[serde(default)]
    pub prov: Vec<Provenance>,
    #[serde(default)]
    pub captions: Vec<NodeRef>,
    #[serde(default)]
    pub footnotes: Vec<NodeRef>,
    #[serde(default)]
    pub data: TableData,
}

fn default_table_label() -> TableLabel {
    TableLabel::Table
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    #[serde(default)]
    pub mimetype: String,
    #[serde(default)]
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PictureItem {
    pub self_ref: String,
    #[serde(default)]
    pub parent: Option<NodeRef>,
    #[serde(default)]
    pub children: Vec<NodeRef>,
    #[serde(default)]
    pub content_layer: ContentLayer,
    #[serde(default)]
    pub prov: Vec<Provenance>,
    #[serde(default)]
    pub captions: Vec<NodeRef>,
    #[serde(default)]
    pub footnotes: Vec<NodeRef>,
    #[serde(default)]
    pub image: Option<ImageRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageItem {
    pub page_no: u32,
}

/// The whole parsed document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedDocument {
    #[serde(default)]
    pub name: String,
    pub body: GroupItem,
    #[serde(default)]
    pub texts: Vec<TextItem>,
    #[serde(default)]
    pub groups: Vec<GroupItem>,
    #[serde(default)]
    pub tables: Vec<TableItem>,
    #[serde(default)]
    pub pictures: Vec<PictureItem>,
    #[serde(default)]
    pub pages: BTreeMap<String, PageItem>,
}

impl ParsedDocument {
    /// Page count: the `pages` table when present, else the highest page
    /// seen in any provenance.
    pub fn total_pages(&self) -> u32 {
        let from_pages = self.pages.values().map(|p| p.page_no).max().unwrap_or(0);
        if from_pages > 0 {
            return from_pages;
        }
        let text_max = self.texts.iter().flat_map(|t| t.prov.iter());
        let table_max = self.tables.iter().flat_map(|t| t.prov.iter());
        let pic_max = self.pictures.iter().flat_map(|p| p.prov.iter());
        text_max
            .chain(table_max)
            .chain(pic_max)
            .map(|p| p.page_no)
            .max()
            .unwrap_or(0)
    }
}

/// First provenance page of an item, if any.
pub(crate) fn first_page(prov: &[Provenance]) -> Option<u32> {
    prov.first().map(|p| p.page_no)
}
