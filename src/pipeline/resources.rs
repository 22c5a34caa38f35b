//! Resource conversion: pictures, tables and footnotes → output resources.
//!
//! Pictures and tables each gather their caption texts (a resource may have
//! none) and run them through the caption pipeline. Ids are allocated by
//! the caller up front so both conversions can run concurrently.

use super::normalize::{normalize_text, TextBlock};
use crate::caption::{CaptionPipeline, ResourceKind};
use crate::document::{first_page, ContentLayer, NodeRef, ParsedDocument, RefResolver};
use crate::error::ChapterError;
use crate::ids::{IdAllocator, IdKind};
use crate::output::{Footnote, ImageResource, TableResource};
use tracing::info;

/// `n` fresh ids of `kind`, in order.
pub fn allocate_ids(ids: &mut IdAllocator, kind: IdKind, n: usize) -> Vec<String> {
    (0..n).map(|_| ids.next(kind)).collect()
}

/// Caption text of a resource: its caption texts, cleaned and joined.
/// `None` when it has no caption reference or only blank ones.
pub fn caption_text(resolver: &RefResolver<'_>, captions: &[NodeRef]) -> Option<String> {
    let parts: Vec<String> = captions
        .iter()
        .filter_map(|c| resolver.resolve_text(&c.cref))
        .map(|t| normalize_text(&t.text))
        .filter(|t| !t.is_empty())
        .collect();
    (!parts.is_empty()).then(|| parts.join(" "))
}

/// Pictures in the body layer, in document order.
pub fn picture_count(doc: &ParsedDocument) -> usize {
    doc.pictures
        .iter()
        .filter(|p| p.content_layer != ContentLayer::Furniture)
        .count()
}

/// Tables in the body layer, in document order.
pub fn table_count(doc: &ParsedDocument) -> usize {
    doc.tables
        .iter()
        .filter(|t| t.content_layer != ContentLayer::Furniture)
        .count()
}

pub async fn convert_images(
    doc: &ParsedDocument,
    ids: Vec<String>,
    captions: &CaptionPipeline,
) -> Result<Vec<ImageResource>, ChapterError> {
    let resolver = RefResolver::new(doc);
    let pictures: Vec<_> = doc
        .pictures
        .iter()
        .filter(|p| p.content_layer != ContentLayer::Furniture)
        .collect();
    let texts: Vec<Option<String>> = pictures
        .iter()
        .map(|p| caption_text(&resolver, &p.captions))
        .collect();
    let mut parsed = captions.process(&texts, ResourceKind::Image).await?;

    let images: Vec<ImageResource> = pictures
        .iter()
        .zip(ids)
        .enumerate()
        .map(|(i, (p, id))| ImageResource {
            id,
            path: p.image.as_ref().map(|img| img.uri.clone()).filter(|u| !u.is_empty()),
            page_no: first_page(&p.prov).unwrap_or(0),
            caption: parsed.remove(&i),
        })
        .collect();
    info!(
        "Converted {} images ({} captioned)",
        images.len(),
        images.iter().filter(|i| i.caption.is_some()).count()
    );
    Ok(images)
}

pub async fn convert_tables(
    doc: &ParsedDocument,
    ids: Vec<String>,
    captions: &CaptionPipeline,
) -> Result<Vec<TableResource>, ChapterError> {
    let resolver = RefResolver::new(doc);
    let tables: Vec<_> = doc
        .tables
        .iter()
        .filter(|t| t.content_layer != ContentLayer::Furniture)
        .collect();
    let texts: Vec<Option<String>> = tables
        .iter()
        .map(|t| caption_text(&resolver, &t.captions))
        .collect();
    let mut parsed = captions.process(&texts, ResourceKind::Table).await?;

    let out: Vec<TableResource> = tables
        .iter()
        .zip(ids)
        .enumerate()
        .map(|(i, (t, id))| TableResource {
            id,
            page_no: first_page(&t.prov).unwrap_or(0),
            grid: t.data.grid(),
            caption: parsed.remove(&i),
        })
        .collect();
    info!(
        "Converted {} tables ({} captioned)",
        out.len(),
        out.iter().filter(|t| t.caption.is_some()).count()
    );
    Ok(out)
}

pub fn convert_footnotes(blocks: &[TextBlock], ids: &mut IdAllocator) -> Vec<Footnote> {
    blocks
        .iter()
        .map(|b| Footnote {
            id: ids.next(IdKind::Footnote),
            page_no: b.page_no,
            text: b.text.clone(),
        })
        .collect()
}
