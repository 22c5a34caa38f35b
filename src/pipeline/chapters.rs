//! Chapter assembly: TOC forest + content streams → chapter tree.
//!
//! Each TOC entry becomes a [`Chapter`] starting at the PDF page its printed
//! page number maps to. Every text block and resource goes to the last
//! chapter, in depth-first order, that starts on or before its page. That is
//! the deepest section open at that point. Content before the first chapter
//! (front matter, or items without a page) goes to the first chapter.

use super::normalize::TextBlock;
use super::page_range::PrintedPageIndex;
use crate::ids::{IdAllocator, IdKind};
use crate::output::{Chapter, Footnote, ImageResource, TableResource};
use crate::toc::TocEntry;
use tracing::debug;

pub struct ChapterContent<'a> {
    pub body: &'a [TextBlock],
    pub images: &'a [ImageResource],
    pub tables: &'a [TableResource],
    pub footnotes: &'a [Footnote],
}

pub fn assemble_chapters(
    toc: &[TocEntry],
    pages: &PrintedPageIndex,
    content: &ChapterContent<'_>,
    ids: &mut IdAllocator,
) -> Vec<Chapter> {
    let mut chapters = build_tree(toc, pages, ids);
    if chapters.is_empty() {
        return chapters;
    }

    let mut starts = Vec::new();
    flatten(&chapters, &mut Vec::new(), &mut starts);

    for block in content.body {
        owner(&mut chapters, &starts, block.page_no)
            .text_blocks
            .push(block.text.clone());
    }
    for img in content.images {
        owner(&mut chapters, &starts, img.page_no)
            .image_ids
            .push(img.id.clone());
    }
    for tbl in content.tables {
        owner(&mut chapters, &starts, tbl.page_no)
            .table_ids
            .push(tbl.id.clone());
    }
    for note in content.footnotes {
        owner(&mut chapters, &starts, note.page_no)
            .footnote_ids
            .push(note.id.clone());
    }
    debug!("Assembled {} chapters", starts.len());
    chapters
}

fn build_tree(entries: &[TocEntry], pages: &PrintedPageIndex, ids: &mut IdAllocator) -> Vec<Chapter> {
    entries
        .iter()
        .map(|e| {
            let id = ids.next(IdKind::Chapter);
            Chapter {
                id,
                title: e.title.clone(),
                level: e.level,
                page_no: e.page_no,
                pdf_page: pages.to_pdf_page(e.page_no),
                text_blocks: Vec::new(),
                image_ids: Vec::new(),
                table_ids: Vec::new(),
                footnote_ids: Vec::new(),
                children: build_tree(&e.children, pages, ids),
            }
        })
        .collect()
}

/// Depth-first `(path, pdf start page)` of every chapter.
fn flatten(chapters: &[Chapter], path: &mut Vec<usize>, out: &mut Vec<(Vec<usize>, u32)>) {
    for (i, ch) in chapters.iter().enumerate() {
        path.push(i);
        out.push((path.clone(), ch.pdf_page));
        flatten(&ch.children, path, out);
        path.pop();
    }
}

fn owner<'c>(chapters: &'c mut [Chapter], starts: &[(Vec<usize>, u32)], page: u32) -> &'c mut Chapter {
    let open = starts
        .iter()
        .rev()
        .find(|(_, start)| page > 0 && *start <= page);
    match open {
        Some((path, _)) => chapter_at(chapters, path),
        None => &mut chapters[0],
    }
}

fn chapter_at<'c>(chapters: &'c mut [Chapter], path: &[usize]) -> &'c mut Chapter {
    match path {
        [] => &mut chapters[0],
        [i] => &mut chapters[*i],
        [i, rest @ ..] => chapter_at(&mut chapters[*i].children, rest),
    }
}
