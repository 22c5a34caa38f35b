//! Pipeline stages around the TOC core.
//!
//! Each submodule implements exactly one transformation step and is driven
//! by [`crate::processor::DocumentProcessor`].
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ normalize ──▶ page_range ──▶ (toc) ──▶ resources ──▶ chapters
//! (JSON)    (cleanup)     (printed #)              (captions)    (tree)
//! ```
//!
//! 1. [`input`]      - read the parsed-document JSON from disk
//! 2. [`normalize`]  - clean texts; split body, furniture and footnotes
//! 3. [`page_range`] - PDF page → printed page map from headers/footers
//! 4. [`pages`]      - rendered page images for the vision fallback
//! 5. [`resources`]  - pictures, tables and footnotes with parsed captions
//! 6. [`chapters`]   - attach content to the TOC forest

pub mod chapters;
pub mod input;
pub mod normalize;
pub mod page_range;
pub mod pages;
pub mod resources;
