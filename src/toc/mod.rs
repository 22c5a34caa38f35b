//! Table-of-contents discovery, extraction and validation.
//!
//! 1. [`locator`]    - rule-based search for the TOC region in the parsed document
//! 2. [`content`]    - model check that the located text really is a TOC
//! 3. [`vision`]     - page-image fallback when 1 or 2 fails
//! 4. [`extractor`]  - markdown → entry tree, with the correction loop
//! 5. [`validation`] - structural rules V001–V007 the tree must satisfy

pub mod content;
pub mod extractor;
pub mod locator;
pub mod types;
pub mod validation;
pub mod vision;

pub use content::{ContentValidationResult, TocContentType, TocContentValidator};
pub use extractor::{ExtractResult, TocExtractor};
pub use locator::TocAreaLocator;
pub use types::{TocAreaResult, TocEntry, TocSource};
pub use validation::{TocValidator, ValidationIssue, ValidationResult, ValidationRule};
pub use vision::VisionTocLocator;
