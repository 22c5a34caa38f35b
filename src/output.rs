//! Output types for a processing run.

use crate::caption::Caption;
use crate::error::ChapterError;
use crate::pipeline::page_range::PageRange;
use crate::toc::TocSource;
use crate::usage::{UsageRecord, UsageSummary};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// One chapter, derived from a TOC entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    /// `ch-001`, `ch-002`, … in TOC order (depth first).
    pub id: String,
    pub title: String,
    pub level: u32,
    /// Printed page number from the TOC.
    pub page_no: u32,
    /// PDF page the chapter starts on.
    pub pdf_page: u32,
    pub text_blocks: Vec<String>,
    pub image_ids: Vec<String>,
    pub table_ids: Vec<String>,
    pub footnote_ids: Vec<String>,
    #[serde(default)]
    pub children: Vec<Chapter>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageResource {
    pub id: String,
    /// Image location reported by the parser, if any.
    pub path: Option<String>,
    pub page_no: u32,
    pub caption: Option<Caption>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableResource {
    pub id: String,
    pub page_no: u32,
    pub grid: Vec<Vec<String>>,
    pub caption: Option<Caption>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Footnote {
    pub id: String,
    pub page_no: u32,
    pub text: String,
}

/// Everything a run produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingResult {
    pub report_id: String,
    pub toc_source: TocSource,
    pub chapters: Vec<Chapter>,
    pub images: Vec<ImageResource>,
    pub tables: Vec<TableResource>,
    pub footnotes: Vec<Footnote>,
    /// PDF page → printed page numbers.
    pub page_range_map: BTreeMap<u32, PageRange>,
    /// Every completion call of the run, in call order.
    pub usage: Vec<UsageRecord>,
}

impl ProcessingResult {
    pub fn usage_summary(&self) -> UsageSummary {
        UsageSummary::from_records(&self.usage)
    }

    /// Write as pretty JSON. Atomic: temp file + rename, so readers never
    /// see a partial file.
    pub async fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ChapterError> {
        let path = path.as_ref();
        let write_err = |source: std::io::Error| ChapterError::OutputWriteFailed {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| ChapterError::Internal(format!("result serialization: {e}")))?;

        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &json).await.map_err(write_err)?;
        tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
        Ok(())
    }
}
