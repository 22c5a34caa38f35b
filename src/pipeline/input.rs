//! Input loading: read a parsed-document JSON file into [`ParsedDocument`].
//!
//! The file is read fully before parsing so that I/O errors (missing file,
//! permissions) and content errors (not JSON, wrong shape) surface as
//! distinct [`ChapterError`] variants.

use crate::document::ParsedDocument;
use crate::error::ChapterError;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Load and parse the document at `path`.
pub async fn load_document(path: impl AsRef<Path>) -> Result<ParsedDocument, ChapterError> {
    let path = path.as_ref().to_path_buf();

    let bytes = match tokio::fs::read(&path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ChapterError::FileNotFound { path });
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(ChapterError::PermissionDenied { path });
        }
        Err(e) => {
            return Err(ChapterError::InvalidDocument {
                path,
                detail: e.to_string(),
            });
        }
    };
    debug!("Read {} bytes from {}", bytes.len(), path.display());

    let doc = parse_document(&bytes, &path)?;
    info!(
        "Loaded '{}': {} pages, {} texts, {} tables, {} pictures",
        doc.name,
        doc.total_pages(),
        doc.texts.len(),
        doc.tables.len(),
        doc.pictures.len()
    );
    Ok(doc)
}

fn parse_document(bytes: &[u8], path: &Path) -> Result<ParsedDocument, ChapterError> {
    let invalid = |detail: String| ChapterError::InvalidDocument {
        path: PathBuf::from(path),
        detail,
    };
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(invalid("file is empty".to_string()));
    }
    serde_json::from_slice(bytes).map_err(|e| invalid(e.to_string()))
}
