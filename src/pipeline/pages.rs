//! Page images: `<output_dir>/pages/page_{n-1}.png` → base64 PNG `ImageData`.
//!
//! The upstream parser rasterises every page next to the parsed JSON with
//! 0-indexed file names. Pages are decoded and re-encoded as PNG so that
//! whatever the parser wrote (RGBA, palette, 16-bit) reaches the model in
//! one canonical form. `detail: "high"` keeps fine print such as leader
//! dots and page numbers legible for GPT-4-class models.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Encode a decoded page as a base64 PNG ready for a vision request.
pub fn encode_page(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded image → {} bytes base64", b64.len());

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

/// Reads rasterised pages from a run's output directory.
#[derive(Debug, Clone)]
pub struct PageImageSource {
    dir: PathBuf,
}

impl PageImageSource {
    pub fn new(output_dir: impl AsRef<Path>) -> Self {
        Self {
            dir: output_dir.as_ref().join("pages"),
        }
    }

    /// File for 1-based `page_no`.
    pub fn path_for(&self, page_no: u32) -> PathBuf {
        self.dir
            .join(format!("page_{}.png", page_no.saturating_sub(1)))
    }

    /// Load one page. Missing or undecodable pages yield `None` with a warning.
    pub async fn load(&self, page_no: u32) -> Option<ImageData> {
        let path = self.path_for(page_no);
        if !path.exists() {
            warn!("Page image {} is missing, skipping", path.display());
            return None;
        }
        let shown = path.display().to_string();
        let result = tokio::task::spawn_blocking(move || {
            let img = image::open(&path)?;
            encode_page(&img)
        })
        .await;
        match result {
            Ok(Ok(data)) => Some(data),
            Ok(Err(e)) => {
                warn!("Page image {} could not be decoded: {}", shown, e);
                None
            }
            Err(e) => {
                warn!("Page image task for {} failed: {}", shown, e);
                None
            }
        }
    }

    /// Load pages `start..=end` in order, skipping the ones that fail.
    pub async fn load_range(&self, start: u32, end: u32) -> Vec<ImageData> {
        let mut images = Vec::new();
        for page_no in start..=end {
            if let Some(img) = self.load(page_no).await {
                images.push(img);
            }
        }
        images
    }
}

/// Write `count` tiny pages named the way the parser names them.
#[cfg(test)]
pub(crate) fn write_test_pages(output_dir: &Path, count: u32) {
    use image::{Rgba, RgbaImage};
    let pages = output_dir.join("pages");
    std::fs::create_dir_all(&pages).unwrap();
    for i in 0..count {
        RgbaImage::from_pixel(4, 4, Rgba([255, 255, 255, 255]))
            .save(pages.join(format!("page_{i}.png")))
            .unwrap();
    }
}
