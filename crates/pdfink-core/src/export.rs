//! Export pipeline: geometry -> composite each overlay -> serialize
//!
//! The export is transactional. Every overlay is validated against the page
//! count before any page is touched, and any later failure discards the
//! working copy, so callers either get a complete document or an error.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::compose::composite;
use crate::error::{PdfInkError, Result};
use crate::geometry::{read_geometry, SourceDocument};
use crate::image::{decode_image, ImageFormat};
use crate::serialize::{serialize, ExportResult};

/// One raster overlay destined for one page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayRequest {
    /// Target page (0-based)
    pub page_index: usize,
    #[serde(skip)]
    pub image_bytes: Vec<u8>,
    pub image_format: ImageFormat,
}

impl OverlayRequest {
    pub fn png(page_index: usize, image_bytes: Vec<u8>) -> Self {
        Self {
            page_index,
            image_bytes,
            image_format: ImageFormat::Png,
        }
    }
}

/// Flatten `overlays` onto `original` and return the new document.
///
/// When several overlays target the same page the last one in request order
/// wins. Overlays are applied in page order; pages without an overlay are
/// carried over untouched.
pub fn export(original: &[u8], overlays: &[OverlayRequest]) -> Result<ExportResult> {
    let mut source = SourceDocument::parse(original)?;
    let geometry = read_geometry(&source)?;
    let page_count = source.page_count();

    let selected = select_overlays(overlays, page_count)?;

    let mut composited = Vec::with_capacity(selected.len());
    for (index, overlay) in selected {
        let image = decode_image(&overlay.image_bytes, overlay.image_format)?;
        composited.push(composite(&mut source, &geometry[index], &image)?);
    }

    let result = serialize(source, &composited)?;
    info!(
        page_count = result.page_count,
        overlays = result.composited_pages.len(),
        bytes = result.document_bytes.len(),
        "export complete"
    );
    Ok(result)
}

/// Validate page indices and keep the last overlay per page, keyed by page
fn select_overlays(
    overlays: &[OverlayRequest],
    page_count: usize,
) -> Result<BTreeMap<usize, &OverlayRequest>> {
    if let Some(bad) = overlays.iter().find(|o| o.page_index >= page_count) {
        return Err(PdfInkError::PageIndexOutOfRange {
            index: bad.page_index,
            page_count,
        });
    }

    let mut selected = BTreeMap::new();
    for overlay in overlays {
        if selected.insert(overlay.page_index, overlay).is_some() {
            warn!(
                page = overlay.page_index,
                "duplicate overlay for page, keeping the later one"
            );
        }
    }
    Ok(selected)
}
