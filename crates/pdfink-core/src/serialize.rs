//! Write a (possibly composited) document back to bytes

use chrono::Utc;
use lopdf::{Dictionary, Document, Object, StringFormat};
use serde::Serialize;
use tracing::debug;

use crate::compose::CompositedPage;
use crate::error::{PdfInkError, Result};
use crate::geometry::SourceDocument;

pub const PRODUCER: &str = concat!("pdfink ", env!("CARGO_PKG_VERSION"));

/// Final output of an export
#[derive(Debug, Clone, Serialize)]
pub struct ExportResult {
    #[serde(skip)]
    pub document_bytes: Vec<u8>,
    pub page_count: usize,
    /// Indices of the pages that received an overlay, ascending
    pub composited_pages: Vec<usize>,
}

/// Serialize every page, modified or not, in original order.
///
/// Unreachable objects are dropped and uncompressed streams are deflated.
/// Generation metadata is written into the Info dictionary, so output bytes
/// differ between runs even for identical input.
pub fn serialize(source: SourceDocument, composited: &[CompositedPage]) -> Result<ExportResult> {
    let page_count = source.page_count();
    let mut doc = source.into_document();

    stamp_info(&mut doc);
    doc.prune_objects();
    doc.compress();

    let mut document_bytes = Vec::new();
    doc.save_to(&mut document_bytes)
        .map_err(|e| PdfInkError::SerializationFailure(e.to_string()))?;

    let written_pages = doc.get_pages().len();
    if written_pages != page_count {
        return Err(PdfInkError::SerializationFailure(format!(
            "page count changed from {} to {}",
            page_count, written_pages
        )));
    }

    let mut composited_pages: Vec<usize> = composited.iter().map(|p| p.index).collect();
    composited_pages.sort_unstable();

    debug!(
        page_count,
        bytes = document_bytes.len(),
        "document serialized"
    );

    Ok(ExportResult {
        document_bytes,
        page_count,
        composited_pages,
    })
}

/// Set Producer and ModDate, creating the Info dictionary if needed
fn stamp_info(doc: &mut Document) {
    let mod_date = Utc::now().format("D:%Y%m%d%H%M%SZ").to_string();
    let producer = Object::String(PRODUCER.as_bytes().to_vec(), StringFormat::Literal);
    let mod_date = Object::String(mod_date.into_bytes(), StringFormat::Literal);

    let info_ref = doc.trailer.get(b"Info").and_then(Object::as_reference).ok();
    if let Some(info_id) = info_ref {
        if let Ok(info) = doc.get_object_mut(info_id).and_then(Object::as_dict_mut) {
            info.set("Producer", producer);
            info.set("ModDate", mod_date);
            return;
        }
    }

    let mut info = match doc.trailer.get(b"Info") {
        Ok(Object::Dictionary(dict)) => dict.clone(),
        _ => Dictionary::new(),
    };
    info.set("Producer", producer);
    info.set("ModDate", mod_date);
    let info_id = doc.add_object(info);
    doc.trailer.set("Info", Object::Reference(info_id));
}
