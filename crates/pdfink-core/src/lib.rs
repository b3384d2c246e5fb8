//! Annotation flattening and OCR word geometry
//!
//! This crate turns client-side annotations into a final PDF and extracts
//! word boxes from scanned images:
//! - `export`: flatten per-page raster overlays onto an existing PDF
//! - `ocr`: recognize words and their pixel bounding boxes in an image
//!
//! Everything operates on in-memory buffers. Both pipelines block; async
//! callers should go through `task::run_blocking` (feature `server`).

pub mod compose;
pub mod error;
pub mod export;
pub mod geometry;
pub mod image;
pub mod ocr;
pub mod serialize;
#[cfg(feature = "server")]
pub mod task;

pub use compose::{composite, CompositedPage};
pub use error::PdfInkError;
pub use export::{export, OverlayRequest};
pub use geometry::{read_geometry, read_geometry_from_bytes, PageGeometry, SourceDocument};
pub use image::{decode_image, DecodedImage, ImageFormat};
pub use ocr::{recognize_image, OcrEngine, OcrJob, OcrPhase, RecognizedWord, WordBox};
pub use serialize::{serialize, ExportResult};

/// Parse PDF bytes and return page count
pub fn get_page_count(bytes: &[u8]) -> Result<usize, PdfInkError> {
    Ok(SourceDocument::parse(bytes)?.page_count())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_count_of_garbage_is_malformed() {
        assert!(matches!(
            get_page_count(b"hello"),
            Err(PdfInkError::MalformedDocument(_))
        ));
    }
}
