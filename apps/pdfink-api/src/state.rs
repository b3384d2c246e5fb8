//! Application state for the pdfink API

use std::sync::Arc;

use pdfink_core::{OcrEngine, PdfInkError};

use crate::storage::FileStore;

/// Limits and timeouts applied to every request
#[derive(Debug, Clone)]
pub struct Limits {
    /// Largest single uploaded file
    pub max_upload_bytes: usize,
    /// Largest JSON body (`/api/save` with a data URL)
    pub max_json_bytes: usize,
    pub export_timeout_ms: u64,
    pub ocr_timeout_ms: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_upload_bytes: 30 * 1024 * 1024,
            max_json_bytes: 25 * 1024 * 1024,
            export_timeout_ms: 30_000,
            ocr_timeout_ms: 60_000,
        }
    }
}

pub struct AppState {
    pub store: FileStore,
    pub limits: Limits,
    /// Language used when an OCR request does not name one
    pub ocr_language: String,
    ocr: Result<Arc<dyn OcrEngine>, String>,
}

impl AppState {
    pub fn new(store: FileStore, limits: Limits, ocr_language: impl Into<String>) -> Self {
        Self {
            store,
            limits,
            ocr_language: ocr_language.into(),
            ocr: Err("OCR engine not configured".to_string()),
        }
    }

    pub fn with_ocr_engine(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.ocr = Ok(engine);
        self
    }

    /// Record why no engine could be acquired; OCR requests report it
    pub fn without_ocr_engine(mut self, reason: impl Into<String>) -> Self {
        self.ocr = Err(reason.into());
        self
    }

    pub fn ocr_engine(&self) -> Result<Arc<dyn OcrEngine>, PdfInkError> {
        self.ocr
            .as_ref()
            .map(Arc::clone)
            .map_err(|reason| PdfInkError::OcrEngineUnavailable(reason.clone()))
    }

    /// Total request body allowed on multipart routes: one document plus
    /// room for a handful of page overlays
    pub fn max_request_bytes(&self) -> usize {
        self.limits
            .max_upload_bytes
            .saturating_mul(4)
            .max(self.limits.max_json_bytes)
    }
}
