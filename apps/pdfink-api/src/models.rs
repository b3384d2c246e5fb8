//! Request and response bodies for the pdfink API

use pdfink_core::RecognizedWord;
use serde::{Deserialize, Serialize};

/// A file written to the store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredFile {
    pub id: String,
    /// Public path, `/d/<stored name>`
    pub url: String,
}

/// JSON body accepted by `POST /api/save`
#[derive(Debug, Default, Deserialize)]
pub struct SaveRequest {
    #[serde(rename = "dataUrl")]
    pub data_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OcrResponse {
    pub words: Vec<RecognizedWord>,
}

/// A file part pulled out of a multipart form
#[derive(Debug)]
pub struct FilePart {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}
