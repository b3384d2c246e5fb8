use thiserror::Error;

#[derive(Error, Debug)]
pub enum PdfInkError {
    #[error("Malformed PDF document: {0}")]
    MalformedDocument(String),

    #[error("Page index {index} is out of range for a document with {page_count} pages")]
    PageIndexOutOfRange { index: usize, page_count: usize },

    #[error("Unsupported image format: {0}")]
    UnsupportedImageFormat(String),

    #[error("Corrupt image: {0}")]
    CorruptImage(String),

    #[error("Failed to serialize PDF: {0}")]
    SerializationFailure(String),

    #[error("OCR engine unavailable: {0}")]
    OcrEngineUnavailable(String),

    #[error("Text recognition failed: {0}")]
    RecognitionFailure(String),

    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    #[error("Worker task panicked: {0}")]
    TaskPanicked(String),
}

impl PdfInkError {
    /// Stable machine-readable code for this error kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedDocument(_) => "MALFORMED_DOCUMENT",
            Self::PageIndexOutOfRange { .. } => "PAGE_INDEX_OUT_OF_RANGE",
            Self::UnsupportedImageFormat(_) => "UNSUPPORTED_IMAGE_FORMAT",
            Self::CorruptImage(_) => "CORRUPT_IMAGE",
            Self::SerializationFailure(_) => "SERIALIZATION_FAILURE",
            Self::OcrEngineUnavailable(_) => "OCR_ENGINE_UNAVAILABLE",
            Self::RecognitionFailure(_) => "RECOGNITION_FAILURE",
            Self::Timeout(_) => "TIMEOUT",
            Self::TaskPanicked(_) => "TASK_PANICKED",
        }
    }

    /// True when the caller sent something the core cannot work with
    pub fn is_bad_input(&self) -> bool {
        matches!(
            self,
            Self::MalformedDocument(_)
                | Self::PageIndexOutOfRange { .. }
                | Self::UnsupportedImageFormat(_)
                | Self::CorruptImage(_)
        )
    }
}

pub type Result<T, E = PdfInkError> = std::result::Result<T, E>;
