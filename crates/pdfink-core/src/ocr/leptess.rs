//! In-process engine on the Tesseract C API

use std::time::Instant;

use leptess::{LepTess, Variable};
use tracing::{debug, info};

use super::engine::{requested_languages, OcrEngine};
use super::tsv::parse_tsv_words;
use super::RecognizedWord;
use crate::error::{PdfInkError, Result};
use crate::image::DecodedImage;

/// Links libtesseract instead of running the program.
///
/// A `LepTess` handle is not shareable across threads, so every call builds
/// its own. The library cannot be interrupted mid-page, so the deadline is
/// checked around the recognition call.
#[derive(Debug, Clone)]
pub struct LeptessEngine {
    page_segmentation: u8,
}

impl LeptessEngine {
    /// Load `language` once to make sure the library and its data are present
    pub fn acquire(language: &str) -> Result<Self> {
        open(language)?;
        info!(%language, "in-process OCR engine acquired");
        Ok(Self {
            page_segmentation: 3,
        })
    }

    pub fn with_page_segmentation(mut self, psm: u8) -> Self {
        self.page_segmentation = psm;
        self
    }
}

impl OcrEngine for LeptessEngine {
    fn prepare(&self, language: &str) -> Result<()> {
        if requested_languages(language).is_empty() {
            return Err(PdfInkError::OcrEngineUnavailable(format!(
                "no traineddata for language '{language}'"
            )));
        }
        open(language).map(|_| ())
    }

    fn recognize(
        &self,
        image: &DecodedImage,
        language: &str,
        deadline: Option<Instant>,
    ) -> Result<Vec<RecognizedWord>> {
        let started = Instant::now();
        check_deadline(started, deadline)?;

        let png = image.encode_png()?;
        let mut api = open(language)?;
        api.set_variable(Variable::TesseditPagesegMode, &self.page_segmentation.to_string())
            .map_err(|e| PdfInkError::RecognitionFailure(e.to_string()))?;
        api.set_image_from_mem(&png)
            .map_err(|e| PdfInkError::RecognitionFailure(format!("image not accepted: {e}")))?;

        let tsv = api
            .get_tsv_text(0)
            .map_err(|e| PdfInkError::RecognitionFailure(format!("output is not UTF-8: {e}")))?;
        check_deadline(started, deadline)?;

        let words = parse_tsv_words(&tsv)?;
        debug!(words = words.len(), %language, "leptess recognition finished");
        Ok(words)
    }
}

fn open(language: &str) -> Result<LepTess> {
    LepTess::new(None, language).map_err(|e| {
        PdfInkError::OcrEngineUnavailable(format!("cannot load language '{language}': {e}"))
    })
}

fn check_deadline(started: Instant, deadline: Option<Instant>) -> Result<()> {
    match deadline {
        Some(at) if Instant::now() >= at => Err(PdfInkError::Timeout(
            started.elapsed().as_millis() as u64,
        )),
        _ => Ok(()),
    }
}
