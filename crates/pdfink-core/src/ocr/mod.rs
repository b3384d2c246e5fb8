//! OCR word geometry
//!
//! Turns a raster image into recognized words with pixel bounding boxes.
//!
//! The recognition backend is an injected [`OcrEngine`] handle. Callers
//! acquire one at startup (see [`TesseractEngine::acquire`]) and pass it to
//! every job; tests substitute a fake.
//!
//! ```rust,ignore
//! use pdfink_core::ocr::{recognize_image, TesseractConfig, TesseractEngine};
//!
//! let engine = TesseractEngine::acquire(TesseractConfig::default())?;
//! let words = recognize_image(&engine, &png_bytes, None, "eng", None)?;
//! ```

mod engine;
#[cfg(feature = "leptess")]
mod leptess;
mod tsv;

pub use engine::{OcrEngine, TesseractConfig, TesseractEngine};
#[cfg(feature = "leptess")]
pub use self::leptess::LeptessEngine;
pub use tsv::parse_tsv_words;

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{PdfInkError, Result};
use crate::image::{decode_image, DecodedImage, ImageFormat};

pub const DEFAULT_LANGUAGE: &str = "eng";

/// Axis-aligned word box in source image pixels; `x1`/`y1` are exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordBox {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl WordBox {
    pub fn width(&self) -> u32 {
        self.x1.saturating_sub(self.x0)
    }

    pub fn height(&self) -> u32 {
        self.y1.saturating_sub(self.y0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognizedWord {
    pub text: String,
    pub bbox: WordBox,
}

/// Lifecycle of a single recognition run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrPhase {
    Idle,
    Loading,
    Recognizing,
    Done,
    Failed,
}

/// One recognition run against an engine.
///
/// `run` always walks `Idle -> Loading -> Recognizing -> Done | Failed`;
/// the loading step is repeated on every run so no warmed state is assumed.
pub struct OcrJob<'a> {
    engine: &'a dyn OcrEngine,
    language: String,
    phase: OcrPhase,
    deadline: Option<Instant>,
}

impl<'a> OcrJob<'a> {
    pub fn new(engine: &'a dyn OcrEngine, language: &str) -> Self {
        Self {
            engine,
            language: language.to_string(),
            phase: OcrPhase::Idle,
            deadline: None,
        }
    }

    /// Stop recognizing at `deadline`; the run then fails with `Timeout`
    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn phase(&self) -> OcrPhase {
        self.phase
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn run(&mut self, image: &DecodedImage) -> Result<Vec<RecognizedWord>> {
        self.phase = OcrPhase::Idle;
        match self.drive(image) {
            Ok(words) => {
                self.phase = OcrPhase::Done;
                debug!(language = %self.language, words = words.len(), "recognition done");
                Ok(words)
            }
            Err(e) => {
                warn!(language = %self.language, phase = ?self.phase, "recognition failed: {}", e);
                self.phase = OcrPhase::Failed;
                Err(e)
            }
        }
    }

    fn drive(&mut self, image: &DecodedImage) -> Result<Vec<RecognizedWord>> {
        self.phase = OcrPhase::Loading;
        self.engine.prepare(&self.language)?;

        self.phase = OcrPhase::Recognizing;
        self.engine
            .recognize(image, &self.language, self.deadline)
            .map_err(|e| match e {
                // Anything other than an engine outage or a deadline counts as a recognition failure
                PdfInkError::OcrEngineUnavailable(_)
                | PdfInkError::RecognitionFailure(_)
                | PdfInkError::Timeout(_) => e,
                other => PdfInkError::RecognitionFailure(other.to_string()),
            })
    }
}

/// Decode `image_bytes` and run a fresh job on it.
///
/// `mime` is the declared content type, if any; the format is sniffed from
/// the bytes when it is absent or generic. Recognition is abandoned at
/// `deadline`.
pub fn recognize_image(
    engine: &dyn OcrEngine,
    image_bytes: &[u8],
    mime: Option<&str>,
    language: &str,
    deadline: Option<Instant>,
) -> Result<Vec<RecognizedWord>> {
    let format = ImageFormat::detect(mime, image_bytes)?;
    let image = decode_image(image_bytes, format)?;
    OcrJob::new(engine, language)
        .with_deadline(deadline)
        .run(&image)
}
