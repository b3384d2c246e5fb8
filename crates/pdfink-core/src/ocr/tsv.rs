//! Tesseract TSV output parsing
//!
//! Columns: level, page_num, block_num, par_num, line_num, word_num, left,
//! top, width, height, conf, text. Level 5 rows are words.

use super::{RecognizedWord, WordBox};
use crate::error::{PdfInkError, Result};

const WORD_LEVEL: &str = "5";
const COLUMNS: usize = 12;

/// Extract words in reading order.
///
/// Rows that are not words, or words with blank text, are skipped. A word
/// row with unparseable geometry fails the whole parse.
pub fn parse_tsv_words(tsv: &str) -> Result<Vec<RecognizedWord>> {
    let mut words = Vec::new();

    for (line_no, row) in tsv.lines().enumerate() {
        if row.is_empty() || row.starts_with("level") {
            continue;
        }
        let cols: Vec<&str> = row.splitn(COLUMNS, '\t').collect();
        if cols[0] != WORD_LEVEL {
            continue;
        }
        if cols.len() < COLUMNS {
            return Err(PdfInkError::RecognitionFailure(format!(
                "TSV line {} has {} columns, expected {}",
                line_no + 1,
                cols.len(),
                COLUMNS
            )));
        }

        let text = cols[11].trim();
        if text.is_empty() {
            continue;
        }

        let field = |i: usize| -> Result<u32> {
            cols[i].trim().parse::<u32>().map_err(|_| {
                PdfInkError::RecognitionFailure(format!(
                    "TSV line {}: bad number '{}' in column {}",
                    line_no + 1,
                    cols[i],
                    i + 1
                ))
            })
        };
        let left = field(6)?;
        let top = field(7)?;
        let width = field(8)?;
        let height = field(9)?;

        words.push(RecognizedWord {
            text: text.to_string(),
            bbox: WordBox {
                x0: left,
                y0: top,
                x1: left.saturating_add(width),
                y1: top.saturating_add(height),
            },
        });
    }

    Ok(words)
}
