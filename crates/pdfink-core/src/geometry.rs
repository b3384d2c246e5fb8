//! Page geometry extraction
//!
//! Reads the size of every page of a PDF in points (1 point = 1/72 inch).

use lopdf::{Dictionary, Document, Object, ObjectId};
use serde::Serialize;

use crate::error::{PdfInkError, Result};

/// Fallback when no page in the tree declares a MediaBox (US Letter)
const DEFAULT_MEDIA_BOX: [f64; 4] = [0.0, 0.0, 612.0, 792.0];

/// Parents are followed at most this deep when resolving inherited attributes
const MAX_TREE_DEPTH: usize = 64;

/// A parsed PDF together with its pages in document order.
///
/// Page indices are 0-based and contiguous; `pages[i]` is the object id of
/// page `i`.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub(crate) doc: Document,
    pub(crate) pages: Vec<ObjectId>,
}

impl SourceDocument {
    /// Parse PDF bytes into a document with at least one page
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let doc = Document::load_mem(bytes)
            .map_err(|e| PdfInkError::MalformedDocument(e.to_string()))?;
        Self::from_document(doc)
    }

    pub fn from_document(doc: Document) -> Result<Self> {
        // get_pages is keyed by 1-based page number, so values come out in order
        let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
        if pages.is_empty() {
            return Err(PdfInkError::MalformedDocument(
                "document has no pages".to_string(),
            ));
        }
        Ok(Self { doc, pages })
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Object id of the page at `index`, if it exists
    pub fn page_id(&self, index: usize) -> Option<ObjectId> {
        self.pages.get(index).copied()
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    pub fn into_document(self) -> Document {
        self.doc
    }
}

/// Size and placement of a single page in PDF points
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PageGeometry {
    /// Page index (0-based)
    pub index: usize,
    /// Page width in points
    pub width_pt: f64,
    /// Page height in points
    pub height_pt: f64,
    /// Lower-left x of the MediaBox
    pub origin_x: f64,
    /// Lower-left y of the MediaBox
    pub origin_y: f64,
}

/// Read the geometry of every page, in page order
pub fn read_geometry(doc: &SourceDocument) -> Result<Vec<PageGeometry>> {
    doc.pages
        .iter()
        .enumerate()
        .map(|(index, page_id)| page_geometry(&doc.doc, index, *page_id))
        .collect()
}

/// Parse `bytes` and read the geometry of every page
pub fn read_geometry_from_bytes(bytes: &[u8]) -> Result<Vec<PageGeometry>> {
    read_geometry(&SourceDocument::parse(bytes)?)
}

fn page_geometry(doc: &Document, index: usize, page_id: ObjectId) -> Result<PageGeometry> {
    let page_dict = doc
        .get_object(page_id)
        .and_then(Object::as_dict)
        .map_err(|_| PdfInkError::MalformedDocument(format!("page {} is not a dictionary", index)))?;

    let media_box = match find_inherited(doc, page_dict, b"MediaBox") {
        Some(obj) => parse_box(doc, obj).map_err(|e| {
            PdfInkError::MalformedDocument(format!("page {}: {}", index, e))
        })?,
        None => DEFAULT_MEDIA_BOX,
    };

    // Normalize so that reversed corners still give a positive size
    let (x0, x1) = ordered(media_box[0], media_box[2]);
    let (y0, y1) = ordered(media_box[1], media_box[3]);
    let width_pt = x1 - x0;
    let height_pt = y1 - y0;

    if width_pt <= 0.0 || height_pt <= 0.0 {
        return Err(PdfInkError::MalformedDocument(format!(
            "page {} has an empty MediaBox ({} x {})",
            index, width_pt, height_pt
        )));
    }

    Ok(PageGeometry {
        index,
        width_pt,
        height_pt,
        origin_x: x0,
        origin_y: y0,
    })
}

fn ordered(a: f64, b: f64) -> (f64, f64) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Look up an inheritable page attribute on the page or any ancestor
pub(crate) fn find_inherited<'a>(
    doc: &'a Document,
    page_dict: &'a Dictionary,
    key: &[u8],
) -> Option<&'a Object> {
    let mut current = page_dict;
    for _ in 0..MAX_TREE_DEPTH {
        if let Ok(value) = current.get(key) {
            return Some(value);
        }
        let parent_id = current.get(b"Parent").and_then(Object::as_reference).ok()?;
        current = doc.get_object(parent_id).and_then(Object::as_dict).ok()?;
    }
    None
}

/// Parse a box array `[x1 y1 x2 y2]`, following an indirect reference
fn parse_box(doc: &Document, obj: &Object) -> std::result::Result<[f64; 4], String> {
    let resolved = match obj {
        Object::Reference(id) => doc
            .get_object(*id)
            .map_err(|e| format!("MediaBox reference unresolved: {}", e))?,
        other => other,
    };
    let array = resolved
        .as_array()
        .map_err(|_| "MediaBox is not an array".to_string())?;
    if array.len() != 4 {
        return Err("MediaBox must have 4 elements".to_string());
    }

    let mut result = [0.0; 4];
    for (i, obj) in array.iter().enumerate() {
        result[i] = number(obj).ok_or_else(|| format!("MediaBox element {} is not a number", i))?;
    }
    Ok(result)
}

fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(n) => Some(*n as f64),
        Object::Real(n) => Some(*n as f64),
        _ => None,
    }
}
