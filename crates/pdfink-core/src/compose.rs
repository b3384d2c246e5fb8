//! Flatten a raster overlay onto a page
//!
//! The overlay becomes an Image XObject drawn after the page's original
//! content, stretched over the whole MediaBox. Alpha is kept as a soft mask
//! so unannotated pixels leave the page visible.

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use serde::Serialize;
use tracing::debug;

use crate::error::{PdfInkError, Result};
use crate::geometry::{find_inherited, PageGeometry, SourceDocument};
use crate::image::DecodedImage;

const OVERLAY_NAME_PREFIX: &str = "PdfInkOverlay";

/// Outcome of flattening one overlay onto one page
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompositedPage {
    pub index: usize,
    /// Resource name the overlay image is registered under
    pub xobject_name: String,
    pub image_width_px: u32,
    pub image_height_px: u32,
    /// Whether the overlay carries a soft mask
    pub has_alpha: bool,
}

/// Draw `image` over the full area of page `geometry.index`.
///
/// The page keeps every original content stream; they run first inside their
/// own `q`/`Q` pair, then the overlay is painted on top.
pub fn composite(
    source: &mut SourceDocument,
    geometry: &PageGeometry,
    image: &DecodedImage,
) -> Result<CompositedPage> {
    let page_id = source
        .page_id(geometry.index)
        .ok_or(PdfInkError::PageIndexOutOfRange {
            index: geometry.index,
            page_count: source.page_count(),
        })?;
    let doc = &mut source.doc;

    let has_alpha = !image.is_opaque();
    let image_id = embed_image(doc, image, has_alpha)?;

    let mut resources = effective_resources(doc, page_id)?;
    let mut xobjects = resolve_dict(doc, resources.get(b"XObject").ok())?;
    let name = unused_name(&xobjects);
    xobjects.set(name.as_bytes().to_vec(), Object::Reference(image_id));
    resources.set("XObject", Object::Dictionary(xobjects));

    let original = content_refs(doc, page_id)?;
    let save_id = doc.add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));
    let overlay_ops = format!(
        "\nQ\nq\n{} 0 0 {} {} {} cm\n/{} Do\nQ\n",
        fmt_num(geometry.width_pt),
        fmt_num(geometry.height_pt),
        fmt_num(geometry.origin_x),
        fmt_num(geometry.origin_y),
        name
    );
    let draw_id = doc.add_object(Stream::new(Dictionary::new(), overlay_ops.into_bytes()));

    let mut contents = Vec::with_capacity(original.len() + 2);
    contents.push(Object::Reference(save_id));
    contents.extend(original);
    contents.push(Object::Reference(draw_id));

    let page = doc
        .get_object_mut(page_id)
        .and_then(Object::as_dict_mut)
        .map_err(|e| PdfInkError::MalformedDocument(format!("page {}: {}", geometry.index, e)))?;
    page.set("Resources", Object::Dictionary(resources));
    page.set("Contents", Object::Array(contents));

    debug!(
        page = geometry.index,
        width_px = image.width_px,
        height_px = image.height_px,
        has_alpha,
        "overlay composited"
    );

    Ok(CompositedPage {
        index: geometry.index,
        xobject_name: name,
        image_width_px: image.width_px,
        image_height_px: image.height_px,
        has_alpha,
    })
}

/// Add the image (and its soft mask, if any) as Flate-compressed XObjects
fn embed_image(doc: &mut Document, image: &DecodedImage, with_alpha: bool) -> Result<ObjectId> {
    let (rgb, alpha) = image.split_alpha();

    let mut image_dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => image.width_px as i64,
        "Height" => image.height_px as i64,
        "ColorSpace" => "DeviceRGB",
        "BitsPerComponent" => 8,
        "Filter" => "FlateDecode",
    };

    if with_alpha {
        let smask = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => image.width_px as i64,
                "Height" => image.height_px as i64,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
                "Filter" => "FlateDecode",
            },
            deflate(&alpha)?,
        );
        let smask_id = doc.add_object(smask);
        image_dict.set("SMask", Object::Reference(smask_id));
    }

    Ok(doc.add_object(Stream::new(image_dict, deflate(&rgb)?)))
}

fn deflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| PdfInkError::SerializationFailure(format!("deflate: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| PdfInkError::SerializationFailure(format!("deflate: {}", e)))
}

/// A private copy of the resources in effect for the page.
///
/// Shared or inherited dictionaries are copied so that registering the
/// overlay never touches what other pages see.
fn effective_resources(doc: &Document, page_id: ObjectId) -> Result<Dictionary> {
    let page = doc
        .get_object(page_id)
        .and_then(Object::as_dict)
        .map_err(|e| PdfInkError::MalformedDocument(e.to_string()))?;
    resolve_dict(doc, find_inherited(doc, page, b"Resources"))
}

/// Clone a dictionary that may be inline, indirect, or absent
fn resolve_dict(doc: &Document, obj: Option<&Object>) -> Result<Dictionary> {
    match obj {
        None | Some(Object::Null) => Ok(Dictionary::new()),
        Some(Object::Dictionary(dict)) => Ok(dict.clone()),
        Some(Object::Reference(id)) => doc
            .get_object(*id)
            .and_then(Object::as_dict)
            .cloned()
            .map_err(|e| PdfInkError::MalformedDocument(format!("resource dictionary: {}", e))),
        Some(other) => Err(PdfInkError::MalformedDocument(format!(
            "expected a dictionary, found {}",
            object_kind(other)
        ))),
    }
}

/// The page's content streams as a flat list of references
fn content_refs(doc: &Document, page_id: ObjectId) -> Result<Vec<Object>> {
    let page = doc
        .get_object(page_id)
        .and_then(Object::as_dict)
        .map_err(|e| PdfInkError::MalformedDocument(e.to_string()))?;

    match page.get(b"Contents") {
        Err(_) | Ok(Object::Null) => Ok(Vec::new()),
        Ok(Object::Array(items)) => Ok(items.clone()),
        Ok(Object::Reference(id)) => match doc.get_object(*id) {
            Ok(Object::Array(items)) => Ok(items.clone()),
            Ok(Object::Stream(_)) => Ok(vec![Object::Reference(*id)]),
            Ok(other) => Err(PdfInkError::MalformedDocument(format!(
                "page contents point to {}",
                object_kind(other)
            ))),
            Err(e) => Err(PdfInkError::MalformedDocument(format!(
                "page contents unresolved: {}",
                e
            ))),
        },
        Ok(other) => Err(PdfInkError::MalformedDocument(format!(
            "page contents are {}",
            object_kind(other)
        ))),
    }
}

/// Short name of an object's type for error messages
fn object_kind(obj: &Object) -> &'static str {
    match obj {
        Object::Null => "null",
        Object::Boolean(_) => "a boolean",
        Object::Integer(_) => "an integer",
        Object::Real(_) => "a real",
        Object::Name(_) => "a name",
        Object::String(..) => "a string",
        Object::Array(_) => "an array",
        Object::Dictionary(_) => "a dictionary",
        Object::Stream(_) => "a stream",
        Object::Reference(_) => "a reference",
    }
}

fn unused_name(xobjects: &Dictionary) -> String {
    let mut n = 0usize;
    loop {
        let candidate = format!("{}{}", OVERLAY_NAME_PREFIX, n);
        if !xobjects.has(candidate.as_bytes()) {
            return candidate;
        }
        n += 1;
    }
}

/// Format a coordinate without exponent notation or trailing zeros
fn fmt_num(value: f64) -> String {
    let s = format!("{:.4}", value);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() || s == "-0" {
        "0".to_string()
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::read_geometry;

    fn single_page(contents: Option<Object>, resources: Option<Object>) -> SourceDocument {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        let mut page = dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        };
        if let Some(c) = contents {
            page.set("Contents", c);
        }
        if let Some(r) = resources {
            page.set("Resources", r);
        }
        let page_id = doc.add_object(page);
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![Object::Reference(page_id)],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        SourceDocument::from_document(doc).unwrap()
    }

    fn overlay(alpha: u8) -> DecodedImage {
        DecodedImage::from_rgba(2, 2, [255, 0, 0, alpha].repeat(4)).unwrap()
    }

    fn page_dict(source: &SourceDocument) -> &Dictionary {
        source
            .doc
            .get_object(source.pages[0])
            .and_then(Object::as_dict)
            .unwrap()
    }

    #[test]
    fn test_overlay_is_drawn_last_and_full_page() {
        let mut source = single_page(None, None);
        let geometry = read_geometry(&source).unwrap()[0];
        let result = composite(&mut source, &geometry, &overlay(128)).unwrap();

        assert_eq!(result.index, 0);
        assert!(result.has_alpha);

        let contents = page_dict(&source).get(b"Contents").unwrap().as_array().unwrap();
        let last = contents.last().unwrap().as_reference().unwrap();
        let stream = source.doc.get_object(last).unwrap().as_stream().unwrap();
        let ops = String::from_utf8(stream.content.clone()).unwrap();
        assert!(ops.contains("612 0 0 792 0 0 cm"), "ops were: {}", ops);
        assert!(ops.contains(&format!("/{} Do", result.xobject_name)));
    }

    #[test]
    fn test_original_content_streams_are_kept_in_order() {
        let mut source = single_page(None, None);
        let a = source
            .doc
            .add_object(Stream::new(Dictionary::new(), b"0 0 m 10 10 l S".to_vec()));
        let b = source
            .doc
            .add_object(Stream::new(Dictionary::new(), b"BT ET".to_vec()));
        let page_id = source.pages[0];
        source
            .doc
            .get_object_mut(page_id)
            .and_then(Object::as_dict_mut)
            .unwrap()
            .set("Contents", vec![Object::Reference(a), Object::Reference(b)]);

        let geometry = read_geometry(&source).unwrap()[0];
        composite(&mut source, &geometry, &overlay(255)).unwrap();

        let contents = page_dict(&source).get(b"Contents").unwrap().as_array().unwrap();
        assert_eq!(contents.len(), 4);
        assert_eq!(contents[1], Object::Reference(a));
        assert_eq!(contents[2], Object::Reference(b));
    }

    #[test]
    fn test_opaque_overlay_has_no_soft_mask() {
        let mut source = single_page(None, None);
        let geometry = read_geometry(&source).unwrap()[0];
        let result = composite(&mut source, &geometry, &overlay(255)).unwrap();
        assert!(!result.has_alpha);

        let resources = page_dict(&source).get(b"Resources").unwrap().as_dict().unwrap();
        let xobjects = resources.get(b"XObject").unwrap().as_dict().unwrap();
        let image_id = xobjects
            .get(result.xobject_name.as_bytes())
            .unwrap()
            .as_reference()
            .unwrap();
        let image = source.doc.get_object(image_id).unwrap().as_stream().unwrap();
        assert!(image.dict.get(b"SMask").is_err());
        assert_eq!(image.dict.get(b"Width").unwrap().as_i64().unwrap(), 2);
    }

    #[test]
    fn test_transparent_overlay_gets_soft_mask() {
        let mut source = single_page(None, None);
        let geometry = read_geometry(&source).unwrap()[0];
        let result = composite(&mut source, &geometry, &overlay(0)).unwrap();

        let resources = page_dict(&source).get(b"Resources").unwrap().as_dict().unwrap();
        let xobjects = resources.get(b"XObject").unwrap().as_dict().unwrap();
        let image_id = xobjects
            .get(result.xobject_name.as_bytes())
            .unwrap()
            .as_reference()
            .unwrap();
        let image = source.doc.get_object(image_id).unwrap().as_stream().unwrap();
        let smask_id = image.dict.get(b"SMask").unwrap().as_reference().unwrap();
        let smask = source.doc.get_object(smask_id).unwrap().as_stream().unwrap();
        assert_eq!(
            smask.dict.get(b"ColorSpace").unwrap().as_name().unwrap(),
            b"DeviceGray"
        );
    }

    #[test]
    fn test_existing_fonts_survive_and_name_does_not_collide() {
        let resources = dictionary! {
            "Font" => dictionary! { "F1" => dictionary! { "Type" => "Font" } },
            "XObject" => dictionary! { "PdfInkOverlay0" => Object::Null },
        };
        let mut source = single_page(None, Some(Object::Dictionary(resources)));
        let geometry = read_geometry(&source).unwrap()[0];
        let result = composite(&mut source, &geometry, &overlay(255)).unwrap();

        assert_eq!(result.xobject_name, "PdfInkOverlay1");
        let resources = page_dict(&source).get(b"Resources").unwrap().as_dict().unwrap();
        assert!(resources.get(b"Font").unwrap().as_dict().unwrap().has(b"F1"));
    }

    #[test]
    fn test_shared_resources_are_copied_not_mutated() {
        let mut source = single_page(None, None);
        let shared = source.doc.add_object(dictionary! { "ProcSet" => vec![Object::Name(b"PDF".to_vec())] });
        let page_id = source.pages[0];
        source
            .doc
            .get_object_mut(page_id)
            .and_then(Object::as_dict_mut)
            .unwrap()
            .set("Resources", Object::Reference(shared));

        let geometry = read_geometry(&source).unwrap()[0];
        composite(&mut source, &geometry, &overlay(255)).unwrap();

        let shared_dict = source.doc.get_object(shared).and_then(Object::as_dict).unwrap();
        assert!(!shared_dict.has(b"XObject"));
        let own = page_dict(&source).get(b"Resources").unwrap().as_dict().unwrap();
        assert!(own.has(b"ProcSet"));
        assert!(own.has(b"XObject"));
    }

    #[test]
    fn test_inherited_resources_are_copied_onto_page() {
        let mut source = single_page(None, None);
        let pages_id = source.doc.catalog().unwrap().get(b"Pages").unwrap().as_reference().unwrap();
        source
            .doc
            .get_object_mut(pages_id)
            .and_then(Object::as_dict_mut)
            .unwrap()
            .set(
                "Resources",
                dictionary! { "Font" => dictionary! { "F1" => dictionary! { "Type" => "Font" } } },
            );

        let geometry = read_geometry(&source).unwrap()[0];
        let result = composite(&mut source, &geometry, &overlay(255)).unwrap();

        let own = page_dict(&source).get(b"Resources").unwrap().as_dict().unwrap();
        assert!(own.get(b"Font").unwrap().as_dict().unwrap().has(b"F1"));
        assert!(own
            .get(b"XObject")
            .unwrap()
            .as_dict()
            .unwrap()
            .has(result.xobject_name.as_bytes()));

        let parent = source.doc.get_object(pages_id).and_then(Object::as_dict).unwrap();
        let inherited = parent.get(b"Resources").unwrap().as_dict().unwrap();
        assert!(!inherited.has(b"XObject"));
    }

    #[test]
    fn test_overlay_ops_are_separated_from_original_tokens() {
        let content = source_stream(b"BT ET");
        let mut source = single_page(None, None);
        let id = source.doc.add_object(content);
        let page_id = source.pages[0];
        source
            .doc
            .get_object_mut(page_id)
            .and_then(Object::as_dict_mut)
            .unwrap()
            .set("Contents", Object::Reference(id));

        let geometry = read_geometry(&source).unwrap()[0];
        composite(&mut source, &geometry, &overlay(255)).unwrap();

        let joined = source.doc.get_page_content(page_id).unwrap();
        let joined = String::from_utf8(joined).unwrap();
        assert!(joined.starts_with("q\nBT ET\nQ\n"), "content was: {}", joined);
    }

    fn source_stream(content: &[u8]) -> Stream {
        Stream::new(Dictionary::new(), content.to_vec())
    }

    #[test]
    fn test_non_stream_contents_are_malformed() {
        let mut source = single_page(Some(Object::Integer(7)), None);
        let geometry = read_geometry(&source).unwrap()[0];
        let err = composite(&mut source, &geometry, &overlay(255)).unwrap_err();
        match err {
            PdfInkError::MalformedDocument(msg) => {
                assert_eq!(msg, "page contents are an integer")
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_non_dictionary_resources_are_malformed() {
        let mut source = single_page(None, Some(Object::Boolean(true)));
        let geometry = read_geometry(&source).unwrap()[0];
        let err = composite(&mut source, &geometry, &overlay(255)).unwrap_err();
        assert!(
            matches!(&err, PdfInkError::MalformedDocument(msg) if msg.ends_with("found a boolean")),
            "unexpected error: {:?}",
            err
        );
    }

    #[test]
    fn test_out_of_range_geometry_fails() {
        let mut source = single_page(None, None);
        let mut geometry = read_geometry(&source).unwrap()[0];
        geometry.index = 1;
        let err = composite(&mut source, &geometry, &overlay(255)).unwrap_err();
        assert!(matches!(
            err,
            PdfInkError::PageIndexOutOfRange {
                index: 1,
                page_count: 1
            }
        ));
    }

    #[test]
    fn test_fmt_num() {
        assert_eq!(fmt_num(612.0), "612");
        assert_eq!(fmt_num(595.276), "595.276");
        assert_eq!(fmt_num(0.0), "0");
        assert_eq!(fmt_num(-0.00001), "0");
        assert_eq!(fmt_num(-12.5), "-12.5");
    }
}
