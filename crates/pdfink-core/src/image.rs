//! Raster overlay decoding
//!
//! Overlays and OCR inputs arrive as encoded bytes. They are decoded once into
//! 8-bit RGBA rows which both the compositor and the OCR adapter consume.

use std::io::Cursor;

use serde::{Deserialize, Serialize};

use crate::error::{PdfInkError, Result};

const PNG_SIGNATURE: &[u8] = &[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];

/// Raster formats accepted for overlays and OCR input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
}

impl ImageFormat {
    /// Map a declared MIME type to a format
    pub fn from_mime(mime: &str) -> Result<Self> {
        let essence = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        match essence.as_str() {
            "image/png" => Ok(Self::Png),
            other => Err(PdfInkError::UnsupportedImageFormat(other.to_string())),
        }
    }

    /// Detect the format from the leading magic bytes
    pub fn sniff(bytes: &[u8]) -> Result<Self> {
        if bytes.starts_with(PNG_SIGNATURE) {
            return Ok(Self::Png);
        }
        Err(PdfInkError::UnsupportedImageFormat(
            "unrecognized image signature".to_string(),
        ))
    }

    /// Use the declared MIME type when it is specific, otherwise sniff.
    ///
    /// Generic types like `application/octet-stream` carry no information
    /// and are ignored.
    pub fn detect(mime: Option<&str>, bytes: &[u8]) -> Result<Self> {
        match mime {
            Some(m) if !is_generic_mime(m) => Self::from_mime(m),
            _ => Self::sniff(bytes),
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
        }
    }
}

fn is_generic_mime(mime: &str) -> bool {
    let essence = mime.split(';').next().unwrap_or("").trim();
    essence.is_empty() || essence.eq_ignore_ascii_case("application/octet-stream")
}

/// A decoded image as 8-bit RGBA, rows top to bottom
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub width_px: u32,
    pub height_px: u32,
    /// `width_px * height_px * 4` bytes
    pub pixels: Vec<u8>,
}

impl DecodedImage {
    /// Build an image from RGBA samples, checking the buffer length
    pub fn from_rgba(width_px: u32, height_px: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = width_px as usize * height_px as usize * 4;
        if width_px == 0 || height_px == 0 {
            return Err(PdfInkError::CorruptImage("image has zero dimension".into()));
        }
        if pixels.len() != expected {
            return Err(PdfInkError::CorruptImage(format!(
                "expected {} RGBA bytes, got {}",
                expected,
                pixels.len()
            )));
        }
        Ok(Self {
            width_px,
            height_px,
            pixels,
        })
    }

    /// True when every pixel has full alpha
    pub fn is_opaque(&self) -> bool {
        self.pixels.chunks_exact(4).all(|px| px[3] == u8::MAX)
    }

    /// Split into packed RGB samples and a separate alpha plane
    pub fn split_alpha(&self) -> (Vec<u8>, Vec<u8>) {
        let count = self.pixels.len() / 4;
        let mut rgb = Vec::with_capacity(count * 3);
        let mut alpha = Vec::with_capacity(count);
        for px in self.pixels.chunks_exact(4) {
            rgb.extend_from_slice(&px[..3]);
            alpha.push(px[3]);
        }
        (rgb, alpha)
    }

    /// Re-encode as an RGBA PNG
    pub fn encode_png(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut out, self.width_px, self.height_px);
            encoder.set_color(png::ColorType::Rgba);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder
                .write_header()
                .map_err(|e| PdfInkError::CorruptImage(format!("PNG header: {}", e)))?;
            writer
                .write_image_data(&self.pixels)
                .map_err(|e| PdfInkError::CorruptImage(format!("PNG data: {}", e)))?;
            writer
                .finish()
                .map_err(|e| PdfInkError::CorruptImage(format!("PNG finish: {}", e)))?;
        }
        Ok(out)
    }
}

/// Decode `bytes` as `format` into RGBA pixels
pub fn decode_image(bytes: &[u8], format: ImageFormat) -> Result<DecodedImage> {
    match format {
        ImageFormat::Png => decode_png(bytes),
    }
}

fn decode_png(bytes: &[u8]) -> Result<DecodedImage> {
    let mut decoder = png::Decoder::new(Cursor::new(bytes));
    // Palette and low bit depths expand to 8 bits, tRNS becomes alpha
    decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);

    let mut reader = decoder
        .read_info()
        .map_err(|e| PdfInkError::CorruptImage(e.to_string()))?;
    let mut buf = vec![0; reader.output_buffer_size()];
    let info = reader
        .next_frame(&mut buf)
        .map_err(|e| PdfInkError::CorruptImage(e.to_string()))?;
    buf.truncate(info.buffer_size());

    if info.bit_depth != png::BitDepth::Eight {
        return Err(PdfInkError::CorruptImage(format!(
            "unexpected bit depth after expansion: {:?}",
            info.bit_depth
        )));
    }

    let rgba = match info.color_type {
        png::ColorType::Rgba => buf,
        png::ColorType::Rgb => buf
            .chunks_exact(3)
            .flat_map(|p| [p[0], p[1], p[2], u8::MAX])
            .collect(),
        png::ColorType::GrayscaleAlpha => buf
            .chunks_exact(2)
            .flat_map(|p| [p[0], p[0], p[0], p[1]])
            .collect(),
        png::ColorType::Grayscale => buf.iter().flat_map(|&g| [g, g, g, u8::MAX]).collect(),
        png::ColorType::Indexed => {
            return Err(PdfInkError::CorruptImage(
                "palette image was not expanded".to_string(),
            ))
        }
    };

    DecodedImage::from_rgba(info.width, info.height, rgba)
}
