//! HTTP handlers for the pdfink API

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Bytes,
    extract::{multipart::Field, FromRequest, Multipart, Request, State},
    http::{header, HeaderMap, HeaderName},
    response::IntoResponse,
    Form, Json,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use pdfink_core::{export, recognize_image, task, ImageFormat, OverlayRequest};
use tracing::{debug, info};

use crate::error::ApiError;
use crate::models::{FilePart, OcrResponse, SaveRequest, StoredFile};
use crate::state::AppState;

const PDF_DATA_URL_PREFIX: &str = "data:application/pdf;base64,";

/// Overlay parts of an export form are named `page_<index>`
const OVERLAY_FIELD_PREFIX: &str = "page_";

/// Longest accepted OCR language string, e.g. `eng+deu+fra`
const MAX_LANGUAGE_LEN: usize = 64;

/// Health check endpoint
pub async fn health() -> &'static str {
    "ok"
}

/// Store an uploaded file as-is
pub async fn upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<StoredFile>, ApiError> {
    let file = find_file(&mut multipart, "file", state.limits.max_upload_bytes)
        .await?
        .ok_or(ApiError::Missing("No file"))?;

    let stored = state
        .store
        .save(&file.bytes, file.file_name.as_deref())
        .await?;
    Ok(Json(stored))
}

/// Store a finished PDF.
///
/// Accepts a multipart `file` part, or a `dataUrl` of the form
/// `data:application/pdf;base64,...` sent as a multipart text field, a
/// urlencoded form or a JSON body. A file part wins over a `dataUrl`.
pub async fn save(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<StoredFile>, ApiError> {
    let data_url = if is_multipart(request.headers()) {
        let mut multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| ApiError::InvalidRequest(e.body_text()))?;
        let (file, data_url) = read_save_form(&mut multipart, &state).await?;
        if let Some(file) = file {
            let stored = state
                .store
                .save(&file.bytes, file.file_name.as_deref())
                .await
                .map_err(ApiError::SaveFailed)?;
            return Ok(Json(stored));
        }
        data_url
    } else if has_content_type(request.headers(), "application/x-www-form-urlencoded") {
        check_json_length(request.headers(), &state)?;
        let Form(form) = Form::<SaveRequest>::from_request(request, &state)
            .await
            .map_err(|e| ApiError::InvalidRequest(e.body_text()))?;
        form.data_url
    } else {
        let body = Bytes::from_request(request, &state)
            .await
            .map_err(|e| ApiError::InvalidRequest(e.body_text()))?;
        if body.len() > state.limits.max_json_bytes {
            return Err(json_too_large(&state));
        }
        // Unparseable bodies are treated like an empty one
        serde_json::from_slice::<SaveRequest>(&body)
            .unwrap_or_default()
            .data_url
    };

    let data_url = data_url
        .filter(|d| !d.is_empty())
        .ok_or(ApiError::Missing("No dataUrl"))?;
    let pdf = decode_pdf_data_url(&data_url).ok_or(ApiError::BadDataUrl)?;

    let stored = state
        .store
        .save(&pdf, Some("document.pdf"))
        .await
        .map_err(ApiError::SaveFailed)?;
    Ok(Json(stored))
}

/// First `file` part and first `dataUrl` text field of a save form
async fn read_save_form(
    multipart: &mut Multipart,
    state: &AppState,
) -> Result<(Option<FilePart>, Option<String>), ApiError> {
    let mut file = None;
    let mut data_url = None;
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" if file.is_none() => {
                file = Some(read_file(field, state.limits.max_upload_bytes).await?);
            }
            "dataUrl" if data_url.is_none() => {
                let part = read_file(field, state.limits.max_json_bytes).await?;
                data_url = Some(String::from_utf8_lossy(&part.bytes).into_owned());
            }
            _ => debug!(field = %name, "ignoring form field"),
        }
    }
    Ok((file, data_url))
}

/// Reject a form body whose declared length is over the JSON limit
fn check_json_length(headers: &HeaderMap, state: &AppState) -> Result<(), ApiError> {
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    match declared {
        Some(len) if len > state.limits.max_json_bytes => Err(json_too_large(state)),
        _ => Ok(()),
    }
}

fn json_too_large(state: &AppState) -> ApiError {
    ApiError::PayloadTooLarge(format!(
        "JSON body exceeds {} bytes",
        state.limits.max_json_bytes
    ))
}

/// Recognize words in an uploaded image
pub async fn ocr(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<OcrResponse>, ApiError> {
    let mut image = None;
    let mut language = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => image = Some(read_file(field, state.limits.max_upload_bytes).await?),
            "lang" => language = Some(field.text().await?),
            _ => debug!(field = %name, "ignoring form field"),
        }
    }

    let image = image.ok_or(ApiError::Missing("No image"))?;
    let language = match language.as_deref().map(str::trim) {
        Some(lang) if !lang.is_empty() => validate_language(lang)?,
        _ => state.ocr_language.clone(),
    };
    let engine = state.ocr_engine()?;

    // The engine stops its own work at the same moment the request gives up
    let timeout_ms = state.limits.ocr_timeout_ms;
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    let words = task::run_blocking(timeout_ms, move || {
        recognize_image(
            engine.as_ref(),
            &image.bytes,
            image.content_type.as_deref(),
            &language,
            Some(deadline),
        )
    })
    .await?;

    info!(words = words.len(), "OCR request complete");
    Ok(Json(OcrResponse { words }))
}

/// Flatten page overlays onto a PDF and return the result.
///
/// The PDF comes from a `file` part or a previously stored `documentId`;
/// overlays are image parts named `page_<index>`.
pub async fn export_document(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let limit = state.limits.max_upload_bytes;
    let mut document = None;
    let mut document_id = None;
    let mut overlays = Vec::new();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            document = Some(read_file(field, limit).await?.bytes);
        } else if name == "documentId" {
            document_id = Some(field.text().await?);
        } else if let Some(index) = name.strip_prefix(OVERLAY_FIELD_PREFIX) {
            let page_index = index
                .parse::<usize>()
                .map_err(|_| ApiError::InvalidRequest(format!("Bad overlay field '{}'", name)))?;
            let part = read_file(field, limit).await?;
            let image_format = ImageFormat::detect(part.content_type.as_deref(), &part.bytes)?;
            overlays.push(OverlayRequest {
                page_index,
                image_bytes: part.bytes,
                image_format,
            });
        } else {
            debug!(field = %name, "ignoring form field");
        }
    }

    let original = match (document, document_id) {
        (Some(bytes), _) => bytes,
        (None, Some(id)) => state.store.read(id.trim()).await?,
        (None, None) => return Err(ApiError::Missing("No file")),
    };

    let result = task::run_blocking(state.limits.export_timeout_ms, move || {
        export(&original, &overlays)
    })
    .await?;

    let composited = result
        .composited_pages
        .iter()
        .map(usize::to_string)
        .collect::<Vec<_>>()
        .join(",");

    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"annotated.pdf\"".to_string(),
            ),
            (
                HeaderName::from_static("x-page-count"),
                result.page_count.to_string(),
            ),
            (HeaderName::from_static("x-composited-pages"), composited),
        ],
        result.document_bytes,
    ))
}

fn is_multipart(headers: &HeaderMap) -> bool {
    has_content_type(headers, "multipart/form-data")
}

fn has_content_type(headers: &HeaderMap, mime: &str) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with(mime))
        .unwrap_or(false)
}

/// Decode `data:application/pdf;base64,<payload>`; `None` for anything else
fn decode_pdf_data_url(data_url: &str) -> Option<Vec<u8>> {
    let payload = data_url.strip_prefix(PDF_DATA_URL_PREFIX)?.trim_end();
    if payload.is_empty() {
        return None;
    }
    BASE64.decode(payload).ok()
}

/// Language codes are passed to the engine, so only allow `[A-Za-z0-9_+]`
fn validate_language(language: &str) -> Result<String, ApiError> {
    let valid = language.len() <= MAX_LANGUAGE_LEN
        && language
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '+');
    if valid {
        Ok(language.to_string())
    } else {
        Err(ApiError::InvalidRequest(format!("Bad lang '{}'", language)))
    }
}

/// Return the first part called `field_name`, skipping the rest of the form
async fn find_file(
    multipart: &mut Multipart,
    field_name: &str,
    limit: usize,
) -> Result<Option<FilePart>, ApiError> {
    let mut found = None;
    while let Some(field) = multipart.next_field().await? {
        if found.is_none() && field.name() == Some(field_name) {
            found = Some(read_file(field, limit).await?);
        }
    }
    Ok(found)
}

/// Buffer one part, failing once it grows past `limit`
async fn read_file(mut field: Field<'_>, limit: usize) -> Result<FilePart, ApiError> {
    let file_name = field.file_name().map(str::to_string);
    let content_type = field.content_type().map(str::to_string);

    let mut bytes = Vec::new();
    while let Some(chunk) = field.chunk().await? {
        if bytes.len() + chunk.len() > limit {
            return Err(ApiError::PayloadTooLarge(format!(
                "file exceeds {} bytes",
                limit
            )));
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(FilePart {
        file_name,
        content_type,
        bytes,
    })
}
