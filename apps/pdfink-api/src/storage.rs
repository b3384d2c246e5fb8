//! Flat on-disk store for uploaded and saved documents
//!
//! Files are named `<uuid><ext>` so names are unguessable and never collide.
//! Lookups only accept names of that shape, which keeps requests inside the
//! storage directory.

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::ApiError;
use crate::models::StoredFile;

/// Longest extension kept from an uploaded file name, dot excluded
const MAX_EXT_LEN: usize = 16;

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open the store, creating the directory if needed
    pub fn open(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `bytes` under a fresh id, keeping the (lowercased) extension of
    /// `original_name`
    pub async fn save(&self, bytes: &[u8], original_name: Option<&str>) -> std::io::Result<StoredFile> {
        let id = Uuid::new_v4().to_string();
        let name = format!("{}{}", id, extension_of(original_name));
        tokio::fs::write(self.root.join(&name), bytes).await?;

        tracing::info!(%name, bytes = bytes.len(), "stored file");
        Ok(StoredFile {
            url: format!("/d/{}", name),
            id,
        })
    }

    /// Read a stored document by id (`<uuid>`, meaning `<uuid>.pdf`) or by
    /// full stored name (`<uuid><ext>`)
    pub async fn read(&self, document_id: &str) -> Result<Vec<u8>, ApiError> {
        let name = stored_name(document_id)
            .ok_or_else(|| ApiError::InvalidRequest(format!("Bad documentId '{}'", document_id)))?;

        match tokio::fs::read(self.root.join(&name)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ApiError::NotFound(format!("document {}", document_id)))
            }
            Err(e) => Err(ApiError::Storage(e)),
        }
    }
}

/// `Scan.PDF` -> `.pdf`; anything odd is dropped
fn extension_of(original_name: Option<&str>) -> String {
    original_name
        .and_then(|n| Path::new(n).extension())
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= MAX_EXT_LEN)
        .filter(|e| e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default()
}

/// Map a client-supplied document id to a stored file name, or `None` if it
/// does not have the `<uuid>[.<ext>]` shape
fn stored_name(document_id: &str) -> Option<String> {
    let (stem, ext) = match document_id.split_once('.') {
        Some((stem, ext)) => (stem, Some(ext)),
        None => (document_id, None),
    };
    let id = Uuid::parse_str(stem).ok()?;

    match ext {
        None => Some(format!("{}.pdf", id.hyphenated())),
        Some(ext)
            if !ext.is_empty()
                && ext.len() <= MAX_EXT_LEN
                && ext.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()) =>
        {
            Some(format!("{}.{}", id.hyphenated(), ext))
        }
        Some(_) => None,
    }
}
