//! Loading of drawing attachments (embedded images and files).
//!
//! Each attachment is fetched, tagged with a content type the canvas accepts and
//! turned into a `data:` URL it can embed directly.

use crate::document::BlobRef;
use crate::storage::{Backend, BoxFuture, StorageError};
use base64::{Engine, engine::general_purpose::STANDARD};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Content type assigned when nothing recognized applies.
pub const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

/// Content types the canvas can embed.
pub const ALLOWED_MIME_TYPES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/svg+xml",
    "image/gif",
    "image/webp",
    "image/bmp",
    "image/x-icon",
    "image/avif",
    "image/jfif",
    "application/vnd.excalidraw+json",
    "application/vnd.excalidrawlib+json",
    "application/json",
];

/// Scheme of URLs resolved through a backend's blob store.
pub const BLOB_URL_SCHEME: &str = "blob://";

/// An attachment ready for the canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryFile {
    pub id: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    #[serde(rename = "dataURL")]
    pub data_url: String,
    /// Creation time, milliseconds since the epoch.
    pub created: i64,
}

impl BinaryFile {
    /// Build a file with its data embedded as a `data:` URL.
    pub fn new(id: impl Into<String>, mime_type: &str, data: &[u8]) -> Self {
        Self {
            id: id.into(),
            mime_type: mime_type.to_string(),
            data_url: to_data_url(mime_type, data),
            created: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Raw result of a fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedBlob {
    /// Content type reported by the source, if any.
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Network error fetching {url}: {reason}")]
    Network { url: String, reason: String },
    #[error("Invalid attachment url: {0}")]
    InvalidUrl(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Source of attachment bytes.
#[cfg(not(target_arch = "wasm32"))]
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str) -> BoxFuture<'_, Result<FetchedBlob, FetchError>>;
}

/// Source of attachment bytes (WASM version without Send + Sync).
#[cfg(target_arch = "wasm32")]
pub trait Fetcher {
    fn fetch(&self, url: &str) -> BoxFuture<'_, Result<FetchedBlob, FetchError>>;
}

/// URL under which a blob is resolved by [`BackendFetcher`].
pub fn blob_url(blob: &BlobRef) -> String {
    format!("{}{}", BLOB_URL_SCHEME, blob)
}

/// Fetches `blob://` URLs from a backend's blob store.
pub struct BackendFetcher {
    backend: Arc<dyn Backend>,
}

impl BackendFetcher {
    /// Create a fetcher reading from `backend`.
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }
}

impl Fetcher for BackendFetcher {
    fn fetch(&self, url: &str) -> BoxFuture<'_, Result<FetchedBlob, FetchError>> {
        let blob = url.strip_prefix(BLOB_URL_SCHEME).map(BlobRef::from);
        let url = url.to_string();
        Box::pin(async move {
            let blob = blob.ok_or(FetchError::InvalidUrl(url))?;
            let stored = self.backend.read_blob(&blob).await?;
            Ok(FetchedBlob {
                content_type: Some(stored.content_type),
                data: stored.data,
            })
        })
    }
}

/// Fetch every attachment in `urls` (attachment id to URL).
///
/// Fetches run concurrently. A failed fetch is logged and its attachment left
/// out; the call itself never fails.
pub async fn load_attachments<F: Fetcher + ?Sized>(
    fetcher: &F,
    urls: &BTreeMap<String, String>,
) -> BTreeMap<String, BinaryFile> {
    let fetches = urls.iter().map(|(id, url)| async move { (id, url, fetcher.fetch(url).await) });

    let mut files = BTreeMap::new();
    for (id, url, result) in join_all(fetches).await {
        match result {
            Ok(blob) => {
                let mime = resolve_mime_type(blob.content_type.as_deref(), &blob.data);
                files.insert(id.clone(), BinaryFile::new(id.clone(), mime, &blob.data));
            }
            Err(e) => log::warn!("Skipping attachment {} ({}): {}", id, url, e),
        }
    }
    files
}

/// Pick the content type to tag an attachment with.
///
/// A reported type on the allow-list wins. Otherwise the bytes are sniffed,
/// and anything unrecognized becomes [`FALLBACK_MIME_TYPE`].
pub fn resolve_mime_type(reported: Option<&str>, data: &[u8]) -> &'static str {
    reported
        .and_then(allowed_mime_type)
        .or_else(|| sniff_mime_type(data))
        .unwrap_or(FALLBACK_MIME_TYPE)
}

/// Match a content type header against the allow-list, ignoring parameters
/// and case.
pub fn allowed_mime_type(content_type: &str) -> Option<&'static str> {
    let essence = content_type.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    ALLOWED_MIME_TYPES.iter().copied().find(|&allowed| allowed == essence)
}

/// Detect a content type from magic bytes.
pub fn sniff_mime_type(data: &[u8]) -> Option<&'static str> {
    if data.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
        return Some("image/png");
    }
    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("image/jpeg");
    }
    if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        return Some("image/gif");
    }
    if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    if data.len() >= 12 && &data[4..12] == b"ftypavif" {
        return Some("image/avif");
    }
    if data.starts_with(b"BM") && data.len() >= 14 {
        return Some("image/bmp");
    }
    if data.starts_with(&[0x00, 0x00, 0x01, 0x00]) {
        return Some("image/x-icon");
    }
    let head = String::from_utf8_lossy(&data[..data.len().min(256)]);
    let head = head.trim_start();
    if head.starts_with("<svg") || (head.starts_with("<?xml") && head.contains("<svg")) {
        return Some("image/svg+xml");
    }
    None
}

/// Encode bytes as a `data:` URL.
pub fn to_data_url(mime_type: &str, data: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type, STANDARD.encode(data))
}

/// Decode a base64 `data:` URL into its content type and bytes.
pub fn decode_data_url(url: &str) -> Option<(String, Vec<u8>)> {
    let rest = url.strip_prefix("data:")?;
    let (meta, payload) = rest.split_once(',')?;
    let mime = meta.strip_suffix(";base64")?;
    let data = STANDARD.decode(payload).ok()?;
    let mime = if mime.is_empty() { FALLBACK_MIME_TYPE } else { mime };
    Some((mime.to_string(), data))
}
