//! Backend abstraction for persistence.

mod memory;

#[cfg(not(target_arch = "wasm32"))]
mod file;

pub use memory::MemoryBackend;

#[cfg(not(target_arch = "wasm32"))]
pub use file::FileBackend;

use crate::document::{
    Blob, BlobRef, Drawing, DrawingId, DrawingSummary, Folder, FolderId, NewFolder, OwnerId,
    SaveDrawing,
};
use chrono::{DateTime, TimeDelta, Utc};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use thiserror::Error;

/// Storage errors.
///
/// Messages are phrased so that [`crate::error::classify`] sorts each variant
/// into its matching category.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("Invalid input: {0}")]
    Validation(String),
    #[error("Permission denied: {0}")]
    Permission(String),
    #[error("Not authenticated")]
    Unauthenticated,
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Storage error: {0}")]
    Other(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Boxed future for async operations.
#[cfg(not(target_arch = "wasm32"))]
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Boxed future for async operations (WASM is single-threaded, no `Send`).
#[cfg(target_arch = "wasm32")]
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

macro_rules! backend_trait {
    ($($bounds:tt)*) => {
        /// Document backend: drawings, folders and blobs scoped by owner.
        ///
        /// Records belonging to another owner behave as if absent.
        pub trait Backend $($bounds)* {
            /// Upsert a drawing. Creates it with the default name if absent.
            fn save_drawing(&self, owner: &OwnerId, save: SaveDrawing) -> BoxFuture<'_, StorageResult<()>>;

            /// Fetch an active drawing.
            fn get_drawing(&self, owner: &OwnerId, id: &DrawingId) -> BoxFuture<'_, StorageResult<Option<Drawing>>>;

            /// Active drawings, most recently updated first.
            fn list_drawings(&self, owner: &OwnerId) -> BoxFuture<'_, StorageResult<Vec<DrawingSummary>>>;

            /// Id of the most recently updated active drawing.
            fn most_recent_drawing_id(&self, owner: &OwnerId) -> BoxFuture<'_, StorageResult<Option<DrawingId>>>;

            fn rename_drawing(&self, owner: &OwnerId, id: &DrawingId, name: &str) -> BoxFuture<'_, StorageResult<()>>;

            /// Soft-delete a drawing.
            fn delete_drawing(&self, owner: &OwnerId, id: &DrawingId) -> BoxFuture<'_, StorageResult<()>>;

            /// Move a drawing into a folder, or out of any folder with `None`.
            fn move_drawing(&self, owner: &OwnerId, id: &DrawingId, folder: Option<&FolderId>) -> BoxFuture<'_, StorageResult<()>>;

            fn create_folder(&self, owner: &OwnerId, folder: NewFolder) -> BoxFuture<'_, StorageResult<FolderId>>;

            fn rename_folder(&self, owner: &OwnerId, id: &FolderId, name: &str) -> BoxFuture<'_, StorageResult<()>>;

            /// Soft-delete a folder. Its drawings are soft-deleted by a
            /// scheduled job, see [`Backend::process_scheduled`].
            fn delete_folder(&self, owner: &OwnerId, id: &FolderId) -> BoxFuture<'_, StorageResult<()>>;

            /// Active folders, oldest first.
            fn list_folders(&self, owner: &OwnerId) -> BoxFuture<'_, StorageResult<Vec<Folder>>>;

            fn store_blob(&self, owner: &OwnerId, data: Vec<u8>, content_type: &str) -> BoxFuture<'_, StorageResult<BlobRef>>;

            fn read_blob(&self, blob: &BlobRef) -> BoxFuture<'_, StorageResult<Blob>>;

            /// Run pending scheduled jobs. Returns the number of records touched.
            fn process_scheduled(&self) -> BoxFuture<'_, StorageResult<usize>>;
        }
    };
}

#[cfg(not(target_arch = "wasm32"))]
backend_trait!(: Send + Sync);

#[cfg(target_arch = "wasm32")]
backend_trait!();

/// Timestamp source that never repeats a value, so newest-first ordering is
/// total even for saves within the same clock tick.
#[derive(Debug, Default)]
pub(crate) struct MonotonicClock {
    last: Mutex<Option<DateTime<Utc>>>,
}

impl MonotonicClock {
    pub(crate) fn now(&self) -> DateTime<Utc> {
        let now = Utc::now();
        let Ok(mut last) = self.last.lock() else {
            return now;
        };
        let stamp = match *last {
            Some(prev) if now <= prev => prev + TimeDelta::microseconds(1),
            _ => now,
        };
        *last = Some(stamp);
        stamp
    }
}

impl StorageError {
    pub fn drawing_not_found(id: &DrawingId) -> Self {
        StorageError::NotFound { kind: "Drawing", id: id.to_string() }
    }

    pub fn folder_not_found(id: &FolderId) -> Self {
        StorageError::NotFound { kind: "Folder", id: id.to_string() }
    }

    pub fn blob_not_found(blob: &BlobRef) -> Self {
        StorageError::NotFound { kind: "Blob", id: blob.to_string() }
    }
}

pub(crate) fn lock_error<E: std::fmt::Display>(e: E) -> StorageError {
    StorageError::Other(format!("Lock error: {}", e))
}
