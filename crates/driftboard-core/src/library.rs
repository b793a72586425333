//! Explicit user actions on the drawing library (sidebar operations).
//!
//! Unlike autosave, these failures are shown to the user, so every error is
//! turned into a classified [`UserError`].

use crate::document::{DrawingId, DrawingSummary, Folder, FolderId, NewFolder, OwnerId};
use crate::error::UserError;
use crate::storage::{Backend, StorageError};
use std::sync::Arc;

pub type ActionResult<T> = Result<T, UserError>;

/// Folder and drawing management for one signed-in user.
pub struct Library {
    backend: Arc<dyn Backend>,
    owner: OwnerId,
}

fn surface(action: &str, err: StorageError) -> UserError {
    let user_error = UserError::from_storage(&err);
    log::warn!("{} failed ({:?}): {}", action, user_error.category, err);
    user_error
}

impl Library {
    /// Create a library acting for `owner`.
    pub fn new(backend: Arc<dyn Backend>, owner: OwnerId) -> Self {
        Self { backend, owner }
    }

    /// Active drawings, most recently updated first.
    pub async fn drawings(&self) -> ActionResult<Vec<DrawingSummary>> {
        self.backend
            .list_drawings(&self.owner)
            .await
            .map_err(|e| surface("Listing drawings", e))
    }

    /// Drawings directly inside `folder`, or outside any folder with `None`.
    pub async fn drawings_in(&self, folder: Option<&FolderId>) -> ActionResult<Vec<DrawingSummary>> {
        let all = self.drawings().await?;
        Ok(all
            .into_iter()
            .filter(|d| d.folder_id.as_ref() == folder)
            .collect())
    }

    /// Active folders, oldest first.
    pub async fn folders(&self) -> ActionResult<Vec<Folder>> {
        self.backend
            .list_folders(&self.owner)
            .await
            .map_err(|e| surface("Listing folders", e))
    }

    pub async fn most_recent(&self) -> ActionResult<Option<DrawingId>> {
        self.backend
            .most_recent_drawing_id(&self.owner)
            .await
            .map_err(|e| surface("Finding recent drawing", e))
    }

    /// Create a folder and return its id.
    pub async fn create_folder(&self, folder: NewFolder) -> ActionResult<FolderId> {
        self.backend
            .create_folder(&self.owner, folder)
            .await
            .map_err(|e| surface("Creating folder", e))
    }

    pub async fn rename_folder(&self, id: &FolderId, name: &str) -> ActionResult<()> {
        self.backend
            .rename_folder(&self.owner, id, name)
            .await
            .map_err(|e| surface("Renaming folder", e))
    }

    /// Delete a folder. Its drawings follow once scheduled jobs run.
    pub async fn delete_folder(&self, id: &FolderId) -> ActionResult<()> {
        self.backend
            .delete_folder(&self.owner, id)
            .await
            .map_err(|e| surface("Deleting folder", e))
    }

    pub async fn rename_drawing(&self, id: &DrawingId, name: &str) -> ActionResult<()> {
        self.backend
            .rename_drawing(&self.owner, id, name)
            .await
            .map_err(|e| surface("Renaming drawing", e))
    }

    /// Soft-delete a drawing.
    pub async fn remove_drawing(&self, id: &DrawingId) -> ActionResult<()> {
        self.backend
            .delete_drawing(&self.owner, id)
            .await
            .map_err(|e| surface("Removing drawing", e))
    }

    pub async fn move_drawing(&self, id: &DrawingId, folder: Option<&FolderId>) -> ActionResult<()> {
        self.backend
            .move_drawing(&self.owner, id, folder)
            .await
            .map_err(|e| surface("Moving drawing", e))
    }
}
