//! In-memory backend implementation.

use super::{BoxFuture, Backend, MonotonicClock, StorageError, StorageResult, lock_error};
use crate::document::{
    Blob, BlobRef, Drawing, DrawingId, DrawingSummary, Folder, FolderId, NewFolder, OwnerId,
    SaveDrawing, normalize_name,
};
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

type DrawingKey = (OwnerId, DrawingId);

/// In-memory backend for testing and ephemeral use.
///
/// Folder deletion queues its cascade; drawings in the folder stay active
/// until [`Backend::process_scheduled`] runs.
#[derive(Default)]
pub struct MemoryBackend {
    drawings: RwLock<HashMap<DrawingKey, Drawing>>,
    folders: RwLock<HashMap<FolderId, Folder>>,
    blobs: RwLock<HashMap<BlobRef, Blob>>,
    pending_cascades: Mutex<Vec<(OwnerId, FolderId)>>,
    clock: MonotonicClock,
}

impl MemoryBackend {
    /// Create a new empty memory backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of folder cascades waiting to run.
    pub fn pending_jobs(&self) -> usize {
        self.pending_cascades.lock().map(|jobs| jobs.len()).unwrap_or(0)
    }

    fn owned_folder(&self, owner: &OwnerId, id: &FolderId) -> StorageResult<Folder> {
        let folders = self.folders.read().map_err(lock_error)?;
        match folders.get(id) {
            Some(folder) if &folder.owner != owner => Err(StorageError::Permission(format!(
                "folder {} does not belong to the current user",
                id
            ))),
            Some(folder) if folder.is_active => Ok(folder.clone()),
            _ => Err(StorageError::folder_not_found(id)),
        }
    }
}

impl Backend for MemoryBackend {
    fn save_drawing(&self, owner: &OwnerId, save: SaveDrawing) -> BoxFuture<'_, StorageResult<()>> {
        let owner = owner.clone();
        Box::pin(async move {
            let now = self.clock.now();
            let mut drawings = self.drawings.write().map_err(lock_error)?;
            let key = (owner.clone(), save.id.clone());
            match drawings.get_mut(&key) {
                Some(existing) => existing.apply_save(save, now),
                None => {
                    drawings.insert(key, Drawing::from_save(owner, save, now));
                }
            }
            Ok(())
        })
    }

    fn get_drawing(&self, owner: &OwnerId, id: &DrawingId) -> BoxFuture<'_, StorageResult<Option<Drawing>>> {
        let key = (owner.clone(), id.clone());
        Box::pin(async move {
            let drawings = self.drawings.read().map_err(lock_error)?;
            Ok(drawings.get(&key).filter(|d| d.is_active).cloned())
        })
    }

    fn list_drawings(&self, owner: &OwnerId) -> BoxFuture<'_, StorageResult<Vec<DrawingSummary>>> {
        let owner = owner.clone();
        Box::pin(async move {
            let drawings = self.drawings.read().map_err(lock_error)?;
            let mut list: Vec<DrawingSummary> = drawings
                .values()
                .filter(|d| d.owner == owner && d.is_active)
                .map(Drawing::summary)
                .collect();
            list.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
            Ok(list)
        })
    }

    fn most_recent_drawing_id(&self, owner: &OwnerId) -> BoxFuture<'_, StorageResult<Option<DrawingId>>> {
        let owner = owner.clone();
        Box::pin(async move {
            let list = self.list_drawings(&owner).await?;
            Ok(list.into_iter().next().map(|s| s.id))
        })
    }

    fn rename_drawing(&self, owner: &OwnerId, id: &DrawingId, name: &str) -> BoxFuture<'_, StorageResult<()>> {
        let key = (owner.clone(), id.clone());
        let name = normalize_name(name);
        Box::pin(async move {
            let name = name.map_err(StorageError::Validation)?;
            let now = self.clock.now();
            let mut drawings = self.drawings.write().map_err(lock_error)?;
            let drawing = drawings
                .get_mut(&key)
                .filter(|d| d.is_active)
                .ok_or_else(|| StorageError::drawing_not_found(&key.1))?;
            drawing.name = name;
            drawing.updated_at = now;
            Ok(())
        })
    }

    fn delete_drawing(&self, owner: &OwnerId, id: &DrawingId) -> BoxFuture<'_, StorageResult<()>> {
        let key = (owner.clone(), id.clone());
        Box::pin(async move {
            let mut drawings = self.drawings.write().map_err(lock_error)?;
            let drawing = drawings
                .get_mut(&key)
                .filter(|d| d.is_active)
                .ok_or_else(|| StorageError::drawing_not_found(&key.1))?;
            drawing.is_active = false;
            Ok(())
        })
    }

    fn move_drawing(&self, owner: &OwnerId, id: &DrawingId, folder: Option<&FolderId>) -> BoxFuture<'_, StorageResult<()>> {
        let key = (owner.clone(), id.clone());
        let folder = folder.cloned();
        Box::pin(async move {
            if let Some(folder_id) = &folder {
                self.owned_folder(&key.0, folder_id)?;
            }
            let mut drawings = self.drawings.write().map_err(lock_error)?;
            let drawing = drawings
                .get_mut(&key)
                .filter(|d| d.is_active)
                .ok_or_else(|| StorageError::drawing_not_found(&key.1))?;
            drawing.folder_id = folder;
            Ok(())
        })
    }

    fn create_folder(&self, owner: &OwnerId, folder: NewFolder) -> BoxFuture<'_, StorageResult<FolderId>> {
        let owner = owner.clone();
        Box::pin(async move {
            let name = normalize_name(&folder.name).map_err(StorageError::Validation)?;
            let id = FolderId::generate();
            let record = Folder {
                id: id.clone(),
                owner,
                name,
                icon: folder.icon,
                color: folder.color,
                is_active: true,
                created_at: self.clock.now(),
            };
            self.folders.write().map_err(lock_error)?.insert(id.clone(), record);
            Ok(id)
        })
    }

    fn rename_folder(&self, owner: &OwnerId, id: &FolderId, name: &str) -> BoxFuture<'_, StorageResult<()>> {
        let owner = owner.clone();
        let id = id.clone();
        let name = normalize_name(name);
        Box::pin(async move {
            let name = name.map_err(StorageError::Validation)?;
            self.owned_folder(&owner, &id)?;
            let mut folders = self.folders.write().map_err(lock_error)?;
            if let Some(folder) = folders.get_mut(&id) {
                folder.name = name;
            }
            Ok(())
        })
    }

    fn delete_folder(&self, owner: &OwnerId, id: &FolderId) -> BoxFuture<'_, StorageResult<()>> {
        let owner = owner.clone();
        let id = id.clone();
        Box::pin(async move {
            self.owned_folder(&owner, &id)?;
            if let Some(folder) = self.folders.write().map_err(lock_error)?.get_mut(&id) {
                folder.is_active = false;
            }
            self.pending_cascades.lock().map_err(lock_error)?.push((owner, id));
            Ok(())
        })
    }

    fn list_folders(&self, owner: &OwnerId) -> BoxFuture<'_, StorageResult<Vec<Folder>>> {
        let owner = owner.clone();
        Box::pin(async move {
            let folders = self.folders.read().map_err(lock_error)?;
            let mut list: Vec<Folder> = folders
                .values()
                .filter(|f| f.owner == owner && f.is_active)
                .cloned()
                .collect();
            list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            Ok(list)
        })
    }

    fn store_blob(&self, owner: &OwnerId, data: Vec<u8>, content_type: &str) -> BoxFuture<'_, StorageResult<BlobRef>> {
        let blob = Blob {
            owner: owner.clone(),
            content_type: content_type.to_string(),
            data,
        };
        Box::pin(async move {
            let blob_ref = BlobRef::generate();
            self.blobs.write().map_err(lock_error)?.insert(blob_ref.clone(), blob);
            Ok(blob_ref)
        })
    }

    fn read_blob(&self, blob: &BlobRef) -> BoxFuture<'_, StorageResult<Blob>> {
        let blob = blob.clone();
        Box::pin(async move {
            let blobs = self.blobs.read().map_err(lock_error)?;
            blobs.get(&blob).cloned().ok_or_else(|| StorageError::blob_not_found(&blob))
        })
    }

    fn process_scheduled(&self) -> BoxFuture<'_, StorageResult<usize>> {
        Box::pin(async move {
            let jobs = std::mem::take(&mut *self.pending_cascades.lock().map_err(lock_error)?);
            if jobs.is_empty() {
                return Ok(0);
            }
            let mut drawings = self.drawings.write().map_err(lock_error)?;
            let mut touched = 0;
            for (owner, folder_id) in jobs {
                let mut count = 0;
                for drawing in drawings.values_mut() {
                    if drawing.owner == owner
                        && drawing.is_active
                        && drawing.folder_id.as_ref() == Some(&folder_id)
                    {
                        drawing.is_active = false;
                        count += 1;
                    }
                }
                log::debug!("Cascaded delete of folder {} to {} drawings", folder_id, count);
                touched += count;
            }
            Ok(touched)
        })
    }
}
