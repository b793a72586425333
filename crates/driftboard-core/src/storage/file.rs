//! File-based backend implementation for native platforms.

use super::{BoxFuture, Backend, MonotonicClock, StorageError, StorageResult, lock_error};
use crate::document::{
    Blob, BlobRef, Drawing, DrawingId, DrawingSummary, Folder, FolderId, NewFolder, OwnerId,
    SaveDrawing, normalize_name,
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Sidecar metadata stored next to each blob.
#[derive(Serialize, Deserialize)]
struct BlobMeta {
    owner: OwnerId,
    content_type: String,
}

/// A folder cascade waiting for [`Backend::process_scheduled`].
#[derive(Serialize, Deserialize)]
struct CascadeJob {
    owner: OwnerId,
    folder_id: FolderId,
}

/// File-based backend for native platforms.
///
/// Layout under the base directory:
/// `drawings/<owner>/<id>.json`, `folders/<owner>/<id>.json`,
/// `blobs/<ref>.bin` with a `blobs/<ref>.meta.json` sidecar, and
/// `jobs/cascade-<folder>.json` for pending folder cascades.
///
/// Every path component is the base64url encoding of the raw id, so distinct
/// ids never share a file.
pub struct FileBackend {
    base_path: PathBuf,
    clock: MonotonicClock,
    /// Serializes read-modify-write cycles on record files.
    write_lock: Mutex<()>,
}

impl FileBackend {
    /// Create a file backend rooted at the given directory.
    ///
    /// Creates the directory if it doesn't exist.
    pub fn new(base_path: PathBuf) -> StorageResult<Self> {
        if !base_path.exists() {
            fs::create_dir_all(&base_path).map_err(|e| {
                StorageError::Io(format!("Failed to create storage directory: {}", e))
            })?;
        }
        Ok(Self {
            base_path,
            clock: MonotonicClock::default(),
            write_lock: Mutex::new(()),
        })
    }

    /// Create a file backend in the default location.
    ///
    /// On Unix: `~/.local/share/driftboard/`
    /// On Windows: `%LOCALAPPDATA%\driftboard\`
    pub fn default_location() -> StorageResult<Self> {
        let base = dirs::data_local_dir()
            .or_else(dirs::home_dir)
            .ok_or_else(|| StorageError::Io("Could not determine home directory".to_string()))?;
        Self::new(base.join("driftboard"))
    }

    /// Get the base path.
    pub fn base_path(&self) -> &PathBuf {
        &self.base_path
    }

    fn drawing_dir(&self, owner: &OwnerId) -> PathBuf {
        self.base_path.join("drawings").join(encode_component(owner.as_str()))
    }

    fn drawing_path(&self, owner: &OwnerId, id: &DrawingId) -> PathBuf {
        self.drawing_dir(owner).join(format!("{}.json", encode_component(id.as_str())))
    }

    fn folder_dir(&self, owner: &OwnerId) -> PathBuf {
        self.base_path.join("folders").join(encode_component(owner.as_str()))
    }

    fn folder_path(&self, owner: &OwnerId, id: &FolderId) -> PathBuf {
        self.folder_dir(owner).join(format!("{}.json", encode_component(id.as_str())))
    }

    fn blob_paths(&self, blob: &BlobRef) -> (PathBuf, PathBuf) {
        let dir = self.base_path.join("blobs");
        let name = encode_component(blob.as_str());
        (dir.join(format!("{}.bin", name)), dir.join(format!("{}.meta.json", name)))
    }

    fn job_dir(&self) -> PathBuf {
        self.base_path.join("jobs")
    }

    fn cascade_job_path(&self, folder: &FolderId) -> PathBuf {
        self.job_dir().join(format!("cascade-{}.json", encode_component(folder.as_str())))
    }

    fn read_drawing(&self, owner: &OwnerId, id: &DrawingId) -> StorageResult<Option<Drawing>> {
        let drawing: Option<Drawing> = read_json(&self.drawing_path(owner, id))?;
        Ok(drawing.filter(|d| &d.owner == owner && &d.id == id))
    }

    fn read_active_drawing(&self, owner: &OwnerId, id: &DrawingId) -> StorageResult<Drawing> {
        self.read_drawing(owner, id)?
            .filter(|d| d.is_active)
            .ok_or_else(|| StorageError::drawing_not_found(id))
    }

    fn write_drawing(&self, drawing: &Drawing) -> StorageResult<()> {
        write_json(&self.drawing_path(&drawing.owner, &drawing.id), drawing)
    }

    fn all_drawings(&self, owner: &OwnerId) -> StorageResult<Vec<Drawing>> {
        let drawings: Vec<Drawing> = read_dir_json(&self.drawing_dir(owner))?;
        Ok(drawings.into_iter().filter(|d| &d.owner == owner).collect())
    }

    /// Soft-delete the active drawings of `owner` inside `folder`.
    fn cascade(&self, owner: &OwnerId, folder: &FolderId) -> StorageResult<usize> {
        let mut count = 0;
        for mut drawing in self.all_drawings(owner)? {
            if drawing.is_active && drawing.folder_id.as_ref() == Some(folder) {
                drawing.is_active = false;
                self.write_drawing(&drawing)?;
                count += 1;
            }
        }
        log::debug!("Cascaded delete of folder {} to {} drawings", folder, count);
        Ok(count)
    }

    /// Resolve a folder the owner may use. Folders are stored per owner, so a
    /// folder found only under another owner's directory is a permission error.
    fn owned_folder(&self, owner: &OwnerId, id: &FolderId) -> StorageResult<Folder> {
        if let Some(folder) = read_json::<Folder>(&self.folder_path(owner, id))?.filter(|f| &f.owner == owner) {
            return if folder.is_active {
                Ok(folder)
            } else {
                Err(StorageError::folder_not_found(id))
            };
        }
        let folders_root = self.base_path.join("folders");
        if let Ok(entries) = fs::read_dir(&folders_root) {
            let file_name = format!("{}.json", encode_component(id.as_str()));
            if entries.flatten().any(|entry| entry.path().join(&file_name).exists()) {
                return Err(StorageError::Permission(format!(
                    "folder {} does not belong to the current user",
                    id
                )));
            }
        }
        Err(StorageError::folder_not_found(id))
    }

    fn guard(&self) -> StorageResult<std::sync::MutexGuard<'_, ()>> {
        self.write_lock.lock().map_err(lock_error)
    }
}

impl Backend for FileBackend {
    fn save_drawing(&self, owner: &OwnerId, save: SaveDrawing) -> BoxFuture<'_, StorageResult<()>> {
        let owner = owner.clone();
        Box::pin(async move {
            let _guard = self.guard()?;
            let now = self.clock.now();
            let drawing = match self.read_drawing(&owner, &save.id)? {
                Some(mut existing) => {
                    existing.apply_save(save, now);
                    existing
                }
                None => Drawing::from_save(owner, save, now),
            };
            self.write_drawing(&drawing)
        })
    }

    fn get_drawing(&self, owner: &OwnerId, id: &DrawingId) -> BoxFuture<'_, StorageResult<Option<Drawing>>> {
        let owner = owner.clone();
        let id = id.clone();
        Box::pin(async move { Ok(self.read_drawing(&owner, &id)?.filter(|d| d.is_active)) })
    }

    fn list_drawings(&self, owner: &OwnerId) -> BoxFuture<'_, StorageResult<Vec<DrawingSummary>>> {
        let owner = owner.clone();
        Box::pin(async move {
            let mut list: Vec<DrawingSummary> = self
                .all_drawings(&owner)?
                .iter()
                .filter(|d| d.is_active)
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
        let owner = owner.clone();
        let id = id.clone();
        let name = normalize_name(name);
        Box::pin(async move {
            let name = name.map_err(StorageError::Validation)?;
            let _guard = self.guard()?;
            let mut drawing = self.read_active_drawing(&owner, &id)?;
            drawing.name = name;
            drawing.updated_at = self.clock.now();
            self.write_drawing(&drawing)
        })
    }

    fn delete_drawing(&self, owner: &OwnerId, id: &DrawingId) -> BoxFuture<'_, StorageResult<()>> {
        let owner = owner.clone();
        let id = id.clone();
        Box::pin(async move {
            let _guard = self.guard()?;
            let mut drawing = self.read_active_drawing(&owner, &id)?;
            drawing.is_active = false;
            self.write_drawing(&drawing)
        })
    }

    fn move_drawing(&self, owner: &OwnerId, id: &DrawingId, folder: Option<&FolderId>) -> BoxFuture<'_, StorageResult<()>> {
        let owner = owner.clone();
        let id = id.clone();
        let folder = folder.cloned();
        Box::pin(async move {
            if let Some(folder_id) = &folder {
                self.owned_folder(&owner, folder_id)?;
            }
            let _guard = self.guard()?;
            let mut drawing = self.read_active_drawing(&owner, &id)?;
            drawing.folder_id = folder;
            self.write_drawing(&drawing)
        })
    }

    fn create_folder(&self, owner: &OwnerId, folder: NewFolder) -> BoxFuture<'_, StorageResult<FolderId>> {
        let owner = owner.clone();
        Box::pin(async move {
            let name = normalize_name(&folder.name).map_err(StorageError::Validation)?;
            let record = Folder {
                id: FolderId::generate(),
                owner,
                name,
                icon: folder.icon,
                color: folder.color,
                is_active: true,
                created_at: self.clock.now(),
            };
            write_json(&self.folder_path(&record.owner, &record.id), &record)?;
            Ok(record.id)
        })
    }

    fn rename_folder(&self, owner: &OwnerId, id: &FolderId, name: &str) -> BoxFuture<'_, StorageResult<()>> {
        let owner = owner.clone();
        let id = id.clone();
        let name = normalize_name(name);
        Box::pin(async move {
            let name = name.map_err(StorageError::Validation)?;
            let _guard = self.guard()?;
            let mut folder = self.owned_folder(&owner, &id)?;
            folder.name = name;
            write_json(&self.folder_path(&owner, &id), &folder)
        })
    }

    fn delete_folder(&self, owner: &OwnerId, id: &FolderId) -> BoxFuture<'_, StorageResult<()>> {
        let owner = owner.clone();
        let id = id.clone();
        Box::pin(async move {
            let _guard = self.guard()?;
            let mut folder = self.owned_folder(&owner, &id)?;
            folder.is_active = false;
            write_json(&self.folder_path(&owner, &id), &folder)?;
            write_json(&self.cascade_job_path(&id), &CascadeJob { owner, folder_id: id })
        })
    }

    fn list_folders(&self, owner: &OwnerId) -> BoxFuture<'_, StorageResult<Vec<Folder>>> {
        let owner = owner.clone();
        Box::pin(async move {
            let mut list: Vec<Folder> = read_dir_json::<Folder>(&self.folder_dir(&owner))?
                .into_iter()
                .filter(|f| f.is_active && f.owner == owner)
                .collect();
            list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            Ok(list)
        })
    }

    fn store_blob(&self, owner: &OwnerId, data: Vec<u8>, content_type: &str) -> BoxFuture<'_, StorageResult<BlobRef>> {
        let meta = BlobMeta {
            owner: owner.clone(),
            content_type: content_type.to_string(),
        };
        Box::pin(async move {
            let blob_ref = BlobRef::generate();
            let (data_path, meta_path) = self.blob_paths(&blob_ref);
            ensure_parent(&data_path)?;
            fs::write(&data_path, data).map_err(|e| {
                StorageError::Io(format!("Failed to write {}: {}", data_path.display(), e))
            })?;
            write_json(&meta_path, &meta)?;
            Ok(blob_ref)
        })
    }

    fn read_blob(&self, blob: &BlobRef) -> BoxFuture<'_, StorageResult<Blob>> {
        let blob = blob.clone();
        Box::pin(async move {
            let (data_path, meta_path) = self.blob_paths(&blob);
            let meta: BlobMeta = read_json(&meta_path)?.ok_or_else(|| StorageError::blob_not_found(&blob))?;
            let data = fs::read(&data_path).map_err(|e| {
                StorageError::Io(format!("Failed to read {}: {}", data_path.display(), e))
            })?;
            Ok(Blob {
                owner: meta.owner,
                content_type: meta.content_type,
                data,
            })
        })
    }

    fn process_scheduled(&self) -> BoxFuture<'_, StorageResult<usize>> {
        Box::pin(async move {
            let _guard = self.guard()?;
            let dir = self.job_dir();
            if !dir.exists() {
                return Ok(0);
            }
            let entries = fs::read_dir(&dir)
                .map_err(|e| StorageError::Io(format!("Failed to read directory: {}", e)))?;

            let mut touched = 0;
            for entry in entries.flatten() {
                let path = entry.path();
                let Some(job) = read_json::<CascadeJob>(&path)? else {
                    continue;
                };
                touched += self.cascade(&job.owner, &job.folder_id)?;
                fs::remove_file(&path).map_err(|e| {
                    StorageError::Io(format!("Failed to remove {}: {}", path.display(), e))
                })?;
            }
            Ok(touched)
        })
    }
}

/// Encode an id as a file name. The encoding is injective, so two ids never
/// map to the same path.
fn encode_component(id: &str) -> String {
    URL_SAFE_NO_PAD.encode(id.as_bytes())
}

fn ensure_parent(path: &Path) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            StorageError::Io(format!("Failed to create {}: {}", parent.display(), e))
        })?;
    }
    Ok(())
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> StorageResult<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let json = fs::read_to_string(path).map_err(|e| {
        StorageError::Io(format!("Failed to read {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&json).map(Some).map_err(|e| {
        StorageError::Serialization(format!("Failed to parse {}: {}", path.display(), e))
    })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> StorageResult<()> {
    ensure_parent(path)?;
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    fs::write(path, json).map_err(|e| {
        StorageError::Io(format!("Failed to write {}: {}", path.display(), e))
    })
}

fn read_dir_json<T: for<'de> Deserialize<'de>>(dir: &Path) -> StorageResult<Vec<T>> {
    if !dir.exists() {
        return Ok(vec![]);
    }
    let entries = fs::read_dir(dir).map_err(|e| {
        StorageError::Io(format!("Failed to read directory: {}", e))
    })?;

    let mut records = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        // Only include .json files
        if path.extension().map(|e| e == "json").unwrap_or(false) {
            if let Some(record) = read_json(&path)? {
                records.push(record);
            }
        }
    }
    Ok(records)
}
