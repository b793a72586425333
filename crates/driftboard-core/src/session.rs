//! Synchronization between the canvas and the backend for one signed-in user.
//!
//! [`DrawingSession`] receives the canvas's change callbacks, debounces them
//! into backend saves, flushes pending work when the user navigates to another
//! drawing, and drives the crossfade into the newly opened drawing.

use crate::attachments::{BackendFetcher, BinaryFile, Fetcher, blob_url, decode_data_url, load_attachments};
use crate::autosave::{Persist, SaveController};
use crate::config::Settings;
use crate::document::{BlobRef, Drawing, DrawingId, FolderId, OwnerId, SaveDrawing};
use crate::scene::{SceneValue, deserialize, serialize};
use crate::storage::{Backend, BoxFuture, StorageResult, lock_error};
use crate::transition::{Loadable, RequestOutcome, Slot, TransitionController};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

#[cfg(not(target_arch = "wasm32"))]
use std::time::Instant;

#[cfg(target_arch = "wasm32")]
use web_time::Instant;

/// A canvas change waiting to be saved.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenePayload {
    pub drawing_id: DrawingId,
    pub elements: Vec<Value>,
    /// View state, already serialized.
    pub app_state: Value,
    pub files: BTreeMap<String, BinaryFile>,
}

/// A name edit waiting to be saved.
#[derive(Debug, Clone, PartialEq)]
pub struct NamePayload {
    pub drawing_id: DrawingId,
    pub name: String,
}

/// Drawing data prepared for the canvas.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedScene {
    pub name: String,
    pub elements: Vec<Value>,
    pub app_state: SceneValue,
    pub files: BTreeMap<String, BinaryFile>,
    pub folder_id: Option<FolderId>,
}

/// What a [`DrawingSession::tick`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub scene_saved: bool,
    pub name_saved: bool,
    pub promoted: Option<Slot>,
}

/// Persists payloads for one owner, uploading canvas files to the blob store.
struct DrawingSink {
    backend: Arc<dyn Backend>,
    owner: OwnerId,
    /// Blob references of the current drawing's files, by attachment id.
    blobs: Mutex<BTreeMap<String, BlobRef>>,
}

impl DrawingSink {
    /// Start tracking a different drawing's files.
    fn reset(&self, known: BTreeMap<String, BlobRef>) -> StorageResult<()> {
        *self.blobs.lock().map_err(lock_error)? = known;
        Ok(())
    }
}

impl Persist<ScenePayload> for DrawingSink {
    fn persist(&self, payload: ScenePayload) -> BoxFuture<'_, StorageResult<()>> {
        Box::pin(async move {
            for (file_id, file) in &payload.files {
                let known = self.blobs.lock().map_err(lock_error)?.contains_key(file_id);
                if known {
                    continue;
                }
                let Some((mime, data)) = decode_data_url(&file.data_url) else {
                    log::warn!("Attachment {} has no inline data, not uploading", file_id);
                    continue;
                };
                match self.backend.store_blob(&self.owner, data, &mime).await {
                    Ok(blob) => {
                        self.blobs.lock().map_err(lock_error)?.insert(file_id.clone(), blob);
                    }
                    // Retried on the next save, the scene itself still goes out.
                    Err(e) => log::warn!("Failed to upload attachment {}: {}", file_id, e),
                }
            }

            // Files that failed to load are absent from the canvas but keep
            // their stored reference.
            let files = self.blobs.lock().map_err(lock_error)?.clone();
            let save = SaveDrawing {
                id: payload.drawing_id,
                elements: payload.elements,
                app_state: payload.app_state,
                files: (!files.is_empty()).then_some(files),
            };
            self.backend.save_drawing(&self.owner, save).await
        })
    }
}

impl Persist<NamePayload> for DrawingSink {
    fn persist(&self, payload: NamePayload) -> BoxFuture<'_, StorageResult<()>> {
        Box::pin(async move {
            self.backend
                .rename_drawing(&self.owner, &payload.drawing_id, &payload.name)
                .await
        })
    }
}

/// Canvas-to-backend synchronization for one signed-in user.
pub struct DrawingSession {
    backend: Arc<dyn Backend>,
    fetcher: Arc<dyn Fetcher>,
    sink: DrawingSink,
    current: Option<DrawingId>,
    scene_saver: SaveController<ScenePayload>,
    name_saver: SaveController<NamePayload>,
    transitions: TransitionController<LoadedScene>,
    disposed: bool,
}

impl DrawingSession {
    /// Create a session fetching attachments from the backend's blob store.
    pub fn new(backend: Arc<dyn Backend>, owner: OwnerId, settings: &Settings) -> Self {
        let fetcher: Arc<dyn Fetcher> = Arc::new(BackendFetcher::new(backend.clone()));
        Self::with_fetcher(backend, fetcher, owner, settings)
    }

    /// Create a session with a custom attachment source.
    pub fn with_fetcher(
        backend: Arc<dyn Backend>,
        fetcher: Arc<dyn Fetcher>,
        owner: OwnerId,
        settings: &Settings,
    ) -> Self {
        Self {
            sink: DrawingSink {
                backend: backend.clone(),
                owner,
                blobs: Mutex::new(BTreeMap::new()),
            },
            backend,
            fetcher,
            current: None,
            scene_saver: SaveController::new("Scene save", settings.scene_delay()),
            name_saver: SaveController::new("Name save", settings.name_delay()),
            transitions: TransitionController::new(settings.transition_duration()),
            disposed: false,
        }
    }

    /// Get the signed-in user.
    pub fn owner(&self) -> &OwnerId {
        &self.sink.owner
    }

    /// The drawing the user has navigated to.
    pub fn current_drawing(&self) -> Option<&DrawingId> {
        self.current.as_ref()
    }

    pub fn transitions(&self) -> &TransitionController<LoadedScene> {
        &self.transitions
    }

    /// Whether a scene or name save is still buffered.
    pub fn has_unsaved_changes(&self) -> bool {
        self.scene_saver.is_pending() || self.name_saver.is_pending()
    }

    /// Canvas change callback for the drawing `drawing_id`.
    ///
    /// Changes from a drawing other than the current one (a canvas still
    /// mounted mid-transition) are ignored.
    pub fn on_scene_change(
        &mut self,
        drawing_id: &DrawingId,
        elements: Vec<Value>,
        app_state: &SceneValue,
        files: BTreeMap<String, BinaryFile>,
        now: Instant,
    ) {
        if !self.is_current(drawing_id) {
            log::debug!("Ignoring change from inactive drawing {}", drawing_id);
            return;
        }
        self.scene_saver.schedule(
            ScenePayload {
                drawing_id: drawing_id.clone(),
                elements,
                app_state: serialize(app_state),
                files,
            },
            now,
        );
    }

    /// Name field edit for `drawing_id`.
    pub fn on_name_change(&mut self, drawing_id: &DrawingId, name: &str, now: Instant) {
        if !self.is_current(drawing_id) {
            return;
        }
        self.name_saver.schedule(
            NamePayload {
                drawing_id: drawing_id.clone(),
                name: name.to_string(),
            },
            now,
        );
    }

    /// Drive pending saves and the crossfade. Call from the host event loop.
    pub async fn tick(&mut self, now: Instant) -> TickReport {
        if self.disposed {
            return TickReport::default();
        }
        TickReport {
            scene_saved: self.scene_saver.tick(&self.sink, now).await,
            name_saved: self.name_saver.tick(&self.sink, now).await,
            promoted: self.transitions.poll(now),
        }
    }

    /// Persist everything pending right away.
    pub async fn flush(&mut self) {
        self.scene_saver.flush(&self.sink).await;
        self.name_saver.flush(&self.sink).await;
    }

    /// Switch to `id`: flush pending saves for the previous drawing, then wait
    /// for `id`'s data via [`DrawingSession::resolve`].
    pub async fn navigate(&mut self, id: DrawingId) {
        if self.disposed {
            return;
        }
        self.flush().await;
        if let Err(e) = self.sink.reset(BTreeMap::new()) {
            log::warn!("Failed to reset attachment cache: {}", e);
        }
        log::info!("Opening drawing {}", id);
        self.current = Some(id);
    }

    /// Data for `id` has arrived; `None` means it was never saved.
    ///
    /// Results for a drawing the user has since navigated away from are
    /// dropped.
    pub async fn resolve(&mut self, id: &DrawingId, drawing: Option<Drawing>, now: Instant) -> RequestOutcome {
        if self.disposed || !self.is_current(id) {
            log::debug!("Dropping stale load of drawing {}", id);
            return RequestOutcome::Deferred;
        }
        let scene = match drawing {
            Some(drawing) => Some(self.prepare(drawing).await),
            None => None,
        };
        // Attachment fetches may have outlived the navigation.
        if !self.is_current(id) {
            return RequestOutcome::Deferred;
        }
        self.transitions.request(id, Loadable::from_option(scene), now)
    }

    /// Navigate to `id` and load it from the backend.
    ///
    /// A backend failure leaves the drawing loading; it is logged, not returned.
    pub async fn open(&mut self, id: DrawingId, now: Instant) -> RequestOutcome {
        self.navigate(id.clone()).await;
        match self.backend.get_drawing(self.owner(), &id).await {
            Ok(drawing) => self.resolve(&id, drawing, now).await,
            Err(e) => {
                log::warn!("Failed to load drawing {}: {}", id, e);
                RequestOutcome::Deferred
            }
        }
    }

    /// Start a fresh, unsaved drawing. It is created by its first save.
    pub async fn new_drawing(&mut self, now: Instant) -> DrawingId {
        let id = DrawingId::generate();
        self.navigate(id.clone()).await;
        self.resolve(&id, None, now).await;
        id
    }

    /// Open the most recently updated drawing, or a fresh one if there is none.
    pub async fn open_most_recent(&mut self, now: Instant) -> DrawingId {
        match self.backend.most_recent_drawing_id(self.owner()).await {
            Ok(Some(id)) => {
                self.open(id.clone(), now).await;
                id
            }
            Ok(None) => self.new_drawing(now).await,
            Err(e) => {
                log::warn!("Failed to look up most recent drawing: {}", e);
                self.new_drawing(now).await
            }
        }
    }

    /// Tear down: cancel all timers without saving.
    pub fn dispose(&mut self) {
        self.scene_saver.dispose();
        self.name_saver.dispose();
        self.transitions.dispose();
        self.disposed = true;
    }

    fn is_current(&self, id: &DrawingId) -> bool {
        self.current.as_ref() == Some(id)
    }

    async fn prepare(&mut self, drawing: Drawing) -> LoadedScene {
        let stored = drawing.files.unwrap_or_default();
        let urls: BTreeMap<String, String> = stored
            .iter()
            .map(|(file_id, blob)| (file_id.clone(), blob_url(blob)))
            .collect();
        let files = load_attachments(self.fetcher.as_ref(), &urls).await;
        if let Err(e) = self.sink.reset(stored) {
            log::warn!("Failed to seed attachment cache: {}", e);
        }
        LoadedScene {
            name: drawing.name,
            elements: drawing.elements,
            app_state: deserialize(&drawing.app_state),
            files,
            folder_id: drawing.folder_id,
        }
    }
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;
    use crate::attachments::{FetchError, FetchedBlob};
    use crate::scene::FOLLOWED_BY_KEY;
    use crate::storage::MemoryBackend;
    use crate::test_util::block_on;
    use crate::transition::SlotPhase;
    use serde_json::json;
    use std::time::Duration;

    const PNG: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn session(backend: &Arc<MemoryBackend>) -> DrawingSession {
        DrawingSession::new(backend.clone(), OwnerId::from("alice"), &Settings::default())
    }

    fn state(theme: &str) -> SceneValue {
        let mut state = SceneValue::object();
        state.insert("theme", theme.into());
        state
    }

    fn get(backend: &MemoryBackend, id: &DrawingId) -> Option<Drawing> {
        block_on(backend.get_drawing(&"alice".into(), id)).unwrap()
    }

    #[test]
    fn test_changes_saved_after_delay() {
        let backend = Arc::new(MemoryBackend::new());
        let mut session = session(&backend);
        let start = Instant::now();
        let id = block_on(session.new_drawing(start));

        session.on_scene_change(&id, vec![json!({ "id": "r1" })], &state("light"), BTreeMap::new(), start);
        session.on_scene_change(&id, vec![json!({ "id": "r2" })], &state("dark"), BTreeMap::new(), start + ms(300));

        assert!(!block_on(session.tick(start + ms(1000))).scene_saved);
        assert!(get(&backend, &id).is_none());

        assert!(block_on(session.tick(start + ms(1300))).scene_saved);
        let saved = get(&backend, &id).unwrap();
        assert_eq!(saved.elements, vec![json!({ "id": "r2" })]);
        assert_eq!(saved.app_state, json!({ "theme": "dark" }));
    }

    #[test]
    fn test_navigation_flushes_pending_save() {
        let backend = Arc::new(MemoryBackend::new());
        let mut session = session(&backend);
        let start = Instant::now();
        let first = block_on(session.new_drawing(start));

        session.on_scene_change(&first, vec![json!({ "id": "e" })], &state("light"), BTreeMap::new(), start);
        let second = block_on(session.new_drawing(start + ms(100)));

        assert!(get(&backend, &first).is_some());
        assert_ne!(first, second);
        assert!(!session.has_unsaved_changes());
    }

    #[test]
    fn test_dispose_drops_pending_save() {
        let backend = Arc::new(MemoryBackend::new());
        let mut session = session(&backend);
        let start = Instant::now();
        let id = block_on(session.new_drawing(start));

        session.on_scene_change(&id, vec![], &state("light"), BTreeMap::new(), start);
        session.dispose();
        block_on(session.tick(start + ms(5000)));

        assert!(get(&backend, &id).is_none());
    }

    #[test]
    fn test_change_from_inactive_drawing_ignored() {
        let backend = Arc::new(MemoryBackend::new());
        let mut session = session(&backend);
        let start = Instant::now();
        let _current = block_on(session.new_drawing(start));

        session.on_scene_change(&"other".into(), vec![], &state("light"), BTreeMap::new(), start);

        assert!(!session.has_unsaved_changes());
    }

    #[test]
    fn test_name_change_renames_after_save() {
        let backend = Arc::new(MemoryBackend::new());
        let mut session = session(&backend);
        let start = Instant::now();
        let id = block_on(session.new_drawing(start));

        session.on_scene_change(&id, vec![], &state("light"), BTreeMap::new(), start);
        block_on(session.tick(start + ms(1000)));
        session.on_name_change(&id, "Floor plan", start + ms(1000));
        assert!(block_on(session.tick(start + ms(1600))).name_saved);

        assert_eq!(get(&backend, &id).unwrap().name, "Floor plan");
    }

    #[test]
    fn test_name_change_on_unsaved_drawing_is_logged_not_raised() {
        let backend = Arc::new(MemoryBackend::new());
        let mut session = session(&backend);
        let start = Instant::now();
        let id = block_on(session.new_drawing(start));

        session.on_name_change(&id, "Early name", start);
        let report = block_on(session.tick(start + ms(600)));

        assert!(report.name_saved);
        assert!(get(&backend, &id).is_none());
    }

    #[test]
    fn test_open_restores_state_and_attachments() {
        let backend = Arc::new(MemoryBackend::new());
        let alice = OwnerId::from("alice");
        let blob = block_on(backend.store_blob(&alice, PNG.to_vec(), "image/png")).unwrap();
        block_on(backend.save_drawing(
            &alice,
            SaveDrawing {
                id: "d1".into(),
                elements: vec![json!({ "type": "image", "fileId": "img" })],
                app_state: json!({ "followedBy": ["bob"], "collaborators": {}, "theme": "dark" }),
                files: Some(BTreeMap::from([("img".to_string(), blob)])),
            },
        ))
        .unwrap();

        let mut session = session(&backend);
        let now = Instant::now();
        let outcome = block_on(session.open("d1".into(), now));

        assert_eq!(outcome, RequestOutcome::Shown(Slot::A));
        let scene = session.transitions().visible().unwrap().data.as_ref().unwrap();
        assert!(scene.app_state.get(FOLLOWED_BY_KEY).and_then(SceneValue::as_set).is_some());
        assert!(scene.app_state.get("collaborators").is_none());
        assert_eq!(scene.files["img"].mime_type, "image/png");
    }

    #[test]
    fn test_switching_drawings_crossfades() {
        let backend = Arc::new(MemoryBackend::new());
        let alice = OwnerId::from("alice");
        for id in ["one", "two"] {
            block_on(backend.save_drawing(
                &alice,
                SaveDrawing { id: id.into(), elements: vec![], app_state: json!({}), files: None },
            ))
            .unwrap();
        }
        let mut session = session(&backend);
        let now = Instant::now();

        block_on(session.open("one".into(), now));
        let outcome = block_on(session.open("two".into(), now + ms(10)));

        assert_eq!(outcome, RequestOutcome::Fading(Slot::B));
        assert_eq!(session.transitions().phase(Slot::A), SlotPhase::Outgoing);
        let report = block_on(session.tick(now + ms(600)));
        assert_eq!(report.promoted, Some(Slot::B));
        assert_eq!(session.transitions().visible().unwrap().drawing_id, DrawingId::from("two"));
    }

    #[test]
    fn test_stale_resolve_dropped() {
        let backend = Arc::new(MemoryBackend::new());
        let mut session = session(&backend);
        let now = Instant::now();

        block_on(session.navigate("first".into()));
        block_on(session.navigate("second".into()));
        let outcome = block_on(session.resolve(&"first".into(), None, now));

        assert_eq!(outcome, RequestOutcome::Deferred);
        assert!(session.transitions().visible().is_none());
    }

    #[test]
    fn test_new_files_uploaded_once() {
        let backend = Arc::new(MemoryBackend::new());
        let mut session = session(&backend);
        let start = Instant::now();
        let id = block_on(session.new_drawing(start));
        let files = BTreeMap::from([("img".to_string(), BinaryFile::new("img", "image/png", PNG))]);

        session.on_scene_change(&id, vec![], &state("light"), files.clone(), start);
        block_on(session.flush());
        let first_ref = get(&backend, &id).unwrap().files.unwrap()["img"].clone();

        session.on_scene_change(&id, vec![], &state("dark"), files, start + ms(10));
        block_on(session.flush());
        let second_ref = get(&backend, &id).unwrap().files.unwrap()["img"].clone();

        assert_eq!(first_ref, second_ref);
        assert_eq!(block_on(backend.read_blob(&first_ref)).unwrap().data, PNG);
    }

    #[test]
    fn test_failed_upload_still_saves_scene() {
        let dir = tempfile::tempdir().unwrap();
        // A plain file where the blob directory belongs makes every upload fail.
        std::fs::write(dir.path().join("blobs"), b"").unwrap();
        let backend = Arc::new(crate::storage::FileBackend::new(dir.path().to_path_buf()).unwrap());
        let mut session = DrawingSession::new(backend.clone(), OwnerId::from("alice"), &Settings::default());
        let start = Instant::now();
        let id = block_on(session.new_drawing(start));
        let files = BTreeMap::from([("img".to_string(), BinaryFile::new("img", "image/png", PNG))]);

        session.on_scene_change(&id, vec![json!({ "id": "stroke" })], &state("light"), files, start);
        block_on(session.flush());

        let saved = block_on(backend.get_drawing(&"alice".into(), &id)).unwrap().unwrap();
        assert_eq!(saved.elements, vec![json!({ "id": "stroke" })]);
        assert!(saved.files.is_none());
    }

    struct FailingFetcher;

    impl Fetcher for FailingFetcher {
        fn fetch(&self, url: &str) -> BoxFuture<'_, Result<FetchedBlob, FetchError>> {
            let url = url.to_string();
            Box::pin(async move { Err(FetchError::Network { url, reason: "offline".into() }) })
        }
    }

    #[test]
    fn test_attachment_failure_keeps_stored_reference() {
        let backend = Arc::new(MemoryBackend::new());
        let alice = OwnerId::from("alice");
        block_on(backend.save_drawing(
            &alice,
            SaveDrawing {
                id: "d1".into(),
                elements: vec![],
                app_state: json!({}),
                files: Some(BTreeMap::from([("img".to_string(), BlobRef::from("blob-1"))])),
            },
        ))
        .unwrap();
        let mut session = DrawingSession::with_fetcher(
            backend.clone(),
            Arc::new(FailingFetcher),
            alice.clone(),
            &Settings::default(),
        );
        let now = Instant::now();

        block_on(session.open("d1".into(), now));
        let scene = session.transitions().visible().unwrap().data.as_ref().unwrap();
        assert!(scene.files.is_empty());

        session.on_scene_change(&"d1".into(), vec![json!({})], &state("light"), BTreeMap::new(), now);
        block_on(session.flush());

        let files = get(&backend, &"d1".into()).unwrap().files.unwrap();
        assert_eq!(files["img"], BlobRef::from("blob-1"));
    }

    #[test]
    fn test_open_most_recent_falls_back_to_new() {
        let backend = Arc::new(MemoryBackend::new());
        let mut session = session(&backend);

        let id = block_on(session.open_most_recent(Instant::now()));

        assert_eq!(session.current_drawing(), Some(&id));
        assert!(session.transitions().visible().unwrap().data.is_none());
    }
}
