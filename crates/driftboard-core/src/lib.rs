//! Driftboard Core Library
//!
//! Platform-agnostic persistence and synchronization logic for the Driftboard
//! drawing app: scene serialization, debounced autosave, drawing-switch
//! crossfades, attachment loading and the document backend contract.

pub mod attachments;
pub mod autosave;
pub mod config;
pub mod document;
pub mod error;
pub mod library;
pub mod scene;
pub mod session;
pub mod storage;
pub mod transition;

pub use attachments::{BinaryFile, Fetcher, load_attachments};
pub use autosave::{Debouncer, Persist, SaveController, NAME_SAVE_DELAY, SCENE_SAVE_DELAY};
pub use config::Settings;
pub use document::{Drawing, DrawingId, DrawingSummary, Folder, FolderId, OwnerId, SaveDrawing};
pub use error::{ErrorCategory, UserError, classify};
pub use library::Library;
pub use scene::{SceneValue, deserialize, serialize};
pub use session::{DrawingSession, LoadedScene};
pub use storage::{Backend, MemoryBackend, StorageError, StorageResult};
pub use transition::{Loadable, Slot, SlotPhase, TransitionController};
