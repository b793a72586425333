//! Drawing and folder records as stored by a backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Name given to a drawing created by its first save.
pub const DEFAULT_DRAWING_NAME: &str = "Untitled";

/// Longest accepted drawing or folder name, in characters.
pub const MAX_NAME_LEN: usize = 200;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Wrap an existing id.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Client-generated drawing identifier.
    DrawingId
);
string_id!(
    /// Backend-generated folder identifier.
    FolderId
);
string_id!(
    /// Identity of the signed-in user owning records.
    OwnerId
);
string_id!(
    /// Reference to a stored blob.
    BlobRef
);

impl DrawingId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl FolderId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl BlobRef {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// A stored drawing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Drawing {
    pub id: DrawingId,
    pub owner: OwnerId,
    pub name: String,
    /// Canvas elements. Opaque to this layer.
    pub elements: Vec<Value>,
    /// View state in its serialized form.
    pub app_state: Value,
    /// Attachment id to blob reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<BTreeMap<String, BlobRef>>,
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<FolderId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Drawing {
    /// Create a drawing from its first save.
    pub fn from_save(owner: OwnerId, save: SaveDrawing, now: DateTime<Utc>) -> Self {
        Self {
            id: save.id,
            owner,
            name: DEFAULT_DRAWING_NAME.to_string(),
            elements: save.elements,
            app_state: save.app_state,
            files: save.files,
            is_active: true,
            folder_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Patch the content fields from a later save.
    pub fn apply_save(&mut self, save: SaveDrawing, now: DateTime<Utc>) {
        self.elements = save.elements;
        self.app_state = save.app_state;
        self.files = save.files;
        self.updated_at = now;
    }

    /// Get the sidebar listing entry.
    pub fn summary(&self) -> DrawingSummary {
        DrawingSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            folder_id: self.folder_id.clone(),
            updated_at: self.updated_at,
        }
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Content of one save call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveDrawing {
    pub id: DrawingId,
    pub elements: Vec<Value>,
    pub app_state: Value,
    #[serde(default)]
    pub files: Option<BTreeMap<String, BlobRef>>,
}

/// Drawing metadata as listed in the sidebar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawingSummary {
    pub id: DrawingId,
    pub name: String,
    pub folder_id: Option<FolderId>,
    pub updated_at: DateTime<Utc>,
}

/// A folder grouping drawings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Folder {
    pub id: FolderId,
    pub owner: OwnerId,
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Fields for a new folder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewFolder {
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

impl NewFolder {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// A stored blob.
#[derive(Debug, Clone, PartialEq)]
pub struct Blob {
    pub owner: OwnerId,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Trim a user-supplied name and check its length.
///
/// Returns the trimmed name, or a message describing why it is invalid.
pub fn normalize_name(name: &str) -> Result<String, String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err("name is required".to_string());
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(format!("name must be at most {} characters", MAX_NAME_LEN));
    }
    Ok(trimmed.to_string())
}
