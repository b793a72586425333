//! Error classification for user-facing messages.
//!
//! Errors reach this layer from several sources (backend, network, auth) with
//! only their message in common, so they are sorted by keywords in the
//! lower-cased message. Rules are checked in order and the first match wins.

use crate::storage::StorageError;
use serde::Serialize;
use std::fmt;

/// Broad kind of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Auth,
    NotFound,
    Validation,
    Permission,
    Server,
    Unknown,
}

const RULES: &[(ErrorCategory, &[&str])] = &[
    (
        ErrorCategory::Network,
        &["network", "fetch", "connection", "timeout", "timed out", "offline"],
    ),
    (
        ErrorCategory::Auth,
        &["not authenticated", "unauthenticated", "unauthorized", "sign in", "token", "session expired"],
    ),
    (ErrorCategory::NotFound, &["not found", "does not exist", "no such"]),
    (ErrorCategory::Validation, &["invalid", "validation", "required", "must be"]),
    (
        ErrorCategory::Permission,
        &["permission", "forbidden", "not allowed", "access denied", "does not belong"],
    ),
    (
        ErrorCategory::Server,
        &["server error", "internal", "storage error", "serialization error", "unavailable", "io error"],
    ),
];

impl ErrorCategory {
    /// Message shown to the user for this category.
    pub fn user_message(self) -> &'static str {
        match self {
            ErrorCategory::Network => "Network error. Check your connection and try again.",
            ErrorCategory::Auth => "Your session has expired. Please sign in again.",
            ErrorCategory::NotFound => "That item could not be found. It may have been deleted.",
            ErrorCategory::Validation => "Some of the information entered is invalid.",
            ErrorCategory::Permission => "You don't have permission to do that.",
            ErrorCategory::Server => "Something went wrong on our end. Please try again later.",
            ErrorCategory::Unknown => "An unexpected error occurred.",
        }
    }
}

/// Classify an error message.
pub fn classify(message: &str) -> ErrorCategory {
    let lowered = message.to_lowercase();
    RULES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lowered.contains(k)))
        .map(|(category, _)| *category)
        .unwrap_or(ErrorCategory::Unknown)
}

/// A failure of an explicit user action, ready to display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserError {
    pub category: ErrorCategory,
    pub message: String,
    /// The original error text, for logs.
    #[serde(skip)]
    pub detail: String,
}

impl UserError {
    /// Classify an arbitrary error by its message.
    pub fn from_error<E: fmt::Display + ?Sized>(err: &E) -> Self {
        let detail = err.to_string();
        Self::with_category(classify(&detail), detail)
    }

    /// Categorize a backend error by its variant. Ids and paths embedded in
    /// the message never affect the category.
    pub fn from_storage(err: &StorageError) -> Self {
        let category = match err {
            StorageError::NotFound { .. } => ErrorCategory::NotFound,
            StorageError::Validation(_) => ErrorCategory::Validation,
            StorageError::Permission(_) => ErrorCategory::Permission,
            StorageError::Unauthenticated => ErrorCategory::Auth,
            StorageError::Serialization(_) | StorageError::Io(_) | StorageError::Other(_) => {
                ErrorCategory::Server
            }
        };
        Self::with_category(category, err.to_string())
    }

    fn with_category(category: ErrorCategory, detail: String) -> Self {
        Self {
            category,
            message: category.user_message().to_string(),
            detail,
        }
    }
}

impl fmt::Display for UserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for UserError {}
