//! Imported source-document record.
//!
//! # Invariants
//! - `content` is valid UTF-8 text; binary files are rejected at import.
//! - `text_length` is the character count of `content`, fixed at import.

use crate::model::now_epoch_ms;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier for an imported document.
pub type DocumentId = Uuid;

/// A plain-text or markdown source document imported for later coding work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Stable global ID.
    pub uuid: DocumentId,
    /// Display name, derived from the file stem.
    pub name: String,
    /// File name the document was imported from.
    pub original_filename: String,
    /// Full UTF-8 text content.
    pub content: String,
    /// Derived plain-text preview, if the content yields one.
    pub preview_text: Option<String>,
    /// Character count of `content`.
    pub text_length: i64,
    /// Epoch ms import timestamp.
    pub imported_at: i64,
}

impl Document {
    /// Creates a document record stamped with the current time.
    pub fn new(
        name: impl Into<String>,
        original_filename: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let content = content.into();
        Self {
            uuid: Uuid::new_v4(),
            name: name.into(),
            original_filename: original_filename.into(),
            text_length: content.chars().count() as i64,
            content,
            preview_text: None,
            imported_at: now_epoch_ms(),
        }
    }
}
