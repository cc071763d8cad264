//! Marker and example domain records.
//!
//! # Responsibility
//! - Define the coded-concept record (`Marker`) and its owned illustrative
//!   examples (`Example`).
//! - Provide draft types carrying caller input into repository writes.
//!
//! # Invariants
//! - `updated_at` equals `created_at` right after creation and strictly
//!   increases on every repository update.
//! - Tags keep caller order and case verbatim.
//! - An example belongs to exactly one marker and dies with it.

use crate::model::category::CategoryId;
use crate::model::SUBTLETY_DEFAULT;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier for a marker.
pub type MarkerId = Uuid;

/// Stable identifier for a marker example.
pub type ExampleId = Uuid;

/// A named, defined coding concept used to tag text segments during
/// qualitative analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    /// Stable global ID.
    pub uuid: MarkerId,
    /// Display name. Emptiness is a UI concern; stored verbatim.
    pub name: String,
    /// What the coded concept means.
    pub definition: String,
    /// Canonical anchor example text.
    pub anchor_example: String,
    /// Coding rule / demarcation text.
    pub coding_rule: String,
    /// Ordered free-text tags, preserved verbatim.
    pub tags: Vec<String>,
    /// Owning category, if any.
    pub category_uuid: Option<CategoryId>,
    /// Epoch ms creation timestamp.
    pub created_at: i64,
    /// Epoch ms timestamp of the last repository update.
    pub updated_at: i64,
}

/// Caller input for creating a marker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkerDraft {
    pub name: String,
    pub definition: String,
    pub anchor_example: String,
    pub coding_rule: String,
    pub tags: Vec<String>,
    pub category_uuid: Option<CategoryId>,
}

/// A supporting illustrative text instance attached to one marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Example {
    /// Stable global ID.
    pub uuid: ExampleId,
    /// Owning marker.
    pub marker_uuid: MarkerId,
    /// Illustrative text.
    pub text: String,
    /// Optional surrounding context.
    pub context: Option<String>,
    /// Optional relationship type the example was observed in.
    pub relationship_type: Option<String>,
    /// Subtlety rating, 1 (obvious) to 5 (very subtle).
    pub subtlety: i64,
    /// Epoch ms creation timestamp.
    pub created_at: i64,
}

/// Caller input for attaching an example to a marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExampleDraft {
    pub text: String,
    pub context: Option<String>,
    pub relationship_type: Option<String>,
    pub subtlety: i64,
}

impl Default for ExampleDraft {
    fn default() -> Self {
        Self {
            text: String::new(),
            context: None,
            relationship_type: None,
            subtlety: SUBTLETY_DEFAULT,
        }
    }
}

impl ExampleDraft {
    /// Creates a draft with the given text and default subtlety.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}
