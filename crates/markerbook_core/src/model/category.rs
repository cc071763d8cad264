//! Category domain records and derived tree view.
//!
//! # Responsibility
//! - Define the hierarchical grouping record (`Category`).
//! - Define the derived, never-persisted tree node used by callers.
//!
//! # Invariants
//! - The parent chain never forms a cycle; a category is never its own
//!   ancestor. Repositories enforce this on every move.
//! - Child sets are derived by querying `parent_uuid`, never stored.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier for a category.
pub type CategoryId = Uuid;

/// A hierarchical grouping node for markers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    /// Stable global ID.
    pub uuid: CategoryId,
    /// Display name. Required but not unique.
    pub name: String,
    /// Optional free-text description.
    pub description: Option<String>,
    /// Parent category. `None` means root.
    pub parent_uuid: Option<CategoryId>,
    /// Epoch ms creation timestamp.
    pub created_at: i64,
}

/// Derived tree node built on demand from the category set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryNode {
    /// The category at this node.
    pub category: Category,
    /// Child nodes, sorted by category name.
    pub children: Vec<CategoryNode>,
    /// Markers assigned directly to this category.
    pub direct_marker_count: usize,
}

impl CategoryNode {
    /// Direct marker count plus the counts of every descendant node.
    pub fn marker_count(&self) -> usize {
        self.direct_marker_count
            + self
                .children
                .iter()
                .map(CategoryNode::marker_count)
                .sum::<usize>()
    }
}

/// Snapshot of all categories plus the root subset, sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryProjection {
    /// Every category, sorted by name ascending.
    pub categories: Vec<Category>,
    /// Categories without a parent, same order.
    pub roots: Vec<Category>,
}
