//! Core domain logic for MarkerBook.
//! This crate is the single source of truth for codebook invariants.

pub mod codebook;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use codebook::{
    CodebookDoc, CodebookError, CodebookResult, ExampleRecord, MarkerRecord, CODEBOOK_VERSION,
};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::category::{Category, CategoryId, CategoryNode, CategoryProjection};
pub use model::document::{Document, DocumentId};
pub use model::marker::{Example, ExampleDraft, ExampleId, Marker, MarkerDraft, MarkerId};
pub use model::{ValidationError, SUBTLETY_DEFAULT, SUBTLETY_MAX, SUBTLETY_MIN};
pub use repo::category_repo::{
    CategoryRepoError, CategoryRepoResult, CategoryRepository, SqliteCategoryRepository,
};
pub use repo::document_repo::{
    DocumentRepoError, DocumentRepoResult, DocumentRepository, SqliteDocumentRepository,
};
pub use repo::marker_repo::{
    MarkerRepoError, MarkerRepoResult, MarkerRepository, SqliteMarkerRepository,
};
pub use service::document_service::{DocumentImportError, DocumentImportService};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
