//! Plain-text/markdown document import use-case.
//!
//! # Responsibility
//! - Read `.txt`/`.md` files from disk as UTF-8 and persist them as
//!   `Document` rows for later coding work.
//! - Derive a plain-text preview from markdown content.
//!
//! # Invariants
//! - Unsupported extensions and non-UTF-8 bytes are rejected before any
//!   write.
//! - The document name is the file stem; the original file name is kept.

use crate::model::document::{Document, DocumentId};
use crate::repo::document_repo::{DocumentRepoError, DocumentRepository};
use log::info;
use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;

const PREVIEW_MAX_CHARS: usize = 100;

static MARKDOWN_LINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]]+)\]\(([^)]+)\)").expect("valid link regex"));
static MARKDOWN_SYMBOL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[\*_`#>~\-\[\]\(\)!]+"#).expect("valid markdown symbol regex"));
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid ws regex"));

/// Errors from document import use-cases.
#[derive(Debug)]
pub enum DocumentImportError {
    /// File extension is neither `.txt` nor `.md`.
    UnsupportedType(String),
    /// File could not be read.
    Io(std::io::Error),
    /// File bytes are not valid UTF-8 text.
    Encoding(String),
    /// Persistence-layer failure.
    Repo(DocumentRepoError),
}

impl Display for DocumentImportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedType(path) => {
                write!(f, "unsupported document type (expected .txt or .md): {path}")
            }
            Self::Io(err) => write!(f, "document read failed: {err}"),
            Self::Encoding(path) => write!(f, "document is not valid UTF-8 text: {path}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for DocumentImportError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DocumentRepoError> for DocumentImportError {
    fn from(value: DocumentRepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<std::io::Error> for DocumentImportError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Document import facade over repository implementations.
pub struct DocumentImportService<R: DocumentRepository> {
    repo: R,
}

impl<R: DocumentRepository> DocumentImportService<R> {
    /// Creates a service using the provided repository implementation.
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Imports one text/markdown file and persists it as a document.
    pub fn import_document(&self, path: impl AsRef<Path>) -> Result<Document, DocumentImportError> {
        let path = path.as_ref();
        if !has_supported_extension(path) {
            return Err(DocumentImportError::UnsupportedType(
                path.display().to_string(),
            ));
        }

        let bytes = std::fs::read(path)?;
        let content = String::from_utf8(bytes)
            .map_err(|_| DocumentImportError::Encoding(path.display().to_string()))?;

        let name = path
            .file_stem()
            .map(|value| value.to_string_lossy().into_owned())
            .unwrap_or_default();
        let original_filename = path
            .file_name()
            .map(|value| value.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut document = Document::new(name, original_filename, content);
        document.preview_text = derive_text_preview(&document.content);
        self.repo.insert_document(&document)?;

        info!(
            "event=document_import module=service status=ok chars={}",
            document.text_length
        );
        Ok(document)
    }

    /// Lists imported documents, newest first.
    pub fn list_documents(&self) -> Result<Vec<Document>, DocumentRepoError> {
        self.repo.list_documents()
    }

    /// Deletes one imported document.
    pub fn delete_document(&self, document_uuid: DocumentId) -> Result<(), DocumentRepoError> {
        self.repo.delete_document(document_uuid)
    }
}

fn has_supported_extension(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|value| value.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref(),
        Some("txt") | Some("md")
    )
}

/// Derives a plain-text preview from markdown content.
///
/// Rules: links collapse to their label, markdown symbols are stripped,
/// whitespace is normalized, and the first 100 chars are retained.
pub fn derive_text_preview(content: &str) -> Option<String> {
    let without_links = MARKDOWN_LINK_RE.replace_all(content, "$1");
    let without_symbols = MARKDOWN_SYMBOL_RE.replace_all(&without_links, " ");
    let normalized = WHITESPACE_RE.replace_all(&without_symbols, " ");
    let trimmed = normalized.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.chars().take(PREVIEW_MAX_CHARS).collect())
    }
}
