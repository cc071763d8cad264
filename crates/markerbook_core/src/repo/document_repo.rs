//! Imported-document repository contracts and SQLite implementation.
//!
//! # Invariants
//! - Listing is deterministic: `imported_at DESC, uuid ASC`.

use crate::db::{table_exists, DbError};
use crate::model::document::{Document, DocumentId};
use rusqlite::{params, Connection, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const DOCUMENT_SELECT_SQL: &str = "SELECT
    uuid,
    name,
    original_filename,
    content,
    preview_text,
    text_length,
    imported_at
FROM documents";

pub type DocumentRepoResult<T> = Result<T, DocumentRepoError>;

/// Errors from document repository operations.
#[derive(Debug)]
pub enum DocumentRepoError {
    /// Target document does not exist.
    NotFound(DocumentId),
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Required table is missing.
    MissingRequiredTable(&'static str),
    /// Persisted data cannot be converted to a valid read model.
    InvalidData(String),
}

impl Display for DocumentRepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "document not found: {id}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::MissingRequiredTable(table) => {
                write!(f, "document repository requires table `{table}`")
            }
            Self::InvalidData(message) => write!(f, "invalid document data: {message}"),
        }
    }
}

impl Error for DocumentRepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for DocumentRepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for DocumentRepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Repository interface for imported documents.
pub trait DocumentRepository {
    /// Persists one document record.
    fn insert_document(&self, document: &Document) -> DocumentRepoResult<()>;
    /// Loads one document by id.
    fn get_document(&self, document_uuid: DocumentId) -> DocumentRepoResult<Option<Document>>;
    /// Lists documents, newest import first.
    fn list_documents(&self) -> DocumentRepoResult<Vec<Document>>;
    /// Deletes one document.
    fn delete_document(&self, document_uuid: DocumentId) -> DocumentRepoResult<()>;
}

/// SQLite-backed document repository.
pub struct SqliteDocumentRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteDocumentRepository<'conn> {
    /// Constructs a repository from a migrated/ready connection.
    pub fn try_new(conn: &'conn Connection) -> DocumentRepoResult<Self> {
        if !table_exists(conn, "documents")? {
            return Err(DocumentRepoError::MissingRequiredTable("documents"));
        }
        Ok(Self { conn })
    }
}

impl DocumentRepository for SqliteDocumentRepository<'_> {
    fn insert_document(&self, document: &Document) -> DocumentRepoResult<()> {
        self.conn.execute(
            "INSERT INTO documents (
                uuid,
                name,
                original_filename,
                content,
                preview_text,
                text_length,
                imported_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                document.uuid.to_string(),
                document.name.as_str(),
                document.original_filename.as_str(),
                document.content.as_str(),
                document.preview_text.as_deref(),
                document.text_length,
                document.imported_at,
            ],
        )?;
        Ok(())
    }

    fn get_document(&self, document_uuid: DocumentId) -> DocumentRepoResult<Option<Document>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{DOCUMENT_SELECT_SQL} WHERE uuid = ?1;"))?;
        let mut rows = stmt.query([document_uuid.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_document_row(row)?));
        }
        Ok(None)
    }

    fn list_documents(&self) -> DocumentRepoResult<Vec<Document>> {
        let mut stmt = self.conn.prepare(&format!(
            "{DOCUMENT_SELECT_SQL} ORDER BY imported_at DESC, uuid ASC;"
        ))?;
        let mut rows = stmt.query([])?;
        let mut documents = Vec::new();
        while let Some(row) = rows.next()? {
            documents.push(parse_document_row(row)?);
        }
        Ok(documents)
    }

    fn delete_document(&self, document_uuid: DocumentId) -> DocumentRepoResult<()> {
        let changed = self.conn.execute(
            "DELETE FROM documents WHERE uuid = ?1;",
            [document_uuid.to_string()],
        )?;
        if changed == 0 {
            return Err(DocumentRepoError::NotFound(document_uuid));
        }
        Ok(())
    }
}

fn parse_document_row(row: &Row<'_>) -> DocumentRepoResult<Document> {
    let uuid_text: String = row.get("uuid")?;
    let uuid = Uuid::parse_str(&uuid_text).map_err(|_| {
        DocumentRepoError::InvalidData(format!("invalid uuid `{uuid_text}` in documents.uuid"))
    })?;

    Ok(Document {
        uuid,
        name: row.get("name")?,
        original_filename: row.get("original_filename")?,
        content: row.get("content")?,
        preview_text: row.get("preview_text")?,
        text_length: row.get("text_length")?,
        imported_at: row.get("imported_at")?,
    })
}
