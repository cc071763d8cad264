//! YAML codebook import/export mapper.
//!
//! # Responsibility
//! - Translate between the persisted marker graph and the external YAML
//!   codebook document, losslessly in both directions.
//! - Keep the interchange key names stable; the German field names are the
//!   wire format shared with other tools.
//!
//! # Invariants
//! - Import decodes by inspecting the top-level document shape: a mapping
//!   with a `markers` key is a codebook, a sequence is a record list, any
//!   other mapping is one bare record.
//! - Import always creates new markers; it never updates existing ones.
//! - Category names resolve to the oldest existing match or create a new
//!   category, memoized per call.
//! - All import writes commit in one transaction or not at all.

use crate::db::DbError;
use crate::model::category::CategoryId;
use crate::model::marker::{Marker, MarkerId};
use crate::model::{now_epoch_ms, validate_subtlety, ValidationError, SUBTLETY_DEFAULT};
use crate::repo::marker_repo::{encode_tags, load_required_marker, MarkerRepoError};
use chrono::{SecondsFormat, Utc};
use log::info;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Version string stamped into every exported codebook envelope.
pub const CODEBOOK_VERSION: &str = "1.0";

pub type CodebookResult<T> = Result<T, CodebookError>;

/// Errors from codebook mapping operations.
#[derive(Debug)]
pub enum CodebookError {
    /// Content matches none of the three accepted document shapes.
    InvalidFormat,
    /// Content matched a shape but its records could not be decoded.
    Decoding(String),
    /// Records could not be serialized to YAML text.
    Encoding(String),
    /// A record carries an invalid field value.
    Validation(ValidationError),
    /// Underlying SQLite failure; the import batch is rolled back.
    Db(DbError),
    /// Persisted data cannot be converted to a valid record.
    InvalidData(String),
}

impl Display for CodebookError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidFormat => write!(
                f,
                "document is neither a codebook, a marker list, nor a single marker record"
            ),
            Self::Decoding(message) => write!(f, "codebook decoding failed: {message}"),
            Self::Encoding(message) => write!(f, "codebook encoding failed: {message}"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid codebook data: {message}"),
        }
    }
}

impl Error for CodebookError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ValidationError> for CodebookError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for CodebookError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for CodebookError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Codebook envelope: version, creation stamp, marker records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodebookDoc {
    pub version: String,
    /// ISO-8601 UTC timestamp of the export.
    pub created_at: String,
    pub markers: Vec<MarkerRecord>,
}

/// One marker on the wire. Key names are the external interchange format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerRecord {
    pub marker_name: String,
    pub definition: String,
    pub ankerbeispiel: String,
    pub kodierregeln_abgrenzung: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    /// Category name, not id; resolved or created on import.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Omitted entirely, not emptied, when the marker has no examples.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub examples: Option<Vec<ExampleRecord>>,
}

/// One example on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExampleRecord {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kontext: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beziehungstyp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtilitaet: Option<i64>,
}

/// Exports the given markers as a codebook document.
pub fn export_codebook(conn: &Connection, markers: &[Marker]) -> CodebookResult<String> {
    let records = markers
        .iter()
        .map(|marker| marker_to_record(conn, marker))
        .collect::<CodebookResult<Vec<_>>>()?;

    let doc = CodebookDoc {
        version: CODEBOOK_VERSION.to_string(),
        created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        markers: records,
    };

    let text =
        serde_yaml::to_string(&doc).map_err(|err| CodebookError::Encoding(err.to_string()))?;
    info!(
        "event=codebook_export module=codebook status=ok markers={}",
        markers.len()
    );
    Ok(text)
}

/// Exports one marker as a bare record without the codebook envelope.
pub fn export_marker(conn: &Connection, marker: &Marker) -> CodebookResult<String> {
    let record = marker_to_record(conn, marker)?;
    serde_yaml::to_string(&record).map_err(|err| CodebookError::Encoding(err.to_string()))
}

/// Imports markers from YAML text; every record creates a new marker.
///
/// The whole batch commits in one transaction. Any failure rolls back all
/// staged rows and surfaces the error unchanged.
pub fn import_codebook(conn: &Connection, text: &str) -> CodebookResult<Vec<Marker>> {
    let records = decode_records(text)?;

    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let mut categories_by_name: HashMap<String, CategoryId> = HashMap::new();
    let mut imported_ids: Vec<MarkerId> = Vec::new();
    for record in &records {
        imported_ids.push(insert_record(&tx, record, &mut categories_by_name)?);
    }
    tx.commit()?;

    let mut markers = Vec::new();
    for marker_uuid in imported_ids {
        markers.push(load_required_marker(conn, marker_uuid).map_err(from_marker_repo_error)?);
    }
    info!(
        "event=codebook_import module=codebook status=ok markers={}",
        markers.len()
    );
    Ok(markers)
}

/// Imports markers from raw document bytes, which must be valid UTF-8.
pub fn import_codebook_bytes(conn: &Connection, bytes: &[u8]) -> CodebookResult<Vec<Marker>> {
    let text = std::str::from_utf8(bytes)
        .map_err(|err| CodebookError::Decoding(format!("document is not valid UTF-8: {err}")))?;
    import_codebook(conn, text)
}

/// Discriminates the top-level document shape, then decodes records.
fn decode_records(text: &str) -> CodebookResult<Vec<MarkerRecord>> {
    let value: serde_yaml::Value =
        serde_yaml::from_str(text).map_err(|_| CodebookError::InvalidFormat)?;

    let markers_key = serde_yaml::Value::from("markers");
    let is_codebook = value
        .as_mapping()
        .is_some_and(|mapping| mapping.contains_key(&markers_key));

    if is_codebook {
        let doc: CodebookDoc =
            serde_yaml::from_value(value).map_err(|err| CodebookError::Decoding(err.to_string()))?;
        return Ok(doc.markers);
    }

    match value {
        serde_yaml::Value::Sequence(_) => {
            serde_yaml::from_value(value).map_err(|err| CodebookError::Decoding(err.to_string()))
        }
        serde_yaml::Value::Mapping(_) => {
            let record: MarkerRecord = serde_yaml::from_value(value)
                .map_err(|err| CodebookError::Decoding(err.to_string()))?;
            Ok(vec![record])
        }
        _ => Err(CodebookError::InvalidFormat),
    }
}

fn marker_to_record(conn: &Connection, marker: &Marker) -> CodebookResult<MarkerRecord> {
    let category = match marker.category_uuid {
        Some(category_uuid) => category_name(conn, category_uuid)?,
        None => None,
    };
    let examples = load_example_records(conn, marker.uuid)?;

    Ok(MarkerRecord {
        marker_name: marker.name.clone(),
        definition: marker.definition.clone(),
        ankerbeispiel: marker.anchor_example.clone(),
        kodierregeln_abgrenzung: marker.coding_rule.clone(),
        tags: if marker.tags.is_empty() {
            None
        } else {
            Some(marker.tags.clone())
        },
        category,
        examples: if examples.is_empty() {
            None
        } else {
            Some(examples)
        },
    })
}

fn category_name(conn: &Connection, category_uuid: CategoryId) -> CodebookResult<Option<String>> {
    let name = conn
        .query_row(
            "SELECT name FROM categories WHERE uuid = ?1;",
            [category_uuid.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(name)
}

fn load_example_records(
    conn: &Connection,
    marker_uuid: MarkerId,
) -> CodebookResult<Vec<ExampleRecord>> {
    let mut stmt = conn.prepare(
        "SELECT text, context, relationship_type, subtlety
         FROM marker_examples
         WHERE marker_uuid = ?1
         ORDER BY created_at ASC, uuid ASC;",
    )?;
    let mut rows = stmt.query([marker_uuid.to_string()])?;
    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        records.push(ExampleRecord {
            text: row.get(0)?,
            kontext: row.get(1)?,
            beziehungstyp: row.get(2)?,
            subtilitaet: Some(row.get(3)?),
        });
    }
    Ok(records)
}

fn insert_record(
    tx: &Connection,
    record: &MarkerRecord,
    categories_by_name: &mut HashMap<String, CategoryId>,
) -> CodebookResult<MarkerId> {
    let category_uuid = match record.category.as_deref() {
        Some(name) => Some(resolve_category(tx, name, categories_by_name)?),
        None => None,
    };

    let marker_uuid = Uuid::new_v4();
    let now = now_epoch_ms();
    tx.execute(
        "INSERT INTO markers (
            uuid,
            name,
            definition,
            anchor_example,
            coding_rule,
            tags,
            category_uuid,
            created_at,
            updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8);",
        params![
            marker_uuid.to_string(),
            record.marker_name.as_str(),
            record.definition.as_str(),
            record.ankerbeispiel.as_str(),
            record.kodierregeln_abgrenzung.as_str(),
            encode_tags(record.tags.as_deref().unwrap_or(&[])).map_err(from_marker_repo_error)?,
            category_uuid.map(|value| value.to_string()),
            now,
        ],
    )?;

    for example in record.examples.iter().flatten() {
        let subtlety = example.subtilitaet.unwrap_or(SUBTLETY_DEFAULT);
        validate_subtlety(subtlety)?;
        tx.execute(
            "INSERT INTO marker_examples (
                uuid,
                marker_uuid,
                text,
                context,
                relationship_type,
                subtlety,
                created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                Uuid::new_v4().to_string(),
                marker_uuid.to_string(),
                example.text.as_str(),
                example.kontext.as_deref(),
                example.beziehungstyp.as_deref(),
                subtlety,
                now_epoch_ms(),
            ],
        )?;
    }

    Ok(marker_uuid)
}

/// Resolves a category name to an existing row (oldest first on duplicate
/// names) or creates a bare category, memoized for the calling import.
fn resolve_category(
    tx: &Connection,
    name: &str,
    categories_by_name: &mut HashMap<String, CategoryId>,
) -> CodebookResult<CategoryId> {
    if let Some(category_uuid) = categories_by_name.get(name) {
        return Ok(*category_uuid);
    }

    let existing: Option<String> = tx
        .query_row(
            "SELECT uuid
             FROM categories
             WHERE name = ?1
             ORDER BY created_at ASC, uuid ASC
             LIMIT 1;",
            [name],
            |row| row.get(0),
        )
        .optional()?;

    let category_uuid = match existing {
        Some(value) => Uuid::parse_str(&value).map_err(|_| {
            CodebookError::InvalidData(format!("invalid uuid `{value}` in categories.uuid"))
        })?,
        None => {
            let category_uuid = Uuid::new_v4();
            tx.execute(
                "INSERT INTO categories (uuid, name, description, parent_uuid, created_at)
                 VALUES (?1, ?2, NULL, NULL, ?3);",
                params![category_uuid.to_string(), name, now_epoch_ms()],
            )?;
            category_uuid
        }
    };

    categories_by_name.insert(name.to_string(), category_uuid);
    Ok(category_uuid)
}

fn from_marker_repo_error(err: MarkerRepoError) -> CodebookError {
    match err {
        MarkerRepoError::Db(db) => CodebookError::Db(db),
        MarkerRepoError::Validation(validation) => CodebookError::Validation(validation),
        other => CodebookError::InvalidData(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::decode_records;

    #[test]
    fn decode_discriminates_codebook_shape() {
        let text = "version: \"1.0\"\ncreated_at: \"2024-01-01T00:00:00Z\"\nmarkers:\n  - marker_name: A\n    definition: D\n    ankerbeispiel: B\n    kodierregeln_abgrenzung: R\n";
        let records = decode_records(text).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].marker_name, "A");
    }

    #[test]
    fn decode_discriminates_list_shape() {
        let text = "- marker_name: A\n  definition: D\n  ankerbeispiel: B\n  kodierregeln_abgrenzung: R\n- marker_name: B\n  definition: D\n  ankerbeispiel: B\n  kodierregeln_abgrenzung: R\n";
        assert_eq!(decode_records(text).unwrap().len(), 2);
    }

    #[test]
    fn decode_discriminates_single_record_shape() {
        let text = "marker_name: A\ndefinition: D\nankerbeispiel: B\nkodierregeln_abgrenzung: R\n";
        let records = decode_records(text).unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].tags.is_none());
    }

    #[test]
    fn decode_rejects_scalar_documents() {
        assert!(matches!(
            decode_records("just text"),
            Err(super::CodebookError::InvalidFormat)
        ));
    }

    #[test]
    fn decode_reports_field_errors_as_decoding() {
        // A mapping without the required record fields is shape-valid but
        // not decodable.
        assert!(matches!(
            decode_records("name_only: X"),
            Err(super::CodebookError::Decoding(_))
        ));
    }
}
