//! Marker repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide marker CRUD and filtered retrieval over `markers`.
//! - Own example sub-entity writes (`marker_examples`) with atomic
//!   marker-stamp semantics.
//! - Expose the YAML codebook import/export entry points.
//!
//! # Invariants
//! - `updated_at` changes only through the update-stamp path and strictly
//!   increases on every write, even within one millisecond.
//! - The four text fields and the tag list are stored verbatim; emptiness
//!   is a caller concern.
//! - Example writes and the owning marker's stamp commit together or not
//!   at all.

use crate::codebook::{self, CodebookError};
use crate::db::{table_exists, table_has_column, DbError};
use crate::model::category::CategoryId;
use crate::model::marker::{Example, ExampleDraft, ExampleId, Marker, MarkerDraft, MarkerId};
use crate::model::{now_epoch_ms, validate_subtlety, ValidationError};
use rusqlite::{params, Connection, Row, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub(crate) const MARKER_SELECT_SQL: &str = "SELECT
    uuid,
    name,
    definition,
    anchor_example,
    coding_rule,
    tags,
    category_uuid,
    created_at,
    updated_at
FROM markers";

const EXAMPLE_SELECT_SQL: &str = "SELECT
    uuid,
    marker_uuid,
    text,
    context,
    relationship_type,
    subtlety,
    created_at
FROM marker_examples";

pub type MarkerRepoResult<T> = Result<T, MarkerRepoError>;

/// Errors from marker repository operations.
#[derive(Debug)]
pub enum MarkerRepoError {
    /// Invalid caller input.
    Validation(ValidationError),
    /// Target marker does not exist.
    NotFound(MarkerId),
    /// Target example does not exist under the given marker.
    ExampleNotFound(ExampleId),
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Required table is missing.
    MissingRequiredTable(&'static str),
    /// Required column is missing from expected table.
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
    /// Persisted data cannot be converted to a valid read model.
    InvalidData(String),
}

impl Display for MarkerRepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "marker not found: {id}"),
            Self::ExampleNotFound(id) => write!(f, "example not found: {id}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::MissingRequiredTable(table) => {
                write!(f, "marker repository requires table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "marker repository requires column `{column}` in table `{table}`"
            ),
            Self::InvalidData(message) => write!(f, "invalid marker data: {message}"),
        }
    }
}

impl Error for MarkerRepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ValidationError> for MarkerRepoError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for MarkerRepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for MarkerRepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Repository interface for marker and example operations.
pub trait MarkerRepository {
    /// Creates one marker from draft input.
    fn create_marker(&self, draft: &MarkerDraft) -> MarkerRepoResult<Marker>;
    /// Persists current field values and stamps `updated_at`.
    fn update_marker(&self, marker: &Marker) -> MarkerRepoResult<Marker>;
    /// Deletes one marker; its examples cascade in-store.
    fn delete_marker(&self, marker_uuid: MarkerId) -> MarkerRepoResult<()>;
    /// Loads one marker by id.
    fn get_marker(&self, marker_uuid: MarkerId) -> MarkerRepoResult<Option<Marker>>;
    /// Lists markers sorted by name; a non-empty search filters
    /// case-insensitively over name, definition, and anchor example.
    fn fetch_markers(&self, search: Option<&str>) -> MarkerRepoResult<Vec<Marker>>;
    /// Lists markers whose tag list matches any query tag,
    /// case-insensitive substring, OR semantics both ways.
    /// An empty query set applies no filter.
    fn fetch_markers_by_tags(&self, tags: &[String]) -> MarkerRepoResult<Vec<Marker>>;
    /// Lists markers assigned to exactly the given category, by name.
    fn fetch_markers_by_category(&self, category_uuid: CategoryId)
        -> MarkerRepoResult<Vec<Marker>>;
    /// Attaches one example and bumps the owning marker, atomically.
    fn add_example(&self, marker_uuid: MarkerId, draft: &ExampleDraft)
        -> MarkerRepoResult<Example>;
    /// Detaches and deletes one example and bumps the owning marker.
    fn remove_example(&self, example_uuid: ExampleId, marker_uuid: MarkerId)
        -> MarkerRepoResult<()>;
    /// Lists a marker's examples in insertion order.
    fn list_examples(&self, marker_uuid: MarkerId) -> MarkerRepoResult<Vec<Example>>;
    /// Imports markers from YAML codebook text.
    fn import_from_yaml(&self, text: &str) -> Result<Vec<Marker>, CodebookError>;
    /// Exports the given markers as a YAML codebook document.
    fn export_to_yaml(&self, markers: &[Marker]) -> Result<String, CodebookError>;
    /// Exports one marker as a bare YAML record without the codebook
    /// envelope.
    fn export_single_marker(&self, marker: &Marker) -> Result<String, CodebookError>;
}

/// SQLite-backed marker repository.
pub struct SqliteMarkerRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteMarkerRepository<'conn> {
    /// Constructs a repository from a migrated/ready connection.
    pub fn try_new(conn: &'conn Connection) -> MarkerRepoResult<Self> {
        ensure_marker_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl MarkerRepository for SqliteMarkerRepository<'_> {
    fn create_marker(&self, draft: &MarkerDraft) -> MarkerRepoResult<Marker> {
        let uuid = Uuid::new_v4();
        let now = now_epoch_ms();
        self.conn.execute(
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
                uuid.to_string(),
                draft.name.as_str(),
                draft.definition.as_str(),
                draft.anchor_example.as_str(),
                draft.coding_rule.as_str(),
                encode_tags(&draft.tags)?,
                draft.category_uuid.map(|value| value.to_string()),
                now,
            ],
        )?;
        load_required_marker(self.conn, uuid)
    }

    fn update_marker(&self, marker: &Marker) -> MarkerRepoResult<Marker> {
        let changed = self.conn.execute(
            "UPDATE markers
             SET name = ?2,
                 definition = ?3,
                 anchor_example = ?4,
                 coding_rule = ?5,
                 tags = ?6,
                 category_uuid = ?7,
                 updated_at = MAX(?8, updated_at + 1)
             WHERE uuid = ?1;",
            params![
                marker.uuid.to_string(),
                marker.name.as_str(),
                marker.definition.as_str(),
                marker.anchor_example.as_str(),
                marker.coding_rule.as_str(),
                encode_tags(&marker.tags)?,
                marker.category_uuid.map(|value| value.to_string()),
                now_epoch_ms(),
            ],
        )?;
        if changed == 0 {
            return Err(MarkerRepoError::NotFound(marker.uuid));
        }
        load_required_marker(self.conn, marker.uuid)
    }

    fn delete_marker(&self, marker_uuid: MarkerId) -> MarkerRepoResult<()> {
        let changed = self.conn.execute(
            "DELETE FROM markers WHERE uuid = ?1;",
            [marker_uuid.to_string()],
        )?;
        if changed == 0 {
            return Err(MarkerRepoError::NotFound(marker_uuid));
        }
        Ok(())
    }

    fn get_marker(&self, marker_uuid: MarkerId) -> MarkerRepoResult<Option<Marker>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{MARKER_SELECT_SQL} WHERE uuid = ?1;"))?;
        let mut rows = stmt.query([marker_uuid.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_marker_row(row)?));
        }
        Ok(None)
    }

    fn fetch_markers(&self, search: Option<&str>) -> MarkerRepoResult<Vec<Marker>> {
        let search = search.map(str::trim).filter(|value| !value.is_empty());
        let sql = match search {
            Some(_) => format!(
                "{MARKER_SELECT_SQL}
                 WHERE instr(lower(name), lower(?1)) > 0
                    OR instr(lower(definition), lower(?1)) > 0
                    OR instr(lower(anchor_example), lower(?1)) > 0
                 ORDER BY name COLLATE NOCASE ASC, uuid ASC;"
            ),
            None => format!("{MARKER_SELECT_SQL} ORDER BY name COLLATE NOCASE ASC, uuid ASC;"),
        };

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = match search {
            Some(value) => stmt.query([value])?,
            None => stmt.query([])?,
        };

        let mut markers = Vec::new();
        while let Some(row) = rows.next()? {
            markers.push(parse_marker_row(row)?);
        }
        Ok(markers)
    }

    fn fetch_markers_by_tags(&self, tags: &[String]) -> MarkerRepoResult<Vec<Marker>> {
        let queries: Vec<String> = tags
            .iter()
            .map(|tag| tag.trim().to_lowercase())
            .filter(|tag| !tag.is_empty())
            .collect();

        let markers = self.fetch_markers(None)?;
        if queries.is_empty() {
            return Ok(markers);
        }

        Ok(markers
            .into_iter()
            .filter(|marker| {
                marker.tags.iter().any(|tag| {
                    let tag = tag.to_lowercase();
                    queries.iter().any(|query| tag.contains(query))
                })
            })
            .collect())
    }

    fn fetch_markers_by_category(
        &self,
        category_uuid: CategoryId,
    ) -> MarkerRepoResult<Vec<Marker>> {
        let mut stmt = self.conn.prepare(&format!(
            "{MARKER_SELECT_SQL}
             WHERE category_uuid = ?1
             ORDER BY name COLLATE NOCASE ASC, uuid ASC;"
        ))?;
        let mut rows = stmt.query([category_uuid.to_string()])?;
        let mut markers = Vec::new();
        while let Some(row) = rows.next()? {
            markers.push(parse_marker_row(row)?);
        }
        Ok(markers)
    }

    fn add_example(
        &self,
        marker_uuid: MarkerId,
        draft: &ExampleDraft,
    ) -> MarkerRepoResult<Example> {
        validate_subtlety(draft.subtlety)?;

        let uuid = Uuid::new_v4();
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        // Stamping first also proves the marker exists before the insert.
        touch_marker(&tx, marker_uuid)?;
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
                uuid.to_string(),
                marker_uuid.to_string(),
                draft.text.as_str(),
                draft.context.as_deref(),
                draft.relationship_type.as_deref(),
                draft.subtlety,
                now_epoch_ms(),
            ],
        )?;
        tx.commit()?;

        load_required_example(self.conn, uuid)
    }

    fn remove_example(
        &self,
        example_uuid: ExampleId,
        marker_uuid: MarkerId,
    ) -> MarkerRepoResult<()> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let changed = tx.execute(
            "DELETE FROM marker_examples WHERE uuid = ?1 AND marker_uuid = ?2;",
            params![example_uuid.to_string(), marker_uuid.to_string()],
        )?;
        if changed == 0 {
            return Err(MarkerRepoError::ExampleNotFound(example_uuid));
        }
        touch_marker(&tx, marker_uuid)?;
        tx.commit()?;
        Ok(())
    }

    fn list_examples(&self, marker_uuid: MarkerId) -> MarkerRepoResult<Vec<Example>> {
        let mut stmt = self.conn.prepare(&format!(
            "{EXAMPLE_SELECT_SQL}
             WHERE marker_uuid = ?1
             ORDER BY created_at ASC, uuid ASC;"
        ))?;
        let mut rows = stmt.query([marker_uuid.to_string()])?;
        let mut examples = Vec::new();
        while let Some(row) = rows.next()? {
            examples.push(parse_example_row(row)?);
        }
        Ok(examples)
    }

    fn import_from_yaml(&self, text: &str) -> Result<Vec<Marker>, CodebookError> {
        codebook::import_codebook(self.conn, text)
    }

    fn export_to_yaml(&self, markers: &[Marker]) -> Result<String, CodebookError> {
        codebook::export_codebook(self.conn, markers)
    }

    fn export_single_marker(&self, marker: &Marker) -> Result<String, CodebookError> {
        codebook::export_marker(self.conn, marker)
    }
}

/// Bumps `updated_at` for one marker, strictly monotonic.
///
/// `MAX(now, updated_at + 1)` keeps the stamp increasing even when two
/// writes land in the same millisecond.
pub(crate) fn touch_marker(conn: &Connection, marker_uuid: MarkerId) -> MarkerRepoResult<()> {
    let changed = conn.execute(
        "UPDATE markers
         SET updated_at = MAX(?2, updated_at + 1)
         WHERE uuid = ?1;",
        params![marker_uuid.to_string(), now_epoch_ms()],
    )?;
    if changed == 0 {
        return Err(MarkerRepoError::NotFound(marker_uuid));
    }
    Ok(())
}

pub(crate) fn load_required_marker(
    conn: &Connection,
    marker_uuid: MarkerId,
) -> MarkerRepoResult<Marker> {
    let mut stmt = conn.prepare(&format!("{MARKER_SELECT_SQL} WHERE uuid = ?1;"))?;
    let mut rows = stmt.query([marker_uuid.to_string()])?;
    if let Some(row) = rows.next()? {
        return parse_marker_row(row);
    }
    Err(MarkerRepoError::NotFound(marker_uuid))
}

fn load_required_example(conn: &Connection, example_uuid: ExampleId) -> MarkerRepoResult<Example> {
    let mut stmt = conn.prepare(&format!("{EXAMPLE_SELECT_SQL} WHERE uuid = ?1;"))?;
    let mut rows = stmt.query([example_uuid.to_string()])?;
    if let Some(row) = rows.next()? {
        return parse_example_row(row);
    }
    Err(MarkerRepoError::ExampleNotFound(example_uuid))
}

pub(crate) fn encode_tags(tags: &[String]) -> MarkerRepoResult<String> {
    serde_json::to_string(tags)
        .map_err(|err| MarkerRepoError::InvalidData(format!("unencodable tag list: {err}")))
}

pub(crate) fn parse_marker_row(row: &Row<'_>) -> MarkerRepoResult<Marker> {
    let uuid_text: String = row.get("uuid")?;
    let uuid = parse_uuid(&uuid_text, "markers.uuid")?;
    let category_uuid = row
        .get::<_, Option<String>>("category_uuid")?
        .map(|value| parse_uuid(&value, "markers.category_uuid"))
        .transpose()?;

    let tags_text: String = row.get("tags")?;
    let tags = serde_json::from_str(&tags_text).map_err(|_| {
        MarkerRepoError::InvalidData(format!("invalid tag list `{tags_text}` in markers.tags"))
    })?;

    Ok(Marker {
        uuid,
        name: row.get("name")?,
        definition: row.get("definition")?,
        anchor_example: row.get("anchor_example")?,
        coding_rule: row.get("coding_rule")?,
        tags,
        category_uuid,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn parse_example_row(row: &Row<'_>) -> MarkerRepoResult<Example> {
    let uuid_text: String = row.get("uuid")?;
    let marker_uuid_text: String = row.get("marker_uuid")?;

    Ok(Example {
        uuid: parse_uuid(&uuid_text, "marker_examples.uuid")?,
        marker_uuid: parse_uuid(&marker_uuid_text, "marker_examples.marker_uuid")?,
        text: row.get("text")?,
        context: row.get("context")?,
        relationship_type: row.get("relationship_type")?,
        subtlety: row.get("subtlety")?,
        created_at: row.get("created_at")?,
    })
}

fn parse_uuid(value: &str, column: &'static str) -> MarkerRepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| MarkerRepoError::InvalidData(format!("invalid uuid `{value}` in {column}")))
}

fn ensure_marker_connection_ready(conn: &Connection) -> MarkerRepoResult<()> {
    for table in ["markers", "marker_examples"] {
        if !table_exists(conn, table)? {
            return Err(MarkerRepoError::MissingRequiredTable(table));
        }
    }

    for column in [
        "uuid",
        "name",
        "definition",
        "anchor_example",
        "coding_rule",
        "tags",
        "category_uuid",
        "created_at",
        "updated_at",
    ] {
        if !table_has_column(conn, "markers", column)? {
            return Err(MarkerRepoError::MissingRequiredColumn {
                table: "markers",
                column,
            });
        }
    }

    for column in ["uuid", "marker_uuid", "text", "subtlety", "created_at"] {
        if !table_has_column(conn, "marker_examples", column)? {
            return Err(MarkerRepoError::MissingRequiredColumn {
                table: "marker_examples",
                column,
            });
        }
    }

    Ok(())
}
