//! Category repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide category CRUD and hierarchy operations over `categories`.
//! - Enforce tree acyclicity on every re-parenting move.
//! - Build the derived category forest and recursive marker views.
//!
//! # Invariants
//! - A category never becomes its own ancestor; `move_category` walks the
//!   candidate parent's ancestor chain by id, O(depth), before writing.
//! - `update_category` never touches `parent_uuid`; re-parenting goes
//!   through `move_category` only.
//! - Deleting a category re-parents its children to its own parent and
//!   detaches its markers, in one transaction.

use crate::db::migrations::latest_version;
use crate::db::{table_exists, table_has_column, DbError};
use crate::model::category::{Category, CategoryId, CategoryNode, CategoryProjection};
use crate::model::marker::Marker;
use crate::model::{now_epoch_ms, ValidationError};
use crate::repo::marker_repo::{parse_marker_row, MarkerRepoError, MARKER_SELECT_SQL};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const CATEGORY_SELECT_SQL: &str = "SELECT
    uuid,
    name,
    description,
    parent_uuid,
    created_at
FROM categories";

pub type CategoryRepoResult<T> = Result<T, CategoryRepoError>;

/// Errors from category repository operations.
#[derive(Debug)]
pub enum CategoryRepoError {
    /// Invalid caller input.
    Validation(ValidationError),
    /// Move would make the category its own ancestor.
    CircularReference {
        category_uuid: CategoryId,
        new_parent_uuid: CategoryId,
    },
    /// Target category does not exist.
    NotFound(CategoryId),
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
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

impl Display for CategoryRepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::CircularReference {
                category_uuid,
                new_parent_uuid,
            } => write!(
                f,
                "category {category_uuid} cannot move under {new_parent_uuid}: target is itself or one of its descendants"
            ),
            Self::NotFound(id) => write!(f, "category not found: {id}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "category repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "category repository requires table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "category repository requires column `{column}` in table `{table}`"
            ),
            Self::InvalidData(message) => write!(f, "invalid category data: {message}"),
        }
    }
}

impl Error for CategoryRepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ValidationError> for CategoryRepoError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for CategoryRepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for CategoryRepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Repository interface for category hierarchy operations.
pub trait CategoryRepository {
    /// Creates one category, optionally under a parent.
    fn create_category(
        &self,
        name: &str,
        description: Option<&str>,
        parent_uuid: Option<CategoryId>,
    ) -> CategoryRepoResult<Category>;
    /// Persists name/description of the given category.
    fn update_category(&self, category: &Category) -> CategoryRepoResult<()>;
    /// Deletes one category; children move to its parent, markers detach.
    fn delete_category(&self, category_uuid: CategoryId) -> CategoryRepoResult<()>;
    /// Re-parents one category after the acyclicity check.
    fn move_category(
        &self,
        category_uuid: CategoryId,
        new_parent_uuid: Option<CategoryId>,
    ) -> CategoryRepoResult<()>;
    /// Loads one category by id.
    fn get_category(&self, category_uuid: CategoryId) -> CategoryRepoResult<Option<Category>>;
    /// Collects markers of a category, depth-first over descendants when
    /// `include_subcategories` is set.
    fn get_all_markers(
        &self,
        category_uuid: CategoryId,
        include_subcategories: bool,
    ) -> CategoryRepoResult<Vec<Marker>>;
    /// Builds the full category forest with per-node marker counts.
    fn get_category_tree(&self) -> CategoryRepoResult<Vec<CategoryNode>>;
    /// Loads all categories sorted by name plus the root subset.
    fn fetch_categories(&self) -> CategoryRepoResult<CategoryProjection>;
}

/// SQLite-backed category repository.
pub struct SqliteCategoryRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteCategoryRepository<'conn> {
    /// Constructs a repository from a migrated/ready connection.
    pub fn try_new(conn: &'conn Connection) -> CategoryRepoResult<Self> {
        ensure_category_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl CategoryRepository for SqliteCategoryRepository<'_> {
    fn create_category(
        &self,
        name: &str,
        description: Option<&str>,
        parent_uuid: Option<CategoryId>,
    ) -> CategoryRepoResult<Category> {
        if name.trim().is_empty() {
            return Err(ValidationError::EmptyCategoryName.into());
        }
        if let Some(parent_uuid) = parent_uuid {
            ensure_category_exists(self.conn, parent_uuid)?;
        }

        let uuid = Uuid::new_v4();
        self.conn.execute(
            "INSERT INTO categories (uuid, name, description, parent_uuid, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                uuid.to_string(),
                name,
                description,
                parent_uuid.map(|value| value.to_string()),
                now_epoch_ms(),
            ],
        )?;
        load_required_category(self.conn, uuid)
    }

    fn update_category(&self, category: &Category) -> CategoryRepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE categories
             SET name = ?2,
                 description = ?3
             WHERE uuid = ?1;",
            params![
                category.uuid.to_string(),
                category.name.as_str(),
                category.description.as_deref(),
            ],
        )?;
        if changed == 0 {
            return Err(CategoryRepoError::NotFound(category.uuid));
        }
        Ok(())
    }

    fn delete_category(&self, category_uuid: CategoryId) -> CategoryRepoResult<()> {
        let category = self
            .get_category(category_uuid)?
            .ok_or(CategoryRepoError::NotFound(category_uuid))?;

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        tx.execute(
            "UPDATE categories SET parent_uuid = ?2 WHERE parent_uuid = ?1;",
            params![
                category_uuid.to_string(),
                category.parent_uuid.map(|value| value.to_string()),
            ],
        )?;
        tx.execute(
            "UPDATE markers SET category_uuid = NULL WHERE category_uuid = ?1;",
            [category_uuid.to_string()],
        )?;
        tx.execute(
            "DELETE FROM categories WHERE uuid = ?1;",
            [category_uuid.to_string()],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn move_category(
        &self,
        category_uuid: CategoryId,
        new_parent_uuid: Option<CategoryId>,
    ) -> CategoryRepoResult<()> {
        ensure_category_exists(self.conn, category_uuid)?;

        if let Some(new_parent_uuid) = new_parent_uuid {
            ensure_category_exists(self.conn, new_parent_uuid)?;
            if is_self_or_descendant(self.conn, category_uuid, new_parent_uuid)? {
                return Err(CategoryRepoError::CircularReference {
                    category_uuid,
                    new_parent_uuid,
                });
            }
        }

        self.conn.execute(
            "UPDATE categories SET parent_uuid = ?2 WHERE uuid = ?1;",
            params![
                category_uuid.to_string(),
                new_parent_uuid.map(|value| value.to_string()),
            ],
        )?;
        Ok(())
    }

    fn get_category(&self, category_uuid: CategoryId) -> CategoryRepoResult<Option<Category>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{CATEGORY_SELECT_SQL} WHERE uuid = ?1;"))?;
        let mut rows = stmt.query([category_uuid.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_category_row(row)?));
        }
        Ok(None)
    }

    fn get_all_markers(
        &self,
        category_uuid: CategoryId,
        include_subcategories: bool,
    ) -> CategoryRepoResult<Vec<Marker>> {
        ensure_category_exists(self.conn, category_uuid)?;

        let mut markers = direct_markers(self.conn, category_uuid)?;
        if include_subcategories {
            for child_uuid in child_category_ids(self.conn, category_uuid)? {
                collect_subtree_markers(self.conn, child_uuid, &mut markers)?;
            }
        }
        Ok(markers)
    }

    fn get_category_tree(&self) -> CategoryRepoResult<Vec<CategoryNode>> {
        let projection = self.fetch_categories()?;
        let counts = direct_marker_counts(self.conn)?;

        // Grouping a name-sorted list keeps every child vector name-sorted.
        let mut children_by_parent: HashMap<CategoryId, Vec<Category>> = HashMap::new();
        let mut roots = Vec::new();
        for category in projection.categories {
            match category.parent_uuid {
                Some(parent_uuid) => children_by_parent
                    .entry(parent_uuid)
                    .or_default()
                    .push(category),
                None => roots.push(category),
            }
        }

        Ok(roots
            .into_iter()
            .map(|category| build_category_node(category, &children_by_parent, &counts))
            .collect())
    }

    fn fetch_categories(&self) -> CategoryRepoResult<CategoryProjection> {
        let mut stmt = self.conn.prepare(&format!(
            "{CATEGORY_SELECT_SQL} ORDER BY name COLLATE NOCASE ASC, uuid ASC;"
        ))?;
        let mut rows = stmt.query([])?;
        let mut categories = Vec::new();
        while let Some(row) = rows.next()? {
            categories.push(parse_category_row(row)?);
        }

        let roots = categories
            .iter()
            .filter(|category| category.parent_uuid.is_none())
            .cloned()
            .collect();
        Ok(CategoryProjection { categories, roots })
    }
}

/// Walks the ancestor chain of `candidate` upward; true when `category` is
/// encountered, including `candidate == category` itself.
fn is_self_or_descendant(
    conn: &Connection,
    category_uuid: CategoryId,
    candidate_uuid: CategoryId,
) -> CategoryRepoResult<bool> {
    let mut current = Some(candidate_uuid);
    while let Some(current_uuid) = current {
        if current_uuid == category_uuid {
            return Ok(true);
        }
        current = parent_of(conn, current_uuid)?;
    }
    Ok(false)
}

fn parent_of(conn: &Connection, category_uuid: CategoryId) -> CategoryRepoResult<Option<CategoryId>> {
    let parent: Option<Option<String>> = conn
        .query_row(
            "SELECT parent_uuid FROM categories WHERE uuid = ?1;",
            [category_uuid.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    match parent.flatten() {
        Some(value) => Ok(Some(parse_uuid(&value, "categories.parent_uuid")?)),
        None => Ok(None),
    }
}

fn ensure_category_exists(conn: &Connection, category_uuid: CategoryId) -> CategoryRepoResult<()> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM categories WHERE uuid = ?1);",
        [category_uuid.to_string()],
        |row| row.get(0),
    )?;
    if exists == 1 {
        Ok(())
    } else {
        Err(CategoryRepoError::NotFound(category_uuid))
    }
}

fn load_required_category(
    conn: &Connection,
    category_uuid: CategoryId,
) -> CategoryRepoResult<Category> {
    let mut stmt = conn.prepare(&format!("{CATEGORY_SELECT_SQL} WHERE uuid = ?1;"))?;
    let mut rows = stmt.query([category_uuid.to_string()])?;
    if let Some(row) = rows.next()? {
        return parse_category_row(row);
    }
    Err(CategoryRepoError::NotFound(category_uuid))
}

fn direct_markers(conn: &Connection, category_uuid: CategoryId) -> CategoryRepoResult<Vec<Marker>> {
    let mut stmt = conn.prepare(&format!(
        "{MARKER_SELECT_SQL}
         WHERE category_uuid = ?1
         ORDER BY name COLLATE NOCASE ASC, uuid ASC;"
    ))?;
    let mut rows = stmt.query([category_uuid.to_string()])?;
    let mut markers = Vec::new();
    while let Some(row) = rows.next()? {
        markers.push(parse_marker_row(row).map_err(from_marker_parse_error)?);
    }
    Ok(markers)
}

/// Marker rows read through this repository report its error type.
fn from_marker_parse_error(err: MarkerRepoError) -> CategoryRepoError {
    match err {
        MarkerRepoError::Db(db) => CategoryRepoError::Db(db),
        other => CategoryRepoError::InvalidData(other.to_string()),
    }
}

fn child_category_ids(
    conn: &Connection,
    category_uuid: CategoryId,
) -> CategoryRepoResult<Vec<CategoryId>> {
    let mut stmt = conn.prepare(
        "SELECT uuid
         FROM categories
         WHERE parent_uuid = ?1
         ORDER BY name COLLATE NOCASE ASC, uuid ASC;",
    )?;
    let mut rows = stmt.query([category_uuid.to_string()])?;
    let mut ids = Vec::new();
    while let Some(row) = rows.next()? {
        let value: String = row.get(0)?;
        ids.push(parse_uuid(&value, "categories.uuid")?);
    }
    Ok(ids)
}

/// Depth-first collection, parent before children.
fn collect_subtree_markers(
    conn: &Connection,
    category_uuid: CategoryId,
    out: &mut Vec<Marker>,
) -> CategoryRepoResult<()> {
    out.extend(direct_markers(conn, category_uuid)?);
    for child_uuid in child_category_ids(conn, category_uuid)? {
        collect_subtree_markers(conn, child_uuid, out)?;
    }
    Ok(())
}

fn direct_marker_counts(conn: &Connection) -> CategoryRepoResult<HashMap<CategoryId, usize>> {
    let mut stmt = conn.prepare(
        "SELECT category_uuid, COUNT(*)
         FROM markers
         WHERE category_uuid IS NOT NULL
         GROUP BY category_uuid;",
    )?;
    let mut rows = stmt.query([])?;
    let mut counts = HashMap::new();
    while let Some(row) = rows.next()? {
        let uuid_text: String = row.get(0)?;
        let count: i64 = row.get(1)?;
        counts.insert(parse_uuid(&uuid_text, "markers.category_uuid")?, count as usize);
    }
    Ok(counts)
}

fn build_category_node(
    category: Category,
    children_by_parent: &HashMap<CategoryId, Vec<Category>>,
    counts: &HashMap<CategoryId, usize>,
) -> CategoryNode {
    let children = children_by_parent
        .get(&category.uuid)
        .into_iter()
        .flatten()
        .cloned()
        .map(|child| build_category_node(child, children_by_parent, counts))
        .collect();
    CategoryNode {
        direct_marker_count: counts.get(&category.uuid).copied().unwrap_or(0),
        category,
        children,
    }
}

fn parse_category_row(row: &Row<'_>) -> CategoryRepoResult<Category> {
    let uuid_text: String = row.get("uuid")?;
    let uuid = parse_uuid(&uuid_text, "categories.uuid")?;
    let parent_uuid = row
        .get::<_, Option<String>>("parent_uuid")?
        .map(|value| parse_uuid(&value, "categories.parent_uuid"))
        .transpose()?;

    Ok(Category {
        uuid,
        name: row.get("name")?,
        description: row.get("description")?,
        parent_uuid,
        created_at: row.get("created_at")?,
    })
}

fn parse_uuid(value: &str, column: &'static str) -> CategoryRepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| CategoryRepoError::InvalidData(format!("invalid uuid `{value}` in {column}")))
}

fn ensure_category_connection_ready(conn: &Connection) -> CategoryRepoResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(CategoryRepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for table in ["categories", "markers"] {
        if !table_exists(conn, table)? {
            return Err(CategoryRepoError::MissingRequiredTable(table));
        }
    }

    for column in ["uuid", "name", "description", "parent_uuid", "created_at"] {
        if !table_has_column(conn, "categories", column)? {
            return Err(CategoryRepoError::MissingRequiredColumn {
                table: "categories",
                column,
            });
        }
    }

    Ok(())
}
