//! Statement registry.
//!
//! One statement exists per (object, operation) pair the object's schema
//! supports. Statement text is generated from [`crate::schema`] once per
//! connection. On `PostgreSQL` each statement is prepared up front and the
//! ordinals of the columns it returns are resolved and stored with it, so row
//! decoding never looks columns up by name.
//!
//! Parameter shapes (key omitted for singletons):
//!
//! ```text
//! insert, update_full      [key, quick..., attrs]
//! update_quick             [key, quick...]
//! update_attrs             [key, attrs]         merge into hstore
//! replace_attrs            [key, attrs]         overwrite hstore
//! remove_attrs             [key, names]
//! mark_deleted             [key, flag]
//! delete, select(_locked)  [key]
//! find_all                 []
//! find_since               [timestamp]
//! find_by_secondary        [value]
//! ```
//!
//! Every write on a versioned object returns the new save timestamp. New
//! timestamps are `GREATEST(localtimestamp, previous + 1us)`, so they strictly
//! increase per row even within one transaction.

use std::collections::HashMap;
use std::fmt::Write as _;

use sqlx::postgres::PgConnection;
use sqlx::{Column as _, Executor as _, Statement as _};
use wlm_types::ObjectType;

use crate::error::DbError;
use crate::schema::{self, EntitySchema};

/// Wire format of save timestamps produced by `to_char`.
const TS_FORMAT: &str = "'YYYY-MM-DD HH24:MI:SS.US'";

/// Operation a statement performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    /// Insert a new row.
    Insert,
    /// Update quick columns and replace attributes.
    UpdateFull,
    /// Update quick columns only.
    UpdateQuick,
    /// Merge attribute entries into the stored set.
    UpdateAttrs,
    /// Replace the stored attribute set.
    ReplaceAttrs,
    /// Remove attribute entries by flat key.
    RemoveAttrs,
    /// Set the soft-delete marker.
    MarkDeleted,
    /// Delete a row by key.
    Delete,
    /// Select a row by key.
    Select,
    /// Select a row by key and lock it for the transaction.
    SelectLocked,
    /// Select every row in stable order.
    FindAll,
    /// Select rows saved after a timestamp.
    FindSince,
    /// Select rows by secondary key.
    FindBySecondary,
}

impl StatementKind {
    /// Every kind.
    pub const ALL: [Self; 13] = [
        Self::Insert,
        Self::UpdateFull,
        Self::UpdateQuick,
        Self::UpdateAttrs,
        Self::ReplaceAttrs,
        Self::RemoveAttrs,
        Self::MarkDeleted,
        Self::Delete,
        Self::Select,
        Self::SelectLocked,
        Self::FindAll,
        Self::FindSince,
        Self::FindBySecondary,
    ];

    /// Name used in statement names and logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::UpdateFull => "update_full",
            Self::UpdateQuick => "update_quick",
            Self::UpdateAttrs => "update_attrs",
            Self::ReplaceAttrs => "replace_attrs",
            Self::RemoveAttrs => "remove_attrs",
            Self::MarkDeleted => "mark_deleted",
            Self::Delete => "delete",
            Self::Select => "select",
            Self::SelectLocked => "select_locked",
            Self::FindAll => "find_all",
            Self::FindSince => "find_since",
            Self::FindBySecondary => "find_by_secondary",
        }
    }
}

/// Registry key: object plus operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatementKey {
    /// Object the statement operates on.
    pub object: ObjectType,
    /// Operation.
    pub kind: StatementKind,
}

impl StatementKey {
    /// Build a key.
    pub const fn new(object: ObjectType, kind: StatementKind) -> Self {
        Self { object, kind }
    }
}

impl core::fmt::Display for StatementKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}_{}", self.object, self.kind.as_str())
    }
}

/// What a statement hands back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Returns {
    /// Only a row count.
    Nothing,
    /// The new save timestamp of the written row.
    SaveTimestamp,
    /// Full rows.
    Rows,
}

/// Ordinals of the columns a statement returns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMap {
    /// Identity key.
    pub key: Option<usize>,
    /// Quick columns, in schema order.
    pub quick: Vec<usize>,
    /// Save timestamp.
    pub savetm: Option<usize>,
    /// Attributes as a flattened `text[]`.
    pub attributes: Option<usize>,
    /// Soft-delete marker.
    pub deleted: Option<usize>,
}

impl ColumnMap {
    /// Resolve ordinals from the column names a prepared statement reports.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::MissingColumn`] if an expected column is absent.
    pub fn resolve(statement: &Prepared, names: &[&str]) -> Result<Self, DbError> {
        let find = |column: &str| {
            names
                .iter()
                .position(|n| *n == column)
                .ok_or_else(|| DbError::MissingColumn {
                    statement: statement.name(),
                    column: column.to_owned(),
                })
        };
        let schema = statement.schema;
        match statement.returns {
            Returns::Nothing => Ok(Self::default()),
            Returns::SaveTimestamp => Ok(Self {
                savetm: schema.savetm.map(find).transpose()?,
                ..Self::default()
            }),
            Returns::Rows => Ok(Self {
                key: schema.key.map(find).transpose()?,
                quick: schema
                    .quick
                    .iter()
                    .map(|c| find(c.name))
                    .collect::<Result<_, _>>()?,
                savetm: schema.savetm.map(find).transpose()?,
                attributes: schema.attributes.map(find).transpose()?,
                deleted: schema.deleted.map(find).transpose()?,
            }),
        }
    }
}

/// A registered statement.
#[derive(Debug, Clone)]
pub struct Prepared {
    key: StatementKey,
    schema: &'static EntitySchema,
    sql: String,
    param_count: usize,
    returns: Returns,
    columns: Option<ColumnMap>,
}

impl Prepared {
    /// Registry key.
    pub const fn key(&self) -> StatementKey {
        self.key
    }

    /// Statement name, e.g. `job_insert`.
    pub fn name(&self) -> String {
        self.key.to_string()
    }

    /// Table layout the statement was generated from.
    pub const fn schema(&self) -> &'static EntitySchema {
        self.schema
    }

    /// SQL text.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Number of positional parameters.
    pub const fn param_count(&self) -> usize {
        self.param_count
    }

    /// What the statement returns.
    pub const fn returns(&self) -> Returns {
        self.returns
    }

    /// Column ordinals, once resolved against a live connection.
    pub const fn columns(&self) -> Option<&ColumnMap> {
        self.columns.as_ref()
    }
}

/// All statements for one connection.
#[derive(Debug, Clone)]
pub struct StatementRegistry {
    statements: HashMap<StatementKey, Prepared>,
}

impl StatementRegistry {
    /// Generate every statement without touching a database.
    pub fn build() -> Self {
        let mut statements = HashMap::new();
        for schema in schema::ALL {
            for kind in StatementKind::ALL {
                if let Some(prepared) = generate(schema, kind) {
                    statements.insert(prepared.key, prepared);
                }
            }
        }
        Self { statements }
    }

    /// Generate, prepare and resolve every statement on `conn`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Prepare`] if any statement fails to prepare, or
    /// [`DbError::MissingColumn`] if one does not return what decoding needs.
    pub async fn prepare(conn: &mut PgConnection) -> Result<Self, DbError> {
        let mut registry = Self::build();
        for prepared in registry.statements.values_mut() {
            let statement = (&mut *conn)
                .prepare(prepared.sql.as_str())
                .await
                .map_err(|source| DbError::Prepare {
                    statement: prepared.name(),
                    source,
                })?;
            let names: Vec<&str> = statement.columns().iter().map(|c| c.name()).collect();
            prepared.columns = Some(ColumnMap::resolve(prepared, &names)?);
        }
        tracing::info!(
            statements = registry.statements.len(),
            "Prepared statement registry"
        );
        Ok(registry)
    }

    /// Look up a statement.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::UnknownStatement`] if the object does not support
    /// the operation.
    pub fn get(&self, key: StatementKey) -> Result<&Prepared, DbError> {
        self.statements
            .get(&key)
            .ok_or_else(|| DbError::UnknownStatement(key.to_string()))
    }

    /// Whether a statement is registered.
    pub fn contains(&self, key: StatementKey) -> bool {
        self.statements.contains_key(&key)
    }

    /// Number of registered statements.
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

// ============================================================================
// SQL generation
// ============================================================================

/// Hands out `$1`, `$2`, ... in order.
struct Placeholders(usize);

impl Placeholders {
    const fn new() -> Self {
        Self(0)
    }

    fn next(&mut self) -> String {
        self.0 = self.0.saturating_add(1);
        format!("${}", self.0)
    }

    const fn count(&self) -> usize {
        self.0
    }
}

fn select_list(schema: &EntitySchema) -> String {
    let mut columns: Vec<String> = Vec::new();
    columns.extend(schema.key.map(str::to_owned));
    columns.extend(schema.quick.iter().map(|c| c.name.to_owned()));
    columns.extend(schema.savetm.map(savetm_out));
    columns.extend(
        schema
            .attributes
            .map(|a| format!("hstore_to_array({a}) AS {a}")),
    );
    columns.extend(schema.deleted.map(str::to_owned));
    columns.join(", ")
}

fn savetm_out(column: &str) -> String {
    format!("to_char({column}, {TS_FORMAT}) AS {column}")
}

fn next_savetm(column: &str) -> String {
    format!("{column} = GREATEST(localtimestamp, {column} + interval '1 microsecond')")
}

fn order_clause(schema: &EntitySchema) -> String {
    if schema.order_by.is_empty() {
        String::new()
    } else {
        format!(" ORDER BY {}", schema.order_by.join(", "))
    }
}

/// Build an `UPDATE` with the key bound first. `sets` receives the
/// placeholder allocator so value placeholders follow the key.
fn update(
    schema: &EntitySchema,
    sets: impl FnOnce(&mut Placeholders) -> Vec<String>,
) -> (String, usize) {
    let mut ph = Placeholders::new();
    let where_clause = schema
        .key
        .map(|k| format!(" WHERE {k} = {}", ph.next()))
        .unwrap_or_default();
    let mut assignments = sets(&mut ph);
    assignments.extend(schema.savetm.map(next_savetm));
    let mut sql = format!(
        "UPDATE {} SET {}{where_clause}",
        schema.table,
        assignments.join(", ")
    );
    if let Some(savetm) = schema.savetm {
        let _ = write!(sql, " RETURNING {}", savetm_out(savetm));
    }
    (sql, ph.count())
}

fn quick_assignments(schema: &EntitySchema, ph: &mut Placeholders) -> Vec<String> {
    schema
        .quick
        .iter()
        .map(|c| format!("{} = {}", c.name, ph.next()))
        .collect()
}

fn select(schema: &EntitySchema, filter: Option<&str>, locked: bool) -> String {
    let mut sql = format!("SELECT {} FROM {}", select_list(schema), schema.table);
    if let Some(filter) = filter {
        let _ = write!(sql, " WHERE {filter}");
    }
    if locked {
        sql.push_str(" FOR UPDATE");
    } else {
        sql.push_str(&order_clause(schema));
    }
    sql
}

#[allow(clippy::too_many_lines)]
fn generate(schema: &'static EntitySchema, kind: StatementKind) -> Option<Prepared> {
    let writes_savetm = if schema.savetm.is_some() {
        Returns::SaveTimestamp
    } else {
        Returns::Nothing
    };
    let key_filter = schema.key.map(|k| format!("{k} = $1"));

    let (sql, param_count, returns) = match kind {
        StatementKind::Insert => {
            let mut ph = Placeholders::new();
            let mut columns = Vec::new();
            let mut values = Vec::new();
            if let Some(key) = schema.key {
                columns.push(key.to_owned());
                values.push(ph.next());
            }
            for column in schema.quick {
                columns.push(column.name.to_owned());
                values.push(ph.next());
            }
            for stamp in [schema.savetm, schema.creattm].into_iter().flatten() {
                columns.push(stamp.to_owned());
                values.push("localtimestamp".to_owned());
            }
            if let Some(attrs) = schema.attributes {
                columns.push(attrs.to_owned());
                values.push(format!("hstore({}::text[])", ph.next()));
            }
            let mut sql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                schema.table,
                columns.join(", "),
                values.join(", ")
            );
            if let Some(savetm) = schema.savetm {
                let _ = write!(sql, " RETURNING {}", savetm_out(savetm));
            }
            (sql, ph.count(), writes_savetm)
        }
        StatementKind::UpdateFull => {
            let attrs = schema.attributes?;
            if schema.quick.is_empty() {
                return None;
            }
            let (sql, count) = update(schema, |ph| {
                let mut sets = quick_assignments(schema, ph);
                sets.push(format!("{attrs} = hstore({}::text[])", ph.next()));
                sets
            });
            (sql, count, writes_savetm)
        }
        StatementKind::UpdateQuick => {
            if schema.quick.is_empty() {
                return None;
            }
            let (sql, count) = update(schema, |ph| quick_assignments(schema, ph));
            (sql, count, writes_savetm)
        }
        StatementKind::UpdateAttrs => {
            let attrs = schema.attributes?;
            let (sql, count) = update(schema, |ph| {
                vec![format!("{attrs} = {attrs} || hstore({}::text[])", ph.next())]
            });
            (sql, count, writes_savetm)
        }
        StatementKind::ReplaceAttrs => {
            let attrs = schema.attributes?;
            let (sql, count) =
                update(schema, |ph| vec![format!("{attrs} = hstore({}::text[])", ph.next())]);
            (sql, count, writes_savetm)
        }
        StatementKind::RemoveAttrs => {
            let attrs = schema.attributes?;
            let (sql, count) = update(schema, |ph| {
                vec![format!("{attrs} = delete({attrs}, {}::text[])", ph.next())]
            });
            (sql, count, writes_savetm)
        }
        StatementKind::MarkDeleted => {
            let deleted = schema.deleted?;
            schema.key?;
            let (sql, count) = update(schema, |ph| vec![format!("{deleted} = {}", ph.next())]);
            (sql, count, writes_savetm)
        }
        StatementKind::Delete => {
            let filter = key_filter?;
            (
                format!("DELETE FROM {} WHERE {filter}", schema.table),
                1,
                Returns::Nothing,
            )
        }
        StatementKind::Select | StatementKind::SelectLocked => {
            let locked = kind == StatementKind::SelectLocked;
            let count = usize::from(key_filter.is_some());
            (select(schema, key_filter.as_deref(), locked), count, Returns::Rows)
        }
        StatementKind::FindAll => (select(schema, None, false), 0, Returns::Rows),
        StatementKind::FindSince => {
            let savetm = schema.savetm?;
            let filter = format!("{savetm} > $1::text::timestamp");
            (select(schema, Some(&filter), false), 1, Returns::Rows)
        }
        StatementKind::FindBySecondary => {
            let secondary = schema.secondary?;
            let filter = format!("{secondary} = $1");
            (select(schema, Some(&filter), false), 1, Returns::Rows)
        }
    };

    Some(Prepared {
        key: StatementKey::new(schema.object, kind),
        schema,
        sql,
        param_count,
        returns,
        columns: None,
    })
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    fn get(registry: &StatementRegistry, object: ObjectType, kind: StatementKind) -> Prepared {
        registry
            .get(StatementKey::new(object, kind))
            .cloned()
            .unwrap_or_else(|e| panic!("{e}"))
    }

    #[test]
    fn node_statements_match_their_shapes() {
        let registry = StatementRegistry::build();
        let quick = schema::NODE.quick.len();

        let insert = get(&registry, ObjectType::Node, StatementKind::Insert);
        assert_eq!(insert.param_count(), quick + 2);
        assert!(insert.sql().contains("RETURNING to_char(nd_savetm"));

        let update_quick = get(&registry, ObjectType::Node, StatementKind::UpdateQuick);
        assert_eq!(update_quick.param_count(), quick + 1);
        assert!(update_quick.sql().contains("WHERE nd_name = $1"));
        assert!(!update_quick.sql().contains("attributes"));

        let merge = get(&registry, ObjectType::Node, StatementKind::UpdateAttrs);
        assert_eq!(merge.param_count(), 2);
        assert!(merge.sql().contains("attributes || hstore($2::text[])"));

        let removal = get(&registry, ObjectType::Node, StatementKind::RemoveAttrs);
        assert!(removal.sql().contains("delete(attributes, $2::text[])"));

        let deleted = get(&registry, ObjectType::Node, StatementKind::MarkDeleted);
        assert_eq!(deleted.param_count(), 2);
    }

    #[test]
    fn locked_select_is_distinct() {
        let registry = StatementRegistry::build();
        let plain = get(&registry, ObjectType::Job, StatementKind::Select);
        let locked = get(&registry, ObjectType::Job, StatementKind::SelectLocked);
        assert!(!plain.sql().contains("FOR UPDATE"));
        assert!(locked.sql().ends_with("FOR UPDATE"));
    }

    #[test]
    fn singletons_have_no_key_filter() {
        let registry = StatementRegistry::build();
        let select = get(&registry, ObjectType::Server, StatementKind::Select);
        assert_eq!(select.param_count(), 0);
        assert!(!select.sql().contains("WHERE"));
        assert!(!registry.contains(StatementKey::new(ObjectType::Server, StatementKind::Delete)));

        let update = get(&registry, ObjectType::MomInfoTime, StatementKind::UpdateQuick);
        assert_eq!(update.param_count(), 2);
        assert_eq!(update.returns(), Returns::Nothing);
    }

    #[test]
    fn unsupported_operations_are_not_registered() {
        let registry = StatementRegistry::build();
        assert!(!registry.contains(StatementKey::new(
            ObjectType::Job,
            StatementKind::FindBySecondary
        )));
        assert!(!registry.contains(StatementKey::new(
            ObjectType::Scheduler,
            StatementKind::UpdateQuick
        )));
        assert!(!registry.contains(StatementKey::new(
            ObjectType::JobScript,
            StatementKind::UpdateAttrs
        )));
        assert!(matches!(
            registry.get(StatementKey::new(ObjectType::Job, StatementKind::MarkDeleted)),
            Err(DbError::UnknownStatement(_))
        ));
    }

    #[test]
    fn find_statements_are_ordered() {
        let registry = StatementRegistry::build();
        let all = get(&registry, ObjectType::Node, StatementKind::FindAll);
        assert!(all.sql().ends_with("ORDER BY nd_index, nd_creattm"));
        let since = get(&registry, ObjectType::Job, StatementKind::FindSince);
        assert!(since.sql().contains("ji_savetm > $1::text::timestamp"));
    }

    #[test]
    fn column_map_resolves_from_reported_names() {
        let registry = StatementRegistry::build();
        let select = get(&registry, ObjectType::MomInfoTime, StatementKind::Select);
        let map = ColumnMap::resolve(&select, &["mit_time", "mit_gen"]);
        assert_eq!(map.ok().map(|m| m.quick), Some(vec![0, 1]));

        let missing = ColumnMap::resolve(&select, &["mit_time"]);
        assert!(matches!(missing, Err(DbError::MissingColumn { .. })));
    }
}
