//! In-process state store.
//!
//! Executes the same registered statements as the `PostgreSQL` backend
//! against shared in-memory tables, so everything above the [`DbConn`] seam
//! runs unchanged without a database. Several [`MemoryConn`]s opened from one
//! [`MemoryStore`] see the same tables.
//!
//! Semantics that differ from `PostgreSQL`:
//!
//! - writes are visible to other connections immediately (read uncommitted);
//!   rollback replays an undo log
//! - row locks and isolation levels are accepted and ignored
//! - attribute sets are kept as [`PackedBytes`] payloads

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{NaiveDateTime, SubsecRound as _, TimeDelta, Utc};
use wlm_codec::{AttrList, PackedBytes, WireFormat as _};
use wlm_types::{ObjectType, SaveTimestamp};

use crate::binder::{Param, ParamReader, Params};
use crate::conn::{DbConn, ExecResult, StoredRow, TxMode};
use crate::error::DbError;
use crate::schema::EntitySchema;
use crate::statements::{Prepared, StatementKey, StatementKind, StatementRegistry};

type RowKey = (ObjectType, String);

#[derive(Debug, Clone)]
struct MemRow {
    key: Option<String>,
    quick: Vec<Param>,
    attrs: Vec<u8>,
    savetm: Option<NaiveDateTime>,
    created: u64,
    deleted: bool,
}

#[derive(Debug, Default)]
struct Tables {
    rows: BTreeMap<RowKey, MemRow>,
    last_stamp: Option<NaiveDateTime>,
    next_created: u64,
}

impl Tables {
    /// Next save timestamp: now, but strictly after every timestamp handed
    /// out so far and after the row's previous one.
    fn next_stamp(&mut self, previous: Option<NaiveDateTime>) -> NaiveDateTime {
        let step = TimeDelta::microseconds(1);
        let mut stamp = Utc::now().naive_utc().trunc_subsecs(6);
        for floor in [self.last_stamp, previous].into_iter().flatten() {
            if let Some(after) = floor.checked_add_signed(step) {
                stamp = stamp.max(after);
            }
        }
        self.last_stamp = Some(stamp);
        stamp
    }
}

/// Shared in-memory tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a connection.
    pub fn connect(&self) -> MemoryConn {
        MemoryConn {
            tables: Arc::clone(&self.tables),
            registry: StatementRegistry::build(),
            undo: None,
        }
    }

    /// Number of stored rows for `object`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Transaction`] if the tables are poisoned.
    pub fn count(&self, object: ObjectType) -> Result<usize, DbError> {
        let tables = lock(&self.tables)?;
        Ok(tables.rows.keys().filter(|(o, _)| *o == object).count())
    }
}

/// A connection to a [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryConn {
    tables: Arc<Mutex<Tables>>,
    registry: StatementRegistry,
    undo: Option<Vec<(RowKey, Option<MemRow>)>>,
}

fn lock(tables: &Mutex<Tables>) -> Result<MutexGuard<'_, Tables>, DbError> {
    tables
        .lock()
        .map_err(|_poisoned| DbError::Transaction("memory store lock poisoned".to_owned()))
}

#[async_trait]
impl DbConn for MemoryConn {
    fn registry(&self) -> &StatementRegistry {
        &self.registry
    }

    fn in_transaction(&self) -> bool {
        self.undo.is_some()
    }

    async fn begin(&mut self, _mode: TxMode) -> Result<(), DbError> {
        if self.undo.is_some() {
            return Err(DbError::Transaction("transaction already open".to_owned()));
        }
        self.undo = Some(Vec::new());
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DbError> {
        match self.undo.take() {
            Some(_) => Ok(()),
            None => Err(DbError::Transaction("no transaction to commit".to_owned())),
        }
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        let undo = self
            .undo
            .take()
            .ok_or_else(|| DbError::Transaction("no transaction to roll back".to_owned()))?;
        let mut tables = lock(&self.tables)?;
        for (key, before) in undo.into_iter().rev() {
            match before {
                Some(row) => tables.rows.insert(key, row),
                None => tables.rows.remove(&key),
            };
        }
        Ok(())
    }

    async fn execute(
        &mut self,
        key: StatementKey,
        params: Params,
    ) -> Result<ExecResult, DbError> {
        let prepared = self.registry.get(key)?;
        params.check(prepared)?;
        let mut tables = lock(&self.tables)?;
        let mut write = Write {
            tables: &mut *tables,
            undo: self.undo.as_mut(),
            schema: prepared.schema(),
        };
        write.run(prepared, params.into_reader())
    }

    async fn query(
        &mut self,
        key: StatementKey,
        params: Params,
    ) -> Result<Vec<StoredRow>, DbError> {
        let prepared = self.registry.get(key)?;
        params.check(prepared)?;
        let tables = lock(&self.tables)?;
        select(&tables, prepared, params.into_reader())
    }
}

// ============================================================================
// Writes
// ============================================================================

struct Write<'a> {
    tables: &'a mut Tables,
    undo: Option<&'a mut Vec<(RowKey, Option<MemRow>)>>,
    schema: &'static EntitySchema,
}

impl Write<'_> {
    fn run(&mut self, prepared: &Prepared, mut r: ParamReader) -> Result<ExecResult, DbError> {
        let schema = self.schema;
        let key = match schema.key {
            Some(_) => r.str()?,
            None => String::new(),
        };
        let row_key = (schema.object, key);

        if prepared.key().kind == StatementKind::Insert {
            return self.insert(row_key, r);
        }
        if prepared.key().kind == StatementKind::Delete {
            let removed = self.tables.rows.remove(&row_key);
            let rows_affected = u64::from(removed.is_some());
            if let Some(row) = removed {
                self.remember(row_key, Some(row));
            }
            return Ok(ExecResult {
                rows_affected,
                savetm: None,
            });
        }

        let Some(mut row) = self.tables.rows.get(&row_key).cloned() else {
            return Ok(ExecResult::default());
        };
        let before = row.clone();
        match prepared.key().kind {
            StatementKind::UpdateFull => {
                row.quick = quick_values(schema, &mut r)?;
                row.attrs = PackedBytes::encode(&r.attrs()?)?;
            }
            StatementKind::UpdateQuick => row.quick = quick_values(schema, &mut r)?,
            StatementKind::UpdateAttrs => {
                let mut stored = PackedBytes::decode(&row.attrs)?;
                stored.merge(r.attrs()?);
                row.attrs = PackedBytes::encode(&stored)?;
            }
            StatementKind::ReplaceAttrs => row.attrs = PackedBytes::encode(&r.attrs()?)?,
            StatementKind::RemoveAttrs => {
                let mut stored = PackedBytes::decode(&row.attrs)?;
                stored.remove_keys(&r.names()?);
                row.attrs = PackedBytes::encode(&stored)?;
            }
            StatementKind::MarkDeleted => row.deleted = r.int()? != 0,
            other => {
                return Err(DbError::UnknownStatement(format!(
                    "{} is not a write",
                    other.as_str()
                )));
            }
        }
        if schema.savetm.is_some() {
            row.savetm = Some(self.tables.next_stamp(row.savetm));
        }
        let savetm = row.savetm.map(SaveTimestamp::from_datetime);
        self.tables.rows.insert(row_key.clone(), row);
        self.remember(row_key, Some(before));
        Ok(ExecResult {
            rows_affected: 1,
            savetm,
        })
    }

    fn insert(&mut self, row_key: RowKey, mut r: ParamReader) -> Result<ExecResult, DbError> {
        let schema = self.schema;
        if self.tables.rows.contains_key(&row_key) {
            return Err(DbError::DuplicateKey {
                detail: format!(
                    "duplicate key value violates unique constraint on {} ({})",
                    schema.table, row_key.1
                ),
            });
        }
        let quick = quick_values(schema, &mut r)?;
        let attrs = if schema.attributes.is_some() {
            PackedBytes::encode(&r.attrs()?)?
        } else {
            PackedBytes::encode(&AttrList::new())?
        };
        let savetm = schema.savetm.map(|_| self.tables.next_stamp(None));
        let created = self.tables.next_created;
        self.tables.next_created = created.saturating_add(1);

        self.tables.rows.insert(
            row_key.clone(),
            MemRow {
                key: schema.key.map(|_| row_key.1.clone()),
                quick,
                attrs,
                savetm,
                created,
                deleted: false,
            },
        );
        self.remember(row_key, None);
        Ok(ExecResult {
            rows_affected: 1,
            savetm: savetm.map(SaveTimestamp::from_datetime),
        })
    }

    fn remember(&mut self, key: RowKey, before: Option<MemRow>) {
        if let Some(undo) = self.undo.as_mut() {
            undo.push((key, before));
        }
    }
}

fn quick_values(schema: &EntitySchema, r: &mut ParamReader) -> Result<Vec<Param>, DbError> {
    let values = r.take(schema.quick.len())?;
    for (value, column) in values.iter().zip(schema.quick) {
        if !value.fits(column.ty) {
            return Err(DbError::InvalidRow(format!(
                "{} does not fit column {}",
                value_kind(value),
                column.name
            )));
        }
    }
    Ok(values)
}

const fn value_kind(value: &Param) -> &'static str {
    match value {
        Param::Str(_) => "text",
        Param::Int(_) => "integer",
        Param::BigInt(_) => "bigint",
        Param::Blob(_) => "blob",
        Param::Attrs(_) => "attribute list",
        Param::Names(_) => "name list",
        Param::Timestamp(_) => "timestamp",
    }
}

// ============================================================================
// Reads
// ============================================================================

fn select(
    tables: &Tables,
    prepared: &Prepared,
    mut r: ParamReader,
) -> Result<Vec<StoredRow>, DbError> {
    let schema = prepared.schema();
    let object = schema.object;
    let mut rows: Vec<&MemRow> = match prepared.key().kind {
        StatementKind::Select | StatementKind::SelectLocked => {
            let key = match schema.key {
                Some(_) => r.str()?,
                None => String::new(),
            };
            tables.rows.get(&(object, key)).into_iter().collect()
        }
        StatementKind::FindAll => of_object(tables, object).collect(),
        StatementKind::FindSince => {
            let since = r.timestamp()?.to_datetime();
            of_object(tables, object)
                .filter(|row| row.savetm > since)
                .collect()
        }
        StatementKind::FindBySecondary => {
            let wanted = Param::Str(r.str()?);
            let position = schema.secondary.and_then(|c| schema.quick_position(c));
            of_object(tables, object)
                .filter(|row| position.and_then(|p| row.quick.get(p)) == Some(&wanted))
                .collect()
        }
        other => {
            return Err(DbError::UnknownStatement(format!(
                "{} is not a read",
                other.as_str()
            )));
        }
    };
    rows.sort_by(|a, b| order(schema, a, b));
    rows.into_iter().map(|row| stored_row(schema, row)).collect()
}

fn of_object(tables: &Tables, object: ObjectType) -> impl Iterator<Item = &MemRow> {
    tables
        .rows
        .iter()
        .filter(move |((o, _), _)| *o == object)
        .map(|(_, row)| row)
}

fn order(schema: &EntitySchema, a: &MemRow, b: &MemRow) -> Ordering {
    for column in schema.order_by {
        let ordering = if schema.creattm == Some(*column) {
            a.created.cmp(&b.created)
        } else {
            schema
                .quick_position(column)
                .map_or(Ordering::Equal, |p| compare(a.quick.get(p), b.quick.get(p)))
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    a.key.cmp(&b.key)
}

fn compare(a: Option<&Param>, b: Option<&Param>) -> Ordering {
    match (a, b) {
        (Some(Param::Int(x)), Some(Param::Int(y))) => x.cmp(y),
        (Some(Param::BigInt(x)), Some(Param::BigInt(y))) => x.cmp(y),
        (Some(Param::Str(x)), Some(Param::Str(y))) => x.cmp(y),
        (Some(Param::Blob(x)), Some(Param::Blob(y))) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

fn stored_row(schema: &EntitySchema, row: &MemRow) -> Result<StoredRow, DbError> {
    Ok(StoredRow {
        key: row.key.clone(),
        quick: row.quick.clone(),
        savetm: row.savetm.map(SaveTimestamp::from_datetime),
        attributes: schema
            .attributes
            .map(|_| PackedBytes::decode(&row.attrs))
            .transpose()?,
        deleted: schema.deleted.map(|_| row.deleted),
    })
}
