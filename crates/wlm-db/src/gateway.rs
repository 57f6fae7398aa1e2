//! Object persistence gateway.
//!
//! Translates save, load, delete and find requests on [`Persistable`] objects
//! into registered statements. The gateway decides what a save writes:
//!
//! - a new object is inserted with its quick-save block and full attributes
//! - otherwise the quick-save block is written only if `QUICK` was requested
//!   and its digest changed
//! - attributes are written only if `ATTRS` was requested; terminal objects
//!   and `FULL` saves replace the stored set, everything else sends a delta
//!
//! Change tracking (digest, modified flags, save timestamp) is committed to
//! the object only after the store accepted the write.

use wlm_codec::{AttrList, EncodeMode, digest, split_flat_key};
use wlm_types::{AttributeSet, SaveTimestamp};

use crate::binder::Params;
use crate::conn::{DbConn, FindFilter, LockMode, StoredRow};
use crate::cursor::Cursor;
use crate::entities::Persistable;
use crate::error::DbError;
use crate::outcome::{DeleteOutcome, LoadOutcome, SaveFlags, SaveOutcome};
use crate::statements::{StatementKey, StatementKind};

/// Result of the write phase of a save.
enum Written {
    /// Nothing needed writing.
    Skipped,
    /// Rows were written; carries the new save timestamp.
    Done(Option<SaveTimestamp>),
    /// An update matched no row.
    NoRows,
}

/// Stores and loads objects through a [`DbConn`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Gateway {
    server_index: i32,
}

impl Gateway {
    /// A gateway that stamps new objects with `server_index`.
    pub const fn new(server_index: i32) -> Self {
        Self { server_index }
    }

    /// Index stamped on newly inserted jobs and reservations.
    pub const fn server_index(&self) -> i32 {
        self.server_index
    }

    // ========================================================================
    // Save
    // ========================================================================

    /// Save `obj` according to `flags`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Codec`] if attributes fail to encode (nothing is
    /// written), or any store error. A key collision on a `NEW` insert is
    /// reported as [`SaveOutcome::DuplicateKey`] instead.
    pub async fn save<T, C>(
        &self,
        conn: &mut C,
        obj: &mut T,
        flags: SaveFlags,
    ) -> Result<SaveOutcome, DbError>
    where
        T: Persistable,
        C: DbConn + ?Sized,
    {
        if flags.contains(SaveFlags::MARK_DELETED) {
            return mark_deleted(conn, obj).await;
        }

        let is_new = flags.contains(SaveFlags::NEW);
        if is_new {
            obj.stamp_owner(self.server_index);
        }

        let schema = T::schema();
        let mut qs_digest = obj.meta().qs_digest;
        let changed = digest::has_changed(&mut qs_digest, obj.quick());
        let include_quick =
            !schema.quick.is_empty() && (is_new || (flags.contains(SaveFlags::QUICK) && changed));

        let mode = if is_new || obj.is_terminal() || flags.contains(SaveFlags::FULL) {
            EncodeMode::Full
        } else {
            EncodeMode::Delta
        };
        let attrs = match obj.attributes() {
            Some(set) if is_new || flags.contains(SaveFlags::ATTRS) => {
                Some(wlm_codec::encode(set, mode)?)
            }
            _ => None,
        };

        let written = if is_new {
            insert(conn, obj, attrs).await
        } else {
            update(conn, obj, include_quick, mode, attrs).await
        };

        match written {
            Ok(Written::Done(savetm)) => {
                let meta = obj.meta_mut();
                if include_quick {
                    meta.qs_digest = qs_digest;
                }
                if savetm.is_some() {
                    meta.savetm = savetm;
                }
                meta.is_new = false;
                if let Some(set) = obj.attributes_mut() {
                    set.clear_modified();
                }
                tracing::debug!(
                    object = %schema.object,
                    key = obj.key().unwrap_or_default(),
                    savetm = ?obj.meta().savetm,
                    "Saved object"
                );
                Ok(SaveOutcome::Saved)
            }
            Ok(Written::Skipped) => Ok(SaveOutcome::Saved),
            Ok(Written::NoRows) => {
                tracing::debug!(
                    object = %schema.object,
                    key = obj.key().unwrap_or_default(),
                    "Update matched no rows"
                );
                Ok(SaveOutcome::NoRows)
            }
            Err(DbError::DuplicateKey { detail }) if is_new => {
                tracing::debug!(
                    object = %schema.object,
                    key = obj.key().unwrap_or_default(),
                    detail = %detail,
                    "Insert collided with an existing key"
                );
                Ok(SaveOutcome::DuplicateKey)
            }
            Err(err) => {
                tracing::error!(
                    object = %schema.object,
                    key = obj.key().unwrap_or_default(),
                    error = %err,
                    "Failed to save object"
                );
                Err(err)
            }
        }
    }

    /// Merge attribute entries into the stored set and into `obj`.
    ///
    /// # Errors
    ///
    /// Returns any store or codec error.
    pub async fn add_or_update_attrs<T, C>(
        &self,
        conn: &mut C,
        obj: &mut T,
        entries: AttrList,
    ) -> Result<SaveOutcome, DbError>
    where
        T: Persistable,
        C: DbConn + ?Sized,
    {
        let mut params = key_params(obj)?;
        params.attrs(entries.clone());
        let result = conn
            .execute(StatementKey::new(T::schema().object, StatementKind::UpdateAttrs), params)
            .await?;
        if result.rows_affected == 0 {
            return Ok(SaveOutcome::NoRows);
        }
        if let Some(set) = obj.attributes_mut() {
            wlm_codec::decode(&entries, set)?;
        }
        obj.meta_mut().savetm = result.savetm;
        Ok(SaveOutcome::Saved)
    }

    /// Remove attributes by flat key from the stored set and from `obj`.
    ///
    /// # Errors
    ///
    /// Returns any store error.
    pub async fn delete_attrs<T, C>(
        &self,
        conn: &mut C,
        obj: &mut T,
        names: Vec<String>,
    ) -> Result<SaveOutcome, DbError>
    where
        T: Persistable,
        C: DbConn + ?Sized,
    {
        let mut params = key_params(obj)?;
        params.names(names.clone());
        let result = conn
            .execute(StatementKey::new(T::schema().object, StatementKind::RemoveAttrs), params)
            .await?;
        if result.rows_affected == 0 {
            return Ok(SaveOutcome::NoRows);
        }
        if let Some(set) = obj.attributes_mut() {
            for flat in &names {
                discard(set, flat);
            }
        }
        obj.meta_mut().savetm = result.savetm;
        Ok(SaveOutcome::Saved)
    }

    // ========================================================================
    // Load, delete, find
    // ========================================================================

    /// Refresh `obj` from its stored row.
    ///
    /// If the stored save timestamp equals the one `obj` already holds,
    /// nothing is decoded and [`LoadOutcome::Unchanged`] is returned; a
    /// requested row lock is still taken.
    ///
    /// # Errors
    ///
    /// Returns any store error, or a decode error. On error `obj` is left
    /// untouched.
    pub async fn load<T, C>(
        &self,
        conn: &mut C,
        obj: &mut T,
        lock: LockMode,
    ) -> Result<LoadOutcome, DbError>
    where
        T: Persistable,
        C: DbConn + ?Sized,
    {
        let kind = match lock {
            LockMode::None => StatementKind::Select,
            LockMode::ForUpdate => StatementKind::SelectLocked,
        };
        let params = key_params(obj)?;
        let rows = conn
            .query(StatementKey::new(T::schema().object, kind), params)
            .await?;
        let Some(row) = rows.into_iter().next() else {
            return Ok(LoadOutcome::NotFound);
        };
        if row.savetm.is_some() && row.savetm == obj.meta().savetm {
            return Ok(LoadOutcome::Unchanged);
        }
        apply_row(obj, row)?;
        Ok(LoadOutcome::Loaded)
    }

    /// Load an object that is not in memory yet.
    ///
    /// # Errors
    ///
    /// Returns any store or decode error.
    pub async fn load_by_key<T, C>(
        &self,
        conn: &mut C,
        key: Option<&str>,
        lock: LockMode,
    ) -> Result<Option<T>, DbError>
    where
        T: Persistable,
        C: DbConn + ?Sized,
    {
        let mut obj = T::blank(key.map(str::to_owned))?;
        match self.load(conn, &mut obj, lock).await? {
            LoadOutcome::NotFound => Ok(None),
            LoadOutcome::Loaded | LoadOutcome::Unchanged => Ok(Some(obj)),
        }
    }

    /// Delete the row with `key`.
    ///
    /// # Errors
    ///
    /// Returns any store error.
    pub async fn delete<T, C>(&self, conn: &mut C, key: &str) -> Result<DeleteOutcome, DbError>
    where
        T: Persistable,
        C: DbConn + ?Sized,
    {
        let mut params = Params::new();
        params.key(key)?;
        let result = conn
            .execute(StatementKey::new(T::schema().object, StatementKind::Delete), params)
            .await?;
        if result.rows_affected == 0 {
            Ok(DeleteOutcome::NotFound)
        } else {
            tracing::debug!(object = %T::schema().object, key, "Deleted object");
            Ok(DeleteOutcome::Deleted)
        }
    }

    /// List rows in the object's stable order.
    ///
    /// # Errors
    ///
    /// Returns any store error. Decode errors surface per row from the
    /// cursor.
    pub async fn find<T, C>(&self, conn: &mut C, filter: FindFilter) -> Result<Cursor<T>, DbError>
    where
        T: Persistable,
        C: DbConn + ?Sized,
    {
        let mut params = Params::new();
        let kind = match filter {
            FindFilter::All => StatementKind::FindAll,
            FindFilter::ChangedSince(savetm) => {
                params.timestamp(savetm);
                StatementKind::FindSince
            }
            FindFilter::Secondary(value) => {
                params.str(value);
                StatementKind::FindBySecondary
            }
        };
        let rows = conn
            .query(StatementKey::new(T::schema().object, kind), params)
            .await?;
        Ok(Cursor::new(rows))
    }
}

/// Overwrite `obj` with a stored row.
///
/// The quick-save block and attributes are decoded into fresh buffers and
/// assigned only once both succeed. The digest is recomputed from the loaded
/// block and the object stops being new.
///
/// # Errors
///
/// Returns [`DbError::InvalidRow`] or [`DbError::Codec`]; `obj` is then
/// unchanged.
pub fn apply_row<T: Persistable>(obj: &mut T, row: StoredRow) -> Result<(), DbError> {
    let quick = T::decode_quick(row.quick)?;
    let attrs = match (row.attributes.as_ref(), obj.attributes()) {
        (Some(list), Some(current)) => {
            let mut fresh = AttributeSet::new(current.table());
            wlm_codec::decode(list, &mut fresh)?;
            Some(fresh)
        }
        _ => None,
    };

    let qs_digest = digest::hash(&quick);
    obj.set_quick(quick);
    if let (Some(fresh), Some(set)) = (attrs, obj.attributes_mut()) {
        *set = fresh;
    }
    if let Some(deleted) = row.deleted {
        obj.set_deleted(deleted);
    }
    let meta = obj.meta_mut();
    meta.savetm = row.savetm;
    meta.qs_digest = Some(qs_digest);
    meta.is_new = false;
    Ok(())
}

// ============================================================================
// Write helpers
// ============================================================================

fn key_params<T: Persistable>(obj: &T) -> Result<Params, DbError> {
    let mut params = Params::new();
    if let Some(key) = obj.key() {
        params.key(key)?;
    }
    Ok(params)
}

async fn insert<T, C>(conn: &mut C, obj: &T, attrs: Option<AttrList>) -> Result<Written, DbError>
where
    T: Persistable,
    C: DbConn + ?Sized,
{
    let mut params = key_params(obj)?;
    params.extend(obj.quick_params());
    if T::schema().attributes.is_some() {
        params.attrs(attrs.unwrap_or_default());
    }
    let result = conn
        .execute(StatementKey::new(T::schema().object, StatementKind::Insert), params)
        .await?;
    Ok(Written::Done(result.savetm))
}

async fn update<T, C>(
    conn: &mut C,
    obj: &T,
    include_quick: bool,
    mode: EncodeMode,
    attrs: Option<AttrList>,
) -> Result<Written, DbError>
where
    T: Persistable,
    C: DbConn + ?Sized,
{
    let object = T::schema().object;
    let run = |kind: StatementKind| StatementKey::new(object, kind);

    match (include_quick, attrs, mode) {
        (true, Some(list), EncodeMode::Full) => {
            let mut params = key_params(obj)?;
            params.extend(obj.quick_params()).attrs(list);
            exec(conn, run(StatementKind::UpdateFull), params).await
        }
        (true, delta, _) => {
            let mut params = key_params(obj)?;
            params.extend(obj.quick_params());
            let written = exec(conn, run(StatementKind::UpdateQuick), params).await?;
            match (written, delta) {
                (Written::Done(savetm), Some(list)) => {
                    match apply_delta(conn, obj, list).await? {
                        Written::Skipped => Ok(Written::Done(savetm)),
                        other => Ok(other),
                    }
                }
                (written, _) => Ok(written),
            }
        }
        (false, Some(list), EncodeMode::Full) => {
            let mut params = key_params(obj)?;
            params.attrs(list);
            exec(conn, run(StatementKind::ReplaceAttrs), params).await
        }
        (false, Some(list), EncodeMode::Delta) => apply_delta(conn, obj, list).await,
        (false, None, _) => Ok(Written::Skipped),
    }
}

/// Send a delta: set entries merge into the stored set, delete markers
/// remove keys from it.
async fn apply_delta<T, C>(conn: &mut C, obj: &T, list: AttrList) -> Result<Written, DbError>
where
    T: Persistable,
    C: DbConn + ?Sized,
{
    let object = T::schema().object;
    let (sets, deletes) = list.partition();
    let mut written = Written::Skipped;

    if !sets.is_empty() {
        let mut params = key_params(obj)?;
        params.attrs(sets);
        written = exec(conn, StatementKey::new(object, StatementKind::UpdateAttrs), params).await?;
        if matches!(written, Written::NoRows) {
            return Ok(written);
        }
    }
    if !deletes.is_empty() {
        let mut params = key_params(obj)?;
        params.names(deletes.flat_keys());
        written =
            exec(conn, StatementKey::new(object, StatementKind::RemoveAttrs), params).await?;
    }
    Ok(written)
}

async fn exec<C>(conn: &mut C, key: StatementKey, params: Params) -> Result<Written, DbError>
where
    C: DbConn + ?Sized,
{
    let result = conn.execute(key, params).await?;
    if result.rows_affected == 0 {
        Ok(Written::NoRows)
    } else {
        Ok(Written::Done(result.savetm))
    }
}

async fn mark_deleted<T, C>(conn: &mut C, obj: &mut T) -> Result<SaveOutcome, DbError>
where
    T: Persistable,
    C: DbConn + ?Sized,
{
    let mut params = key_params(obj)?;
    params.int(1);
    let key = StatementKey::new(T::schema().object, StatementKind::MarkDeleted);
    match exec(conn, key, params).await? {
        Written::Done(savetm) => {
            obj.set_deleted(true);
            obj.meta_mut().savetm = savetm;
            tracing::debug!(key = obj.key().unwrap_or_default(), "Marked deleted");
            Ok(SaveOutcome::Saved)
        }
        Written::NoRows | Written::Skipped => Ok(SaveOutcome::NoRows),
    }
}

fn discard(set: &mut AttributeSet, flat: &str) {
    let (name, resource) = split_flat_key(flat);
    match set.table().index_of(name) {
        Some(index) => set.discard(index, resource),
        None => set.discard_unknown(name, resource),
    }
}
