//! Positional statement parameters.
//!
//! [`Params`] collects typed values in binding order; each backend turns them
//! into its own representation (`PostgreSQL` binds, the in-process store
//! reads them back with [`ParamReader`]). Quick-save columns travel as the
//! same [`Param`] values in both directions.

use wlm_codec::{AttrList, check_key};
use wlm_types::SaveTimestamp;

use crate::error::DbError;
use crate::schema::ColumnType;
use crate::statements::Prepared;

/// One bound value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Param {
    /// Text.
    Str(String),
    /// 32-bit integer.
    Int(i32),
    /// 64-bit integer.
    BigInt(i64),
    /// Binary blob.
    Blob(Vec<u8>),
    /// Serialized attribute list.
    Attrs(AttrList),
    /// Flat attribute keys, for removal.
    Names(Vec<String>),
    /// Save timestamp, for changed-since filters.
    Timestamp(SaveTimestamp),
}

impl Param {
    /// Whether the value matches a quick column type.
    pub const fn fits(&self, ty: ColumnType) -> bool {
        matches!(
            (self, ty),
            (Self::Str(_), ColumnType::Text)
                | (Self::Int(_), ColumnType::Int)
                | (Self::BigInt(_), ColumnType::BigInt)
                | (Self::Blob(_), ColumnType::Bytes)
        )
    }
}

/// Ordered parameter list for one statement execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    values: Vec<Param>,
}

impl Params {
    /// An empty list.
    pub const fn new() -> Self {
        Self { values: Vec::new() }
    }

    /// Bind an identity key, enforcing the wire-boundary length limit.
    pub fn key(&mut self, key: &str) -> Result<&mut Self, DbError> {
        check_key(key)?;
        Ok(self.str(key))
    }

    /// Bind text.
    pub fn str(&mut self, value: impl Into<String>) -> &mut Self {
        self.values.push(Param::Str(value.into()));
        self
    }

    /// Bind an `i32`.
    pub fn int(&mut self, value: i32) -> &mut Self {
        self.values.push(Param::Int(value));
        self
    }

    /// Bind an `i64`.
    pub fn bigint(&mut self, value: i64) -> &mut Self {
        self.values.push(Param::BigInt(value));
        self
    }

    /// Bind a binary blob.
    pub fn blob(&mut self, value: impl Into<Vec<u8>>) -> &mut Self {
        self.values.push(Param::Blob(value.into()));
        self
    }

    /// Bind a serialized attribute list.
    pub fn attrs(&mut self, list: AttrList) -> &mut Self {
        self.values.push(Param::Attrs(list));
        self
    }

    /// Bind flat attribute keys.
    pub fn names(&mut self, names: Vec<String>) -> &mut Self {
        self.values.push(Param::Names(names));
        self
    }

    /// Bind a save timestamp.
    pub fn timestamp(&mut self, value: SaveTimestamp) -> &mut Self {
        self.values.push(Param::Timestamp(value));
        self
    }

    /// Append already-typed quick column values.
    pub fn extend(&mut self, values: impl IntoIterator<Item = Param>) -> &mut Self {
        self.values.extend(values);
        self
    }

    /// Number of bound values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Take the list, leaving this one empty.
    pub fn take(&mut self) -> Self {
        core::mem::take(self)
    }

    /// Check the list against the statement it is about to run.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::ParamCount`] if the counts differ.
    pub fn check(&self, statement: &Prepared) -> Result<(), DbError> {
        if self.values.len() != statement.param_count() {
            return Err(DbError::ParamCount {
                statement: statement.name(),
                expected: statement.param_count(),
                actual: self.values.len(),
            });
        }
        Ok(())
    }

    /// Consume into a positional reader.
    pub fn into_reader(self) -> ParamReader {
        ParamReader {
            values: self.values.into_iter(),
        }
    }
}

impl IntoIterator for Params {
    type Item = Param;
    type IntoIter = std::vec::IntoIter<Param>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

/// Reads positional values back out with type checks.
#[derive(Debug)]
pub struct ParamReader {
    values: std::vec::IntoIter<Param>,
}

impl ParamReader {
    /// Wrap an already-collected value list (a stored row's quick columns).
    pub fn from_values(values: Vec<Param>) -> Self {
        Self {
            values: values.into_iter(),
        }
    }

    fn next(&mut self, what: &str) -> Result<Param, DbError> {
        self.values
            .next()
            .ok_or_else(|| DbError::InvalidRow(format!("missing {what}")))
    }

    /// Next value as text.
    pub fn str(&mut self) -> Result<String, DbError> {
        match self.next("text value")? {
            Param::Str(v) => Ok(v),
            other => Err(mismatch("text", &other)),
        }
    }

    /// Next value as `i32`.
    pub fn int(&mut self) -> Result<i32, DbError> {
        match self.next("integer value")? {
            Param::Int(v) => Ok(v),
            other => Err(mismatch("integer", &other)),
        }
    }

    /// Next value as `i64`.
    pub fn bigint(&mut self) -> Result<i64, DbError> {
        match self.next("bigint value")? {
            Param::BigInt(v) => Ok(v),
            other => Err(mismatch("bigint", &other)),
        }
    }

    /// Next value as a blob.
    pub fn blob(&mut self) -> Result<Vec<u8>, DbError> {
        match self.next("blob value")? {
            Param::Blob(v) => Ok(v),
            other => Err(mismatch("blob", &other)),
        }
    }

    /// Next value as an attribute list.
    pub fn attrs(&mut self) -> Result<AttrList, DbError> {
        match self.next("attribute list")? {
            Param::Attrs(v) => Ok(v),
            other => Err(mismatch("attribute list", &other)),
        }
    }

    /// Next value as flat attribute keys.
    pub fn names(&mut self) -> Result<Vec<String>, DbError> {
        match self.next("attribute names")? {
            Param::Names(v) => Ok(v),
            other => Err(mismatch("attribute names", &other)),
        }
    }

    /// Next value as a save timestamp.
    pub fn timestamp(&mut self) -> Result<SaveTimestamp, DbError> {
        match self.next("timestamp")? {
            Param::Timestamp(v) => Ok(v),
            other => Err(mismatch("timestamp", &other)),
        }
    }

    /// Next `count` values, unchecked.
    pub fn take(&mut self, count: usize) -> Result<Vec<Param>, DbError> {
        (0..count).map(|_| self.next("quick column")).collect()
    }
}

fn mismatch(expected: &str, got: &Param) -> DbError {
    DbError::InvalidRow(format!("expected {expected}, got {got:?}"))
}
