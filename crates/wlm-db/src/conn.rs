//! Backend-neutral connection seam.
//!
//! The gateway and the transaction coordinator only ever talk to a
//! [`DbConn`]. Two backends implement it: [`crate::PgStore`] for `PostgreSQL`
//! and [`crate::MemoryStore`] for in-process use and tests.

use async_trait::async_trait;
use wlm_codec::AttrList;
use wlm_types::SaveTimestamp;

use crate::binder::{Param, Params};
use crate::error::DbError;
use crate::statements::{StatementKey, StatementRegistry};

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Isolation {
    /// Each statement sees data committed before it began.
    #[default]
    ReadCommitted,
    /// The transaction sees one snapshot.
    RepeatableRead,
    /// Full serializability.
    Serializable,
}

impl Isolation {
    /// SQL keyword form.
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

/// How a transaction is opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxMode {
    /// Isolation level.
    pub isolation: Isolation,
    /// Do not wait for the commit record to reach disk.
    pub async_commit: bool,
}

impl TxMode {
    /// Default mode with asynchronous commit.
    #[must_use]
    pub const fn async_commit() -> Self {
        Self {
            isolation: Isolation::ReadCommitted,
            async_commit: true,
        }
    }
}

/// Row selection for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FindFilter {
    /// Every row.
    All,
    /// Rows saved strictly after the timestamp.
    ChangedSince(SaveTimestamp),
    /// Rows whose secondary key equals the value.
    Secondary(String),
}

/// Row locking for single-object loads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LockMode {
    /// Plain read.
    #[default]
    None,
    /// Lock the row until the enclosing transaction ends.
    ForUpdate,
}

/// Outcome of a write statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecResult {
    /// Rows written.
    pub rows_affected: u64,
    /// New save timestamp, for versioned objects.
    pub savetm: Option<SaveTimestamp>,
}

/// One stored row, decoded into backend-neutral values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredRow {
    /// Identity key.
    pub key: Option<String>,
    /// Quick columns in schema order.
    pub quick: Vec<Param>,
    /// Save timestamp.
    pub savetm: Option<SaveTimestamp>,
    /// Attribute entries.
    pub attributes: Option<AttrList>,
    /// Soft-delete marker.
    pub deleted: Option<bool>,
}

/// A connection to a state store.
#[async_trait]
pub trait DbConn: Send {
    /// Statements available on this connection.
    fn registry(&self) -> &StatementRegistry;

    /// Whether a transaction is open.
    fn in_transaction(&self) -> bool;

    /// Open a transaction.
    async fn begin(&mut self, mode: TxMode) -> Result<(), DbError>;

    /// Commit the open transaction.
    async fn commit(&mut self) -> Result<(), DbError>;

    /// Roll back the open transaction.
    async fn rollback(&mut self) -> Result<(), DbError>;

    /// Run a write statement.
    async fn execute(&mut self, key: StatementKey, params: Params)
    -> Result<ExecResult, DbError>;

    /// Run a read statement.
    async fn query(&mut self, key: StatementKey, params: Params)
    -> Result<Vec<StoredRow>, DbError>;
}
