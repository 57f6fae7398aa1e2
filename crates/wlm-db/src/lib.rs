//! Data layer for the workload manager state store.
//!
//! Objects are saved and loaded through the [`Gateway`], which runs
//! registered statements on a [`DbConn`]. `PostgreSQL` is the production
//! backend; the in-process [`MemoryStore`] executes the same statements
//! against shared tables.
//!
//! # Architecture
//!
//! ```text
//! Server context
//!     |
//!     +-- TxCoordinator ---- begin / commit / abort (fatal hook)
//!     |
//!     +-- Gateway ---------- save / load / delete / find
//!             |
//!             +-- Persistable (schema, quick columns, attributes)
//!             +-- Params ----> DbConn
//!                                 |-- PgStore     (prepared statements)
//!                                 +-- MemoryConn  (shared tables)
//! ```
//!
//! # Modules
//!
//! - [`schema`] -- Static table layouts per object
//! - [`statements`] -- Statement generation, preparation and lookup
//! - [`binder`] -- Positional parameters
//! - [`conn`] -- The backend seam and row types
//! - [`entities`] -- Object to column bindings
//! - [`gateway`] -- Save, load, delete and find
//! - [`cursor`] -- Forward-only listings
//! - [`transaction`] -- Transaction control and fatal escalation
//! - [`postgres`] -- `PostgreSQL` backend
//! - [`memory`] -- In-process backend
//! - [`outcome`] -- Save flags and outcomes
//! - [`error`] -- Shared error types

pub mod binder;
pub mod conn;
pub mod cursor;
pub mod entities;
pub mod error;
pub mod gateway;
pub mod memory;
pub mod outcome;
pub mod postgres;
pub mod schema;
pub mod statements;
pub mod transaction;

// Re-export primary types for convenience.
pub use binder::{Param, ParamReader, Params};
pub use conn::{DbConn, ExecResult, FindFilter, Isolation, LockMode, StoredRow, TxMode};
pub use cursor::Cursor;
pub use entities::Persistable;
pub use error::DbError;
pub use gateway::{Gateway, apply_row};
pub use memory::{MemoryConn, MemoryStore};
pub use outcome::{DeleteOutcome, LoadOutcome, SaveFlags, SaveOutcome};
pub use postgres::{PgStore, PostgresConfig};
pub use schema::EntitySchema;
pub use statements::{StatementKey, StatementKind, StatementRegistry};
pub use transaction::{ExitOnFatal, FatalHandler, Transaction, TxCoordinator};
