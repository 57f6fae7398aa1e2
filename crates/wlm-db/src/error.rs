//! Error types for the data layer.
//!
//! All errors are propagated via [`DbError`]. Store errors are classified on
//! conversion: a unique-key violation becomes [`DbError::DuplicateKey`] so the
//! gateway can tell an identity collision apart from every other failure.

use wlm_codec::CodecError;
use wlm_types::TimestampError;

/// `SQLSTATE` for `unique_violation`.
const UNIQUE_VIOLATION: &str = "23505";

/// Text `PostgreSQL` uses for unique violations; matched only when the
/// structured code is unavailable.
const DUPLICATE_KEY_TEXT: &str = "duplicate key value";

/// Errors that can occur in the data layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[source] sqlx::Error),

    /// A `PostgreSQL` migration failed.
    #[error("PostgreSQL migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// An insert collided with an existing identity key.
    #[error("duplicate key: {detail}")]
    DuplicateKey {
        /// Store-provided description.
        detail: String,
    },

    /// A statement failed to prepare while setting up a connection.
    #[error("failed to prepare statement {statement}: {source}")]
    Prepare {
        /// Registered statement name.
        statement: String,
        /// The underlying error.
        source: sqlx::Error,
    },

    /// A prepared statement does not return a column it must return.
    #[error("statement {statement} is missing column {column}")]
    MissingColumn {
        /// Registered statement name.
        statement: String,
        /// Expected column.
        column: String,
    },

    /// No statement is registered for the requested object and operation.
    #[error("no statement registered for {0}")]
    UnknownStatement(String),

    /// The number of bound parameters does not match the statement.
    #[error("statement {statement} takes {expected} parameters, got {actual}")]
    ParamCount {
        /// Registered statement name.
        statement: String,
        /// Parameters the statement declares.
        expected: usize,
        /// Parameters supplied.
        actual: usize,
    },

    /// A parameter or column value has the wrong type or is missing.
    #[error("invalid row or parameter: {0}")]
    InvalidRow(String),

    /// Attribute encoding or decoding failed.
    #[error("attribute codec error: {0}")]
    Codec(#[from] CodecError),

    /// A save timestamp returned by the store could not be parsed.
    #[error("save timestamp error: {0}")]
    Timestamp(#[from] TimestampError),

    /// Transaction control was used out of order.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// Connecting took longer than the configured timeout.
    #[error("timed out connecting to the database after {0:?}")]
    Timeout(std::time::Duration),

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DbError {
    /// Whether this is an identity collision on insert.
    pub const fn is_duplicate_key(&self) -> bool {
        matches!(self, Self::DuplicateKey { .. })
    }

    /// Legacy numeric result code for a failure.
    pub const fn code(&self) -> i32 {
        -1
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        if is_unique_violation(&err) {
            Self::DuplicateKey {
                detail: err.to_string(),
            }
        } else {
            Self::Postgres(err)
        }
    }
}

/// Classify a store error as a unique-key violation.
///
/// Prefers the structured `SQLSTATE`; falls back to message text for drivers
/// or proxies that drop the code.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            db.is_unique_violation()
                || db.code().is_some_and(|code| code == UNIQUE_VIOLATION)
                || db.message().contains(DUPLICATE_KEY_TEXT)
        }
        other => other.to_string().contains(DUPLICATE_KEY_TEXT),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_text_fallback_is_classified() {
        let err = sqlx::Error::Protocol(
            "ERROR: duplicate key value violates unique constraint \"job_pkey\"".to_owned(),
        );
        assert!(is_unique_violation(&err));
        assert!(DbError::from(err).is_duplicate_key());
    }

    #[test]
    fn other_errors_stay_generic() {
        let err = DbError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, DbError::Postgres(_)));
        assert_eq!(err.code(), -1);
    }
}
