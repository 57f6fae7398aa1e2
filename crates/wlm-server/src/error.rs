//! Error types for the server persistence layer.

use wlm_db::DbError;

use crate::config::ConfigError;

/// Errors returned by the server-side persistence entry points.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The data layer failed.
    #[error("database error: {source}")]
    Db {
        /// The underlying data-layer error.
        #[from]
        source: DbError,
    },

    /// Configuration could not be loaded.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: ConfigError,
    },

    /// An object expected in the store is not there.
    #[error("{object} {key} not found")]
    NotFound {
        /// Object kind.
        object: &'static str,
        /// Identity key.
        key: String,
    },

    /// A stored row could not be turned into an object.
    #[error("failed to decode {object} {key}: {source}")]
    Decode {
        /// Object kind.
        object: &'static str,
        /// Identity key.
        key: String,
        /// The underlying decode error.
        source: Box<DbError>,
    },

    /// Every candidate job id collided with an existing row.
    #[error("no free job id after {attempts} attempts")]
    IdentityExhausted {
        /// Insert attempts made.
        attempts: u32,
    },
}
