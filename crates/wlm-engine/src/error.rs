//! Error types for the engine binary.
//!
//! [`EngineError`] wraps every failure mode during startup and the refresh
//! loop so `main` can propagate with `?`.

/// Top-level error for the engine binary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: wlm_server::ConfigError,
    },

    /// Connecting to the state store failed.
    #[error("database error: {source}")]
    Database {
        /// The underlying data-layer error.
        #[from]
        source: wlm_db::DbError,
    },

    /// Recovery or refresh failed.
    #[error("server error: {source}")]
    Server {
        /// The underlying server error.
        #[from]
        source: wlm_server::ServerError,
    },
}
