//! Server-side persistence lifecycle for the workload manager.
//!
//! A server process owns one [`ServerContext`]: the store connection, the
//! gateway, the transaction coordinator and the cache of recovered
//! objects. At startup it recovers everything from the store; afterwards it
//! polls for rows other servers changed and refreshes its cache in place.
//!
//! # Modules
//!
//! - [`config`] -- YAML configuration
//! - [`context`] -- The server context, identity and job id allocation
//! - [`cache`] -- Shared handles to recovered objects
//! - [`recovery`] -- Startup recovery and multi-server refresh
//! - [`persist`] -- Save, load and purge entry points
//! - [`error`] -- Server error type

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod persist;
pub mod recovery;

pub use cache::{Cached, EntityCache, Shared};
pub use config::{ConfigError, WlmConfig};
pub use context::{JobIdAllocator, ServerContext, ServerIdentity, Watermarks};
pub use error::ServerError;
pub use persist::PersistOutcome;
pub use recovery::{PollReport, Recovered, RecoveryReport};
