//! The explicit server context.
//!
//! One [`ServerContext`] per server process owns the store connection, the
//! gateway, the transaction coordinator and the entity cache. Recovery and
//! the save entry points are methods on it.

use std::sync::Arc;

use wlm_db::{DbConn, FatalHandler, Gateway, Isolation, TxCoordinator, TxMode};
use wlm_types::{JobId, SaveTimestamp};

use crate::cache::EntityCache;
use crate::config::WlmConfig;

/// Highest job sequence number before numbering wraps to zero.
pub const MAX_JOB_SEQUENCE: i64 = 9_999_999;

/// Who this server is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerIdentity {
    /// Server name, the suffix of every job id it hands out.
    pub name: String,
    /// Index stamped on the jobs and reservations it creates.
    pub index: i32,
}

/// Greatest save timestamps seen so far, per polled object kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Watermarks {
    /// Jobs.
    pub jobs: Option<SaveTimestamp>,
    /// Reservations.
    pub resvs: Option<SaveTimestamp>,
}

impl Watermarks {
    /// Raise `mark` to `seen` if it is newer.
    pub fn advance(mark: &mut Option<SaveTimestamp>, seen: Option<&SaveTimestamp>) {
        let Some(seen) = seen else {
            return;
        };
        if mark.as_ref().is_none_or(|current| seen > current) {
            *mark = Some(seen.clone());
        }
    }
}

/// Hands out job ids from the server's sequence counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobIdAllocator {
    next: i64,
}

impl JobIdAllocator {
    /// An allocator whose first id uses `next`.
    pub const fn starting_at(next: i64) -> Self {
        Self { next }
    }

    /// The sequence number the next id will use.
    pub const fn peek(&self) -> i64 {
        self.next
    }

    /// Take the next id and advance, wrapping past [`MAX_JOB_SEQUENCE`].
    pub fn allocate(&mut self, server: &str) -> JobId {
        let id = JobId::from_sequence(self.next, server);
        self.next = if self.next >= MAX_JOB_SEQUENCE {
            0
        } else {
            self.next.saturating_add(1)
        };
        id
    }
}

/// State owned by one server process.
pub struct ServerContext<C: DbConn> {
    pub(crate) conn: C,
    pub(crate) gateway: Gateway,
    pub(crate) coordinator: TxCoordinator,
    pub(crate) cache: EntityCache,
    pub(crate) identity: ServerIdentity,
    pub(crate) watermarks: Watermarks,
    pub(crate) allocator: JobIdAllocator,
    pub(crate) tx_mode: TxMode,
    pub(crate) max_save_attempts: u32,
}

impl<C: DbConn> core::fmt::Debug for ServerContext<C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ServerContext")
            .field("identity", &self.identity)
            .field("watermarks", &self.watermarks)
            .field("allocator", &self.allocator)
            .finish_non_exhaustive()
    }
}

impl<C: DbConn> ServerContext<C> {
    /// A context with default transaction settings.
    pub fn new(conn: C, identity: ServerIdentity, coordinator: TxCoordinator) -> Self {
        Self {
            conn,
            gateway: Gateway::new(identity.index),
            coordinator,
            cache: EntityCache::new(),
            identity,
            watermarks: Watermarks::default(),
            allocator: JobIdAllocator::default(),
            tx_mode: TxMode::default(),
            max_save_attempts: 3,
        }
    }

    /// A context configured from `config`, escalating fatal failures to
    /// `fatal`.
    pub fn from_config(conn: C, config: &WlmConfig, fatal: Arc<dyn FatalHandler>) -> Self {
        let identity = ServerIdentity {
            name: config.server.name.clone(),
            index: config.server.index,
        };
        let mut context = Self::new(conn, identity, TxCoordinator::new(fatal));
        context.tx_mode = TxMode {
            isolation: Isolation::ReadCommitted,
            async_commit: config.database.async_commit,
        };
        context.max_save_attempts = config.server.max_save_attempts;
        context
    }

    /// Limit the attempts at inserting a new job.
    #[must_use]
    pub fn with_max_save_attempts(mut self, attempts: u32) -> Self {
        self.max_save_attempts = attempts.max(1);
        self
    }

    /// Mode used for every transaction this context opens.
    #[must_use]
    pub const fn with_tx_mode(mut self, mode: TxMode) -> Self {
        self.tx_mode = mode;
        self
    }

    /// The connection.
    pub const fn conn(&mut self) -> &mut C {
        &mut self.conn
    }

    /// The gateway.
    pub const fn gateway(&self) -> Gateway {
        self.gateway
    }

    /// The cache.
    pub const fn cache(&self) -> &EntityCache {
        &self.cache
    }

    /// The cache, mutably.
    pub const fn cache_mut(&mut self) -> &mut EntityCache {
        &mut self.cache
    }

    /// This server's identity.
    pub const fn identity(&self) -> &ServerIdentity {
        &self.identity
    }

    /// Refresh watermarks.
    pub const fn watermarks(&self) -> &Watermarks {
        &self.watermarks
    }

    /// The job id allocator.
    pub const fn allocator(&self) -> JobIdAllocator {
        self.allocator
    }

    /// Give up the context and keep the connection.
    pub fn into_conn(self) -> C {
        self.conn
    }
}
