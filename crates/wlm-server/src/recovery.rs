//! Recovery and refresh of cached objects from the store.
//!
//! Several servers may write the same tables. Each keeps its cache current
//! by comparing save timestamps: a row whose timestamp matches the cached
//! instance is skipped, anything else is decoded into a private instance
//! and swapped into the cached handle only after the decode succeeded.

use std::sync::Arc;

use wlm_db::{
    DbConn, DbError, FindFilter, LoadOutcome, LockMode, Persistable, StoredRow, apply_row,
};
use wlm_types::{Job, Node, Reservation, SaveTimestamp, Scheduler, Server};

use crate::cache::{Cached, Shared, shared};
use crate::context::{JobIdAllocator, ServerContext, Watermarks};
use crate::error::ServerError;

/// What [`ServerContext::recover_by_key`] did.
#[derive(Debug)]
pub enum Recovered<T> {
    /// Loaded into a new instance.
    Loaded(T),
    /// The existing instance was overwritten from the store.
    Refreshed,
    /// The existing instance already matched the store.
    Unchanged,
}

/// Counts from one poll for changed rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Job rows returned.
    pub jobs_seen: usize,
    /// Jobs added to or refreshed in the cache.
    pub jobs_refreshed: usize,
    /// Reservation rows returned.
    pub resvs_seen: usize,
    /// Reservations added to or refreshed in the cache.
    pub resvs_refreshed: usize,
    /// Rows that failed to decode and were skipped.
    pub failed: usize,
}

/// Counts from startup recovery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Whether a stored server record was found.
    pub server_found: bool,
    /// Schedulers recovered.
    pub schedulers: usize,
    /// Nodes recovered.
    pub nodes: usize,
    /// Jobs recovered.
    pub jobs: usize,
    /// Reservations recovered.
    pub resvs: usize,
    /// Rows that failed to decode and were skipped.
    pub failed: usize,
}

/// Seen and refreshed counts for one object kind.
#[derive(Debug, Clone, Copy, Default)]
struct Tally {
    seen: usize,
    refreshed: usize,
    failed: usize,
}

impl<C: DbConn> ServerContext<C> {
    /// Recover one object by key.
    ///
    /// With `existing`, the stored row is compared against its save
    /// timestamp and the instance is overwritten in place only if the row
    /// changed. Without, a new instance is loaded. A missing row is logged
    /// and yields `None`; `existing` is then untouched.
    ///
    /// # Errors
    ///
    /// Returns any store or decode error; `existing` is left as it was.
    pub async fn recover_by_key<T: Persistable>(
        &mut self,
        key: Option<&str>,
        existing: Option<&mut T>,
        lock: LockMode,
    ) -> Result<Option<Recovered<T>>, ServerError> {
        let object = T::schema().object;
        let label = key.unwrap_or("<singleton>");

        let result = match existing {
            Some(obj) => self.gateway.load(&mut self.conn, obj, lock).await.map(|outcome| {
                match outcome {
                    LoadOutcome::Loaded => Some(Recovered::Refreshed),
                    LoadOutcome::Unchanged => Some(Recovered::Unchanged),
                    LoadOutcome::NotFound => None,
                }
            }),
            None => self
                .gateway
                .load_by_key::<T, _>(&mut self.conn, key, lock)
                .await
                .map(|found| found.map(Recovered::Loaded)),
        };

        match result {
            Ok(Some(recovered)) => Ok(Some(recovered)),
            Ok(None) => {
                tracing::warn!(object = %object, key = label, "Object not found in store");
                Ok(None)
            }
            Err(err) => {
                tracing::error!(
                    object = %object,
                    key = label,
                    error = %err,
                    "Failed to recover object"
                );
                Err(err.into())
            }
        }
    }

    /// Bring the cache in line with one stored row.
    ///
    /// Returns the cached handle and whether its contents changed. A row for
    /// an object not cached yet is decoded and added. A row whose save
    /// timestamp matches the cached instance is not decoded.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Decode`] if the row cannot be decoded; the
    /// cached instance, if any, is left as it was.
    pub async fn refresh_from_row<T: Cached>(
        &mut self,
        row: StoredRow,
    ) -> Result<(Shared<T>, bool), ServerError> {
        let key = row.key.clone().unwrap_or_default();

        if let Some(handle) = self.cache.get::<T>(&key) {
            if row.savetm.is_some() && row.savetm == handle.read().await.meta().savetm {
                return Ok((handle, false));
            }
            let fresh = decode::<T>(&key, row)?;
            handle.write().await.absorb(fresh);
            tracing::debug!(object = T::KIND, key = %key, "Refreshed cached object");
            return Ok((handle, true));
        }

        let handle = shared(decode::<T>(&key, row)?);
        self.cache.insert(Arc::clone(&handle), &key);
        tracing::debug!(object = T::KIND, key = %key, "Added object to cache");
        Ok((handle, true))
    }

    /// Pick up jobs and reservations other servers changed since the last
    /// poll.
    ///
    /// # Errors
    ///
    /// Returns any store error from listing rows, after the fatal hook ran.
    /// Rows that fail to decode are logged, counted and skipped; they are
    /// fetched again on the next poll.
    pub async fn poll_changed(&mut self) -> Result<PollReport, ServerError> {
        let jobs_since = self.watermarks.jobs.clone();
        let (jobs, jobs_mark) = self.poll_kind::<Job>(jobs_since).await?;
        Watermarks::advance(&mut self.watermarks.jobs, jobs_mark.as_ref());

        let resvs_since = self.watermarks.resvs.clone();
        let (resvs, resvs_mark) = self.poll_kind::<Reservation>(resvs_since).await?;
        Watermarks::advance(&mut self.watermarks.resvs, resvs_mark.as_ref());

        let report = PollReport {
            jobs_seen: jobs.seen,
            jobs_refreshed: jobs.refreshed,
            resvs_seen: resvs.seen,
            resvs_refreshed: resvs.refreshed,
            failed: jobs.failed.saturating_add(resvs.failed),
        };
        if report.jobs_refreshed > 0 || report.resvs_refreshed > 0 {
            tracing::info!(
                jobs = report.jobs_refreshed,
                reservations = report.resvs_refreshed,
                failed = report.failed,
                "Refreshed objects changed by other servers"
            );
        }
        Ok(report)
    }

    /// Load everything at startup: the server record, schedulers, nodes in
    /// index order, jobs, then reservations.
    ///
    /// A missing server record is replaced by a new, unsaved one; the first
    /// server save inserts it.
    ///
    /// # Errors
    ///
    /// Returns any store error, including one reading the server record.
    /// Rows that fail to decode are logged, counted and skipped.
    pub async fn recover_all(&mut self) -> Result<RecoveryReport, ServerError> {
        let mut report = RecoveryReport::default();

        let stored = self
            .gateway
            .load_by_key::<Server, _>(&mut self.conn, None, LockMode::None)
            .await
            .inspect_err(|err| tracing::error!(error = %err, "Failed to load server record"))?;
        report.server_found = stored.is_some();
        let server = stored.unwrap_or_else(|| {
            tracing::info!("No stored server record, starting with a new one");
            Server::new()
        });
        self.allocator = JobIdAllocator::starting_at(server.quick.jobid_number);
        self.cache.set_server(shared(server));

        let schedulers = self.refresh_all::<Scheduler>(None).await?.0;
        let nodes = self.refresh_all::<Node>(None).await?.0;
        let (jobs, jobs_mark) = self.refresh_all::<Job>(None).await?;
        let (resvs, resvs_mark) = self.refresh_all::<Reservation>(None).await?;
        Watermarks::advance(&mut self.watermarks.jobs, jobs_mark.as_ref());
        Watermarks::advance(&mut self.watermarks.resvs, resvs_mark.as_ref());

        report.schedulers = schedulers.refreshed;
        report.nodes = nodes.refreshed;
        report.jobs = jobs.refreshed;
        report.resvs = resvs.refreshed;
        report.failed = [schedulers, nodes, jobs, resvs]
            .iter()
            .fold(0_usize, |sum, tally| sum.saturating_add(tally.failed));

        tracing::info!(
            server_found = report.server_found,
            schedulers = report.schedulers,
            nodes = report.nodes,
            jobs = report.jobs,
            reservations = report.resvs,
            failed = report.failed,
            next_job_sequence = self.allocator.peek(),
            "Recovered state from store"
        );
        Ok(report)
    }

    /// [`Self::refresh_all`] for the poller. A store failure here means the
    /// connection is unusable, so it goes to the fatal hook.
    async fn poll_kind<T: Cached>(
        &mut self,
        since: Option<SaveTimestamp>,
    ) -> Result<(Tally, Option<SaveTimestamp>), ServerError> {
        match self.refresh_all::<T>(since).await {
            Err(ServerError::Db { source }) => {
                self.coordinator
                    .escalate(&format!("failed to poll changed {} rows: {source}", T::KIND));
                Err(ServerError::Db { source })
            }
            other => other,
        }
    }

    /// Refresh every row of one kind, optionally only those changed since
    /// `since`. Returns the tally and the watermark to resume from: the
    /// greatest save timestamp refreshed, kept below every row that failed
    /// to decode so those rows are listed again.
    async fn refresh_all<T: Cached>(
        &mut self,
        since: Option<SaveTimestamp>,
    ) -> Result<(Tally, Option<SaveTimestamp>), ServerError> {
        let filter = since.map_or(FindFilter::All, FindFilter::ChangedSince);
        let mut cursor = self.gateway.find::<T, _>(&mut self.conn, filter).await?;

        let mut tally = Tally::default();
        let mut refreshed = Vec::new();
        let mut first_failed: Option<SaveTimestamp> = None;
        while let Some(row) = cursor.next_row() {
            tally.seen = tally.seen.saturating_add(1);
            let savetm = row.savetm.clone();
            match self.refresh_from_row::<T>(row).await {
                Ok((_, changed)) => {
                    if changed {
                        tally.refreshed = tally.refreshed.saturating_add(1);
                    }
                    refreshed.extend(savetm);
                }
                Err(err) => {
                    tracing::error!(object = T::KIND, error = %err, "Skipping undecodable row");
                    tally.failed = tally.failed.saturating_add(1);
                    if let Some(savetm) = savetm
                        && first_failed.as_ref().is_none_or(|first| savetm < *first)
                    {
                        first_failed = Some(savetm);
                    }
                }
            }
        }

        let mark = refreshed
            .into_iter()
            .filter(|savetm| first_failed.as_ref().is_none_or(|failed| savetm < failed))
            .max();
        Ok((tally, mark))
    }
}

fn decode<T: Cached>(key: &str, row: StoredRow) -> Result<T, ServerError> {
    let to_decode_error = |source: DbError| ServerError::Decode {
        object: T::KIND,
        key: key.to_owned(),
        source: Box::new(source),
    };
    let mut fresh = T::blank(row.key.clone()).map_err(to_decode_error)?;
    apply_row(&mut fresh, row).map_err(to_decode_error)?;
    Ok(fresh)
}
