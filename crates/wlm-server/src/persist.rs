//! Save, load and purge entry points used by server logic.
//!
//! Every save runs in its own transaction. A store failure rolls back and
//! stops the server through the coordinator's fatal hook, with one
//! exception: a new job whose id collides with an existing row is rolled
//! back quietly and reported as [`PersistOutcome::RetryWithNewId`].

use std::sync::Arc;

use chrono::Utc;
use wlm_db::{
    DbConn, DbError, DeleteOutcome, LockMode, Persistable, SaveFlags, SaveOutcome, Transaction,
    TxCoordinator,
};
use wlm_types::attributes::{job_attr, resv_attr};
use wlm_types::{Job, JobId, JobScript, MomInfoTime, Node, Reservation, Scheduler, Server};

use crate::cache::{Shared, shared};
use crate::context::ServerContext;
use crate::error::ServerError;

/// Result of a save entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// Written and committed.
    Saved,
    /// A new job has not been inserted yet; only a `NEW` save writes it.
    Deferred,
    /// A new job's id is taken. Nothing was written.
    RetryWithNewId,
}

impl PersistOutcome {
    /// Legacy numeric result code.
    pub const fn code(self) -> i32 {
        match self {
            Self::Saved | Self::Deferred => 0,
            Self::RetryWithNewId => 1,
        }
    }
}

/// Flags a job save passes on to its reservation, if any.
fn cascade_flags(flags: SaveFlags) -> Option<SaveFlags> {
    if flags.contains(SaveFlags::NEW) || flags.contains(SaveFlags::FULL) {
        Some(SaveFlags::QUICK | SaveFlags::ATTRS | SaveFlags::FULL)
    } else if flags.contains(SaveFlags::QUICK) {
        Some(SaveFlags::QUICK)
    } else {
        None
    }
}

impl<C: DbConn> ServerContext<C> {
    // ========================================================================
    // Jobs and reservations
    // ========================================================================

    /// Save a job.
    ///
    /// A job still marked new is only written by a `NEW` save; other saves
    /// return [`PersistOutcome::Deferred`]. If the job's attributes changed,
    /// its modification time is stamped first. If the job runs in a cached
    /// reservation, that reservation is saved in the same transaction ahead
    /// of the job; the caller must not hold its lock.
    ///
    /// # Errors
    ///
    /// Returns any store or codec error after the fatal hook ran.
    pub async fn save_job(
        &mut self,
        job: &mut Job,
        flags: SaveFlags,
    ) -> Result<PersistOutcome, ServerError> {
        if job.meta.is_new && !flags.contains(SaveFlags::NEW) {
            tracing::trace!(job = %job.id, "Job not inserted yet, save deferred");
            return Ok(PersistOutcome::Deferred);
        }
        if job.attrs.is_modified() {
            job.attrs
                .set(job_attr::MTIME, None, Utc::now().timestamp().to_string());
        }

        let resv = cascade_flags(flags).and_then(|resv_flags| {
            job.reservation
                .as_ref()
                .and_then(|id| self.cache.reservation(id.as_str()))
                .map(|handle| (handle, resv_flags))
        });

        let mut tx = self.coordinator.begin(&mut self.conn, self.tx_mode).await?;
        // The reservation's save tracking only holds once the job commits.
        let mut cascaded = None;
        if let Some((handle, resv_flags)) = resv {
            let mut resv = handle.write_owned().await;
            let before = resv.clone();
            stamp_resv_mtime(&mut resv);
            match self.gateway.save(tx.conn(), &mut *resv, resv_flags).await {
                Ok(SaveOutcome::Saved) => cascaded = Some((resv, before)),
                other => {
                    let key = resv.id.to_string();
                    *resv = before;
                    return finish(&self.coordinator, tx, other, "reservation", &key).await;
                }
            }
        }
        let result = self.gateway.save(tx.conn(), job, flags).await;
        let outcome = finish(&self.coordinator, tx, result, "job", job.id.as_str()).await;
        if let Some((mut resv, before)) = cascaded
            && !matches!(outcome, Ok(PersistOutcome::Saved))
        {
            tracing::debug!(resv = %resv.id, job = %job.id, "Job not saved, reservation save undone");
            *resv = before;
        }
        outcome
    }

    /// Save a reservation.
    ///
    /// # Errors
    ///
    /// Returns any store or codec error after the fatal hook ran.
    pub async fn save_resv(
        &mut self,
        resv: &mut Reservation,
        flags: SaveFlags,
    ) -> Result<PersistOutcome, ServerError> {
        stamp_resv_mtime(resv);
        let mut tx = self.coordinator.begin(&mut self.conn, self.tx_mode).await?;
        let result = self.gateway.save(tx.conn(), resv, flags).await;
        finish(&self.coordinator, tx, result, "reservation", resv.id.as_str()).await
    }

    /// Insert a new job under a fresh id.
    ///
    /// Takes ids from the allocator until an insert does not collide, at
    /// most `max_save_attempts` times. The saved job is cached and the
    /// server's sequence counter persisted.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::IdentityExhausted`] when every attempt
    /// collided, or any store error.
    pub async fn submit_new_job(&mut self, mut job: Job) -> Result<Shared<Job>, ServerError> {
        for attempt in 1..=self.max_save_attempts {
            job.id = self.allocator.allocate(&self.identity.name);
            job.meta.is_new = true;
            match self.save_job(&mut job, SaveFlags::NEW).await? {
                PersistOutcome::Saved => {
                    self.persist_job_sequence().await?;
                    let key = job.id.to_string();
                    let handle = shared(job);
                    self.cache.insert(Arc::clone(&handle), &key);
                    tracing::info!(job = %key, attempt, "Job submitted");
                    return Ok(handle);
                }
                PersistOutcome::RetryWithNewId | PersistOutcome::Deferred => {
                    tracing::warn!(job = %job.id, attempt, "Job id already taken, retrying");
                }
            }
        }
        Err(ServerError::IdentityExhausted {
            attempts: self.max_save_attempts,
        })
    }

    /// Delete a job and its script, and drop it from the cache.
    ///
    /// # Errors
    ///
    /// Returns any store error after the fatal hook ran.
    pub async fn purge_job(&mut self, id: &JobId) -> Result<DeleteOutcome, ServerError> {
        let mut tx = self.coordinator.begin(&mut self.conn, self.tx_mode).await?;
        let script = self
            .gateway
            .delete::<JobScript, _>(tx.conn(), id.as_str())
            .await;
        let job = match script {
            Ok(_) => self.gateway.delete::<Job, _>(tx.conn(), id.as_str()).await,
            Err(err) => Err(err),
        };
        let outcome = match job {
            Ok(outcome) => {
                self.coordinator.commit(tx).await?;
                outcome
            }
            Err(err) => {
                let context = format!("failed to purge job {id}");
                self.coordinator.abort(tx, &err, &context).await;
                return Err(err.into());
            }
        };
        self.cache.remove::<Job>(id.as_str());
        tracing::debug!(job = %id, outcome = ?outcome, "Purged job");
        Ok(outcome)
    }

    // ========================================================================
    // Nodes
    // ========================================================================

    /// Save a node.
    ///
    /// # Errors
    ///
    /// Returns any store or codec error after the fatal hook ran.
    pub async fn save_node(
        &mut self,
        node: &mut Node,
        flags: SaveFlags,
    ) -> Result<PersistOutcome, ServerError> {
        let mut tx = self.coordinator.begin(&mut self.conn, self.tx_mode).await?;
        let result = self.gateway.save(tx.conn(), node, flags).await;
        finish(&self.coordinator, tx, result, "node", node.name.as_str()).await
    }

    /// Flag a node deleted in the store without removing its row.
    ///
    /// # Errors
    ///
    /// Returns any store error after the fatal hook ran.
    pub async fn mark_node_deleted(&mut self, node: &mut Node) -> Result<PersistOutcome, ServerError> {
        self.save_node(node, SaveFlags::MARK_DELETED).await
    }

    /// Remove a node's row and drop it from the cache.
    ///
    /// # Errors
    ///
    /// Returns any store error after the fatal hook ran.
    pub async fn delete_node(&mut self, name: &str) -> Result<DeleteOutcome, ServerError> {
        let outcome = self.delete_in_tx::<Node>(name).await?;
        self.cache.remove::<Node>(name);
        Ok(outcome)
    }

    // ========================================================================
    // Singletons
    // ========================================================================

    /// Save the server record, inserting it if the store has none.
    ///
    /// # Errors
    ///
    /// Returns any store or codec error after the fatal hook ran.
    pub async fn save_server(&mut self, server: &mut Server) -> Result<PersistOutcome, ServerError> {
        self.save_singleton(server, "server").await
    }

    /// Save a scheduler, inserting it if the store has none.
    ///
    /// # Errors
    ///
    /// Returns any store or codec error after the fatal hook ran.
    pub async fn save_scheduler(
        &mut self,
        sched: &mut Scheduler,
    ) -> Result<PersistOutcome, ServerError> {
        self.save_singleton(sched, "scheduler").await
    }

    /// Save the mom-info generation counter, inserting it if the store has
    /// none.
    ///
    /// # Errors
    ///
    /// Returns any store error after the fatal hook ran.
    pub async fn save_mominfo_time(
        &mut self,
        info: &mut MomInfoTime,
    ) -> Result<PersistOutcome, ServerError> {
        self.save_singleton(info, "mom info time").await
    }

    /// Load the mom-info generation counter.
    ///
    /// # Errors
    ///
    /// Returns any store or decode error.
    pub async fn load_mominfo_time(&mut self) -> Result<Option<MomInfoTime>, ServerError> {
        Ok(self
            .gateway
            .load_by_key::<MomInfoTime, _>(&mut self.conn, None, LockMode::None)
            .await?)
    }

    // ========================================================================
    // Job scripts
    // ========================================================================

    /// Store a job's script. Scripts are written once, with the job.
    ///
    /// # Errors
    ///
    /// Returns any store error after the fatal hook ran.
    pub async fn save_job_script(
        &mut self,
        script: &mut JobScript,
    ) -> Result<PersistOutcome, ServerError> {
        let mut tx = self.coordinator.begin(&mut self.conn, self.tx_mode).await?;
        let result = self.gateway.save(tx.conn(), script, SaveFlags::NEW).await;
        let key = script.job_id.to_string();
        finish(&self.coordinator, tx, result, "job script", &key).await
    }

    /// Load a job's script.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::NotFound`] if the job has no script, or any
    /// store error.
    pub async fn load_job_script(&mut self, id: &JobId) -> Result<JobScript, ServerError> {
        self.gateway
            .load_by_key::<JobScript, _>(&mut self.conn, Some(id.as_str()), LockMode::None)
            .await?
            .ok_or_else(|| ServerError::NotFound {
                object: "job script",
                key: id.to_string(),
            })
    }

    /// Delete a job's script.
    ///
    /// # Errors
    ///
    /// Returns any store error after the fatal hook ran.
    pub async fn delete_job_script(&mut self, id: &JobId) -> Result<DeleteOutcome, ServerError> {
        self.delete_in_tx::<JobScript>(id.as_str()).await
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Write the allocator's next sequence number into the server record.
    async fn persist_job_sequence(&mut self) -> Result<(), ServerError> {
        let Some(handle) = self.cache.server() else {
            return Ok(());
        };
        let mut server = handle.write().await;
        server.quick.jobid_number = self.allocator.peek();
        self.save_singleton(&mut *server, "server").await?;
        Ok(())
    }

    /// Update a singleton-like record in full, inserting it when the update
    /// finds no row.
    async fn save_singleton<T: Persistable>(
        &mut self,
        obj: &mut T,
        object: &'static str,
    ) -> Result<PersistOutcome, ServerError> {
        let key = obj.key().unwrap_or(object).to_owned();
        let mut tx = self.coordinator.begin(&mut self.conn, self.tx_mode).await?;
        let result = if obj.meta().is_new {
            self.gateway.save(tx.conn(), obj, SaveFlags::NEW).await
        } else {
            let full = SaveFlags::FULL | SaveFlags::QUICK | SaveFlags::ATTRS;
            match self.gateway.save(tx.conn(), obj, full).await {
                Ok(SaveOutcome::NoRows) => {
                    tracing::info!(object, key = %key, "No stored record, inserting");
                    self.gateway.save(tx.conn(), obj, SaveFlags::NEW).await
                }
                other => other,
            }
        };
        finish(&self.coordinator, tx, result, object, &key).await
    }

    async fn delete_in_tx<T: Persistable>(&mut self, key: &str) -> Result<DeleteOutcome, ServerError> {
        let mut tx = self.coordinator.begin(&mut self.conn, self.tx_mode).await?;
        match self.gateway.delete::<T, _>(tx.conn(), key).await {
            Ok(outcome) => {
                self.coordinator.commit(tx).await?;
                Ok(outcome)
            }
            Err(err) => {
                let context = format!("failed to delete {} {key}", T::schema().object);
                self.coordinator.abort(tx, &err, &context).await;
                Err(err.into())
            }
        }
    }
}

fn stamp_resv_mtime(resv: &mut Reservation) {
    if resv.attrs.is_modified() {
        resv.attrs
            .set(resv_attr::MTIME, None, Utc::now().timestamp().to_string());
    }
}

/// Commit or undo a save and map its outcome.
async fn finish<C: DbConn + ?Sized>(
    coordinator: &TxCoordinator,
    tx: Transaction<'_, C>,
    result: Result<SaveOutcome, DbError>,
    object: &'static str,
    key: &str,
) -> Result<PersistOutcome, ServerError> {
    match result {
        Ok(SaveOutcome::Saved) => {
            coordinator.commit(tx).await?;
            Ok(PersistOutcome::Saved)
        }
        Ok(SaveOutcome::DuplicateKey) => {
            coordinator.rollback(tx).await?;
            Ok(PersistOutcome::RetryWithNewId)
        }
        Ok(SaveOutcome::NoRows) => {
            let rolled_back = coordinator.rollback(tx).await;
            coordinator.escalate(&format!("{object} {key} is no longer in the store"));
            rolled_back?;
            Err(ServerError::NotFound {
                object,
                key: key.to_owned(),
            })
        }
        Err(err) => {
            coordinator
                .abort(tx, &err, &format!("failed to save {object} {key}"))
                .await;
            Err(err.into())
        }
    }
}
