//! Server lifecycle against the in-process store.
//!
//! Two contexts opened on one [`MemoryStore`] stand in for two cooperating
//! server processes sharing a database.

// Integration tests use expect/unwrap extensively for clarity -- panicking
// on failure is the correct behavior in test code.
#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::too_many_lines,
    clippy::indexing_slicing
)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use wlm_db::{
    DbConn, DbError, DeleteOutcome, ExecResult, FatalHandler, LockMode, MemoryConn, MemoryStore,
    Params, SaveFlags, StatementKey, StatementKind, StatementRegistry, StoredRow, TxCoordinator,
    TxMode,
};
use wlm_server::{
    PersistOutcome, Recovered, ServerContext, ServerError, ServerIdentity,
};
use wlm_types::attributes::{job_attr, node_attr, sched_attr};
use wlm_types::{
    Job, JobId, JobScript, JobState, MomInfoTime, Node, NodeName, ObjectType, Reservation, ResvId,
    SchedName, Scheduler, Server,
};

// =============================================================================
// Helpers
// =============================================================================

#[derive(Default)]
struct RecordingFatal {
    messages: Mutex<Vec<String>>,
}

impl RecordingFatal {
    fn count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }
}

impl FatalHandler for RecordingFatal {
    fn panic_stop(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_owned());
    }
}

fn context<C: DbConn>(conn: C, name: &str, fatal: &Arc<RecordingFatal>) -> ServerContext<C> {
    let identity = ServerIdentity {
        name: name.to_owned(),
        index: 0,
    };
    ServerContext::new(conn, identity, TxCoordinator::new(fatal.clone()))
}

fn job_template() -> Job {
    let mut job = Job::new(JobId::new("pending"));
    job.quick.state = JobState::Queued;
    job.quick.queue = "workq".to_owned();
    job.attrs.set(job_attr::JOB_NAME, None, "sim");
    job.attrs.set(job_attr::RESOURCE_LIST, Some("ncpus"), "4");
    job
}

/// Wraps a memory connection and injects faults.
struct FaultyConn {
    inner: MemoryConn,
    fail_updates: bool,
    fail_reads_of: Option<ObjectType>,
    corrupt_jobs: bool,
}

impl FaultyConn {
    fn new(inner: MemoryConn) -> Self {
        Self {
            inner,
            fail_updates: false,
            fail_reads_of: None,
            corrupt_jobs: false,
        }
    }
}

#[async_trait]
impl DbConn for FaultyConn {
    fn registry(&self) -> &StatementRegistry {
        self.inner.registry()
    }

    fn in_transaction(&self) -> bool {
        self.inner.in_transaction()
    }

    async fn begin(&mut self, mode: TxMode) -> Result<(), DbError> {
        self.inner.begin(mode).await
    }

    async fn commit(&mut self) -> Result<(), DbError> {
        self.inner.commit().await
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        self.inner.rollback().await
    }

    async fn execute(&mut self, key: StatementKey, params: Params) -> Result<ExecResult, DbError> {
        if self.fail_updates && key.kind != StatementKind::Insert {
            return Err(DbError::Transaction("injected write failure".to_owned()));
        }
        self.inner.execute(key, params).await
    }

    async fn query(
        &mut self,
        key: StatementKey,
        params: Params,
    ) -> Result<Vec<StoredRow>, DbError> {
        if self.fail_reads_of == Some(key.object) {
            return Err(DbError::Transaction("connection reset".to_owned()));
        }
        let mut rows = self.inner.query(key, params).await?;
        if self.corrupt_jobs && key.object == ObjectType::Job {
            for row in &mut rows {
                row.quick.clear();
            }
        }
        Ok(rows)
    }
}

// =============================================================================
// Startup recovery
// =============================================================================

#[tokio::test]
async fn empty_store_recovers_to_a_fresh_server() {
    let store = MemoryStore::new();
    let fatal = Arc::new(RecordingFatal::default());
    let mut ctx = context(store.connect(), "svrA", &fatal);

    let report = ctx.recover_all().await.unwrap();
    assert!(!report.server_found);
    assert_eq!(report.jobs, 0);
    assert_eq!(report.failed, 0);
    assert!(ctx.cache().server().is_some());
    assert_eq!(ctx.allocator().peek(), 0);
}

#[tokio::test]
async fn recovery_loads_everything_another_server_wrote() {
    let store = MemoryStore::new();
    let fatal = Arc::new(RecordingFatal::default());
    let mut a = context(store.connect(), "svrA", &fatal);
    a.recover_all().await.unwrap();

    let mut sched = Scheduler::new(SchedName::new("default"));
    sched.attrs.set(sched_attr::CYCLE_LENGTH, None, "1200");
    assert_eq!(a.save_scheduler(&mut sched).await.unwrap(), PersistOutcome::Saved);

    for (i, name) in ["n2", "n1"].into_iter().enumerate() {
        let mut node = Node::new(NodeName::new(name));
        node.quick.index = i32::try_from(i).unwrap();
        node.attrs.set(node_attr::MOM, None, name);
        a.save_node(&mut node, SaveFlags::NEW).await.unwrap();
    }
    a.submit_new_job(job_template()).await.unwrap();
    a.submit_new_job(job_template()).await.unwrap();

    let mut resv = Reservation::new(ResvId::new("R5.svrA"));
    a.save_resv(&mut resv, SaveFlags::NEW).await.unwrap();

    let mut b = context(store.connect(), "svrB", &fatal);
    let report = b.recover_all().await.unwrap();
    assert!(report.server_found);
    assert_eq!(report.schedulers, 1);
    assert_eq!(report.nodes, 2);
    assert_eq!(report.jobs, 2);
    assert_eq!(report.resvs, 1);
    assert_eq!(b.allocator().peek(), 2);

    let job = b.cache().job("1.svrA").expect("recovered");
    assert_eq!(
        job.read().await.attrs.get(job_attr::RESOURCE_LIST, Some("ncpus")),
        Some("4")
    );
    assert!(b.cache().reservation("R5.svrA@svrA").is_some());
    assert!(b.watermarks().jobs.is_some());
    assert_eq!(fatal.count(), 0);
}

// =============================================================================
// Multi-server refresh
// =============================================================================

#[tokio::test]
async fn poll_refreshes_cached_handles_in_place() {
    let store = MemoryStore::new();
    let fatal = Arc::new(RecordingFatal::default());
    let mut a = context(store.connect(), "svrA", &fatal);
    let mut b = context(store.connect(), "svrB", &fatal);
    a.recover_all().await.unwrap();

    let mine = a.submit_new_job(job_template()).await.unwrap();
    b.recover_all().await.unwrap();
    let theirs = b.cache().job("0.svrA").expect("recovered");

    let quiet = b.poll_changed().await.unwrap();
    assert_eq!(quiet.jobs_refreshed, 0);

    {
        let mut job = mine.write().await;
        job.quick.state = JobState::Running;
        a.save_job(&mut job, SaveFlags::QUICK).await.unwrap();
    }

    let report = b.poll_changed().await.unwrap();
    assert_eq!(report.jobs_seen, 1);
    assert_eq!(report.jobs_refreshed, 1);
    let after = b.cache().job("0.svrA").expect("still cached");
    assert!(Arc::ptr_eq(&after, &theirs));
    assert_eq!(theirs.read().await.quick.state, JobState::Running);

    let again = b.poll_changed().await.unwrap();
    assert_eq!(again.jobs_seen, 0);
}

#[tokio::test]
async fn refresh_skips_rows_with_matching_timestamp() {
    let store = MemoryStore::new();
    let fatal = Arc::new(RecordingFatal::default());
    let mut a = context(store.connect(), "svrA", &fatal);
    a.recover_all().await.unwrap();
    a.submit_new_job(job_template()).await.unwrap();

    let mut b = context(store.connect(), "svrB", &fatal);
    b.recover_all().await.unwrap();

    let mut cursor = b
        .gateway()
        .find::<Job, _>(b.conn(), wlm_db::FindFilter::All)
        .await
        .unwrap();
    let row = cursor.next_row().expect("one job");
    let (_, changed) = b.refresh_from_row::<Job>(row).await.unwrap();
    assert!(!changed);
}

#[tokio::test]
async fn undecodable_rows_leave_the_cache_untouched() {
    let store = MemoryStore::new();
    let fatal = Arc::new(RecordingFatal::default());
    let mut a = context(store.connect(), "svrA", &fatal);
    a.recover_all().await.unwrap();
    let mine = a.submit_new_job(job_template()).await.unwrap();

    let mut b = context(FaultyConn::new(store.connect()), "svrB", &fatal);
    b.recover_all().await.unwrap();
    let cached = b.cache().job("0.svrA").expect("recovered");

    {
        let mut job = mine.write().await;
        job.quick.priority = 50;
        a.save_job(&mut job, SaveFlags::QUICK).await.unwrap();
    }

    b.conn().corrupt_jobs = true;
    let report = b.poll_changed().await.unwrap();
    assert_eq!(report.jobs_seen, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(cached.read().await.quick.priority, 0);
}

#[tokio::test]
async fn undecodable_row_is_listed_again_on_the_next_poll() {
    let store = MemoryStore::new();
    let fatal = Arc::new(RecordingFatal::default());
    let mut a = context(store.connect(), "svrA", &fatal);
    a.recover_all().await.unwrap();
    let first = a.submit_new_job(job_template()).await.unwrap();

    let mut b = context(FaultyConn::new(store.connect()), "svrB", &fatal);
    b.recover_all().await.unwrap();
    let mark = b.watermarks().jobs.clone();

    {
        let mut job = first.write().await;
        job.quick.priority = 50;
        a.save_job(&mut job, SaveFlags::QUICK).await.unwrap();
    }
    a.submit_new_job(job_template()).await.unwrap();

    b.conn().corrupt_jobs = true;
    let report = b.poll_changed().await.unwrap();
    assert_eq!(report.failed, 2);
    assert_eq!(b.watermarks().jobs, mark);
    assert!(b.cache().job("1.svrA").is_none());

    b.conn().corrupt_jobs = false;
    let report = b.poll_changed().await.unwrap();
    assert_eq!(report.jobs_seen, 2);
    assert_eq!(report.jobs_refreshed, 2);
    assert_eq!(report.failed, 0);
    let cached = b.cache().job("0.svrA").expect("cached");
    assert_eq!(cached.read().await.quick.priority, 50);
    assert!(b.cache().job("1.svrA").is_some());
}

#[tokio::test]
async fn recover_by_key_compares_save_timestamps() {
    let store = MemoryStore::new();
    let fatal = Arc::new(RecordingFatal::default());
    let mut a = context(store.connect(), "svrA", &fatal);
    let mut b = context(store.connect(), "svrB", &fatal);

    let mut node = Node::new(NodeName::new("n1"));
    a.save_node(&mut node, SaveFlags::NEW).await.unwrap();

    let mut copy = match b.recover_by_key::<Node>(Some("n1"), None, LockMode::None).await {
        Ok(Some(Recovered::Loaded(node))) => Some(node),
        _ => None,
    }
    .expect("node should load");
    assert!(matches!(
        b.recover_by_key(Some("n1"), Some(&mut copy), LockMode::ForUpdate).await,
        Ok(Some(Recovered::Unchanged))
    ));

    node.quick.state = 4;
    a.save_node(&mut node, SaveFlags::QUICK).await.unwrap();
    assert!(matches!(
        b.recover_by_key(Some("n1"), Some(&mut copy), LockMode::None).await,
        Ok(Some(Recovered::Refreshed))
    ));
    assert_eq!(copy.quick.state, 4);

    assert!(
        b.recover_by_key::<Node>(Some("missing"), None, LockMode::None)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn recover_by_key_reports_store_failures() {
    let store = MemoryStore::new();
    let fatal = Arc::new(RecordingFatal::default());
    let mut a = context(store.connect(), "svrA", &fatal);
    let mut node = Node::new(NodeName::new("n1"));
    a.save_node(&mut node, SaveFlags::NEW).await.unwrap();

    let mut b = context(FaultyConn::new(store.connect()), "svrB", &fatal);
    b.conn().fail_reads_of = Some(ObjectType::Node);
    let result = b.recover_by_key::<Node>(Some("n1"), None, LockMode::None).await;
    assert!(matches!(result, Err(ServerError::Db { .. })));
}

#[tokio::test]
async fn unreadable_server_record_fails_recovery() {
    let store = MemoryStore::new();
    let fatal = Arc::new(RecordingFatal::default());
    let mut a = context(store.connect(), "svrA", &fatal);
    let mut server = Server::stored();
    server.quick.jobid_number = 500;
    a.save_server(&mut server).await.unwrap();

    let mut b = context(FaultyConn::new(store.connect()), "svrA", &fatal);
    b.conn().fail_reads_of = Some(ObjectType::Server);
    let err = b.recover_all().await.unwrap_err();
    assert!(matches!(err, ServerError::Db { .. }));
    assert!(b.cache().server().is_none());

    b.conn().fail_reads_of = None;
    let report = b.recover_all().await.unwrap();
    assert!(report.server_found);
    assert_eq!(b.allocator().peek(), 500);
}

#[tokio::test]
async fn poll_store_failure_is_fatal() {
    let store = MemoryStore::new();
    let fatal = Arc::new(RecordingFatal::default());
    let mut b = context(FaultyConn::new(store.connect()), "svrB", &fatal);
    b.recover_all().await.unwrap();

    b.conn().fail_reads_of = Some(ObjectType::Job);
    let err = b.poll_changed().await.unwrap_err();
    assert!(matches!(err, ServerError::Db { .. }));
    assert_eq!(fatal.count(), 1);
}

// =============================================================================
// Saves
// =============================================================================

#[tokio::test]
async fn new_job_retries_past_a_taken_id() {
    let store = MemoryStore::new();
    let fatal = Arc::new(RecordingFatal::default());

    let mut other = context(store.connect(), "svrB", &fatal);
    let mut squatter = Job::new(JobId::new("0.svrA"));
    other.save_job(&mut squatter, SaveFlags::NEW).await.unwrap();

    let mut a = context(store.connect(), "svrA", &fatal);
    a.recover_all().await.unwrap();
    let job = a.submit_new_job(job_template()).await.unwrap();

    assert_eq!(job.read().await.id.as_str(), "1.svrA");
    assert_eq!(a.allocator().peek(), 2);
    assert_eq!(store.count(ObjectType::Job).unwrap(), 2);
    assert_eq!(fatal.count(), 0);

    let server: Server = a
        .gateway()
        .load_by_key(a.conn(), None, LockMode::None)
        .await
        .unwrap()
        .expect("server record inserted");
    assert_eq!(server.quick.jobid_number, 2);
}

#[tokio::test]
async fn identity_exhaustion_is_reported() {
    let store = MemoryStore::new();
    let fatal = Arc::new(RecordingFatal::default());

    let mut other = context(store.connect(), "svrB", &fatal);
    let mut squatter = Job::new(JobId::new("0.svrA"));
    other.save_job(&mut squatter, SaveFlags::NEW).await.unwrap();

    let mut a = context(store.connect(), "svrA", &fatal).with_max_save_attempts(1);
    let err = a.submit_new_job(job_template()).await.unwrap_err();
    assert!(matches!(err, ServerError::IdentityExhausted { attempts: 1 }));
    assert_eq!(fatal.count(), 0);
}

#[tokio::test]
async fn unsaved_job_defers_non_new_saves() {
    let store = MemoryStore::new();
    let fatal = Arc::new(RecordingFatal::default());
    let mut a = context(store.connect(), "svrA", &fatal);

    let mut job = job_template();
    let outcome = a.save_job(&mut job, SaveFlags::QUICK | SaveFlags::ATTRS).await.unwrap();
    assert_eq!(outcome, PersistOutcome::Deferred);
    assert_eq!(outcome.code(), 0);
    assert_eq!(store.count(ObjectType::Job).unwrap(), 0);
}

#[tokio::test]
async fn modified_job_gets_a_modification_time() {
    let store = MemoryStore::new();
    let fatal = Arc::new(RecordingFatal::default());
    let mut a = context(store.connect(), "svrA", &fatal);

    let handle = a.submit_new_job(job_template()).await.unwrap();
    let mut job = handle.write().await;
    assert!(job.attrs.get(job_attr::MTIME, None).is_some());
    assert!(!job.attrs.is_modified());

    job.attrs.set(job_attr::COMMENT, None, "held by admin");
    a.save_job(&mut job, SaveFlags::ATTRS).await.unwrap();
    let stored: Job = a
        .gateway()
        .load_by_key(a.conn(), Some(job.id.as_str()), LockMode::None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.attrs.get(job_attr::COMMENT, None), Some("held by admin"));
    assert!(stored.attrs.get(job_attr::MTIME, None).is_some());
}

#[tokio::test]
async fn job_save_carries_its_reservation() {
    let store = MemoryStore::new();
    let fatal = Arc::new(RecordingFatal::default());
    let mut a = context(store.connect(), "svrA", &fatal);

    let mut resv = Reservation::new(ResvId::new("R1.svrA"));
    a.save_resv(&mut resv, SaveFlags::NEW).await.unwrap();
    let handle = wlm_server::cache::shared(resv);
    a.cache_mut().insert(Arc::clone(&handle), "R1.svrA");

    let mut template = job_template();
    template.reservation = Some(ResvId::new("R1.svrA"));
    let job = a.submit_new_job(template).await.unwrap();

    handle.write().await.quick.duration = 7200;
    let before = handle.read().await.meta.savetm.clone();
    {
        let mut job = job.write().await;
        job.quick.state = JobState::Running;
        a.save_job(&mut job, SaveFlags::QUICK).await.unwrap();
    }

    let resv = handle.read().await;
    assert!(resv.meta.savetm > before);
    let stored: Reservation = a
        .gateway()
        .load_by_key(a.conn(), Some("R1.svrA"), LockMode::None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.quick.duration, 7200);
}

#[tokio::test]
async fn rejected_job_insert_undoes_its_reservation_save() {
    let store = MemoryStore::new();
    let fatal = Arc::new(RecordingFatal::default());

    let mut other = context(store.connect(), "svrB", &fatal);
    let mut squatter = Job::new(JobId::new("0.svrA"));
    other.save_job(&mut squatter, SaveFlags::NEW).await.unwrap();

    let mut a = context(store.connect(), "svrA", &fatal);
    a.recover_all().await.unwrap();
    let mut resv = Reservation::new(ResvId::new("R1.svrA"));
    a.save_resv(&mut resv, SaveFlags::NEW).await.unwrap();
    let handle = wlm_server::cache::shared(resv);
    a.cache_mut().insert(Arc::clone(&handle), "R1.svrA");
    handle.write().await.quick.duration = 7200;

    let mut template = job_template();
    template.reservation = Some(ResvId::new("R1.svrA"));
    let job = a.submit_new_job(template).await.unwrap();
    assert_eq!(job.read().await.id.as_str(), "1.svrA");

    let stored: Reservation = a
        .gateway()
        .load_by_key(a.conn(), Some("R1.svrA"), LockMode::None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.quick.duration, 7200);
    assert_eq!(handle.read().await.meta.savetm, stored.meta.savetm);
    assert_eq!(fatal.count(), 0);
}

#[tokio::test]
async fn singleton_saves_insert_when_missing() {
    let store = MemoryStore::new();
    let fatal = Arc::new(RecordingFatal::default());
    let mut a = context(store.connect(), "svrA", &fatal);

    let mut server = Server::stored();
    server.quick.jobid_number = 40;
    assert_eq!(a.save_server(&mut server).await.unwrap(), PersistOutcome::Saved);
    assert_eq!(store.count(ObjectType::Server).unwrap(), 1);

    server.quick.jobid_number = 41;
    a.save_server(&mut server).await.unwrap();
    assert_eq!(store.count(ObjectType::Server).unwrap(), 1);

    let mut info = MomInfoTime::default();
    info.meta.is_new = true;
    info.quick.generation = 3;
    a.save_mominfo_time(&mut info).await.unwrap();
    info.quick.generation = 4;
    a.save_mominfo_time(&mut info).await.unwrap();
    let loaded = a.load_mominfo_time().await.unwrap().expect("stored");
    assert_eq!(loaded.quick.generation, 4);

    let mut b = context(store.connect(), "svrB", &fatal);
    b.recover_all().await.unwrap();
    assert_eq!(b.allocator().peek(), 41);
    assert_eq!(fatal.count(), 0);
}

#[tokio::test]
async fn purge_removes_job_and_script() {
    let store = MemoryStore::new();
    let fatal = Arc::new(RecordingFatal::default());
    let mut a = context(store.connect(), "svrA", &fatal);

    let job = a.submit_new_job(job_template()).await.unwrap();
    let id = job.read().await.id.clone();
    let mut script = JobScript::new(id.clone(), b"#!/bin/sh\nsleep 10\n".to_vec());
    a.save_job_script(&mut script).await.unwrap();
    assert_eq!(
        a.load_job_script(&id).await.unwrap().quick.script,
        b"#!/bin/sh\nsleep 10\n".to_vec()
    );

    assert_eq!(a.purge_job(&id).await.unwrap(), DeleteOutcome::Deleted);
    assert!(a.cache().job(id.as_str()).is_none());
    assert!(matches!(
        a.load_job_script(&id).await,
        Err(ServerError::NotFound { .. })
    ));
    assert_eq!(
        a.delete_job_script(&id).await.unwrap(),
        DeleteOutcome::NotFound
    );
}

#[tokio::test]
async fn node_delete_paths() {
    let store = MemoryStore::new();
    let fatal = Arc::new(RecordingFatal::default());
    let mut a = context(store.connect(), "svrA", &fatal);

    let mut node = Node::new(NodeName::new("n9"));
    a.save_node(&mut node, SaveFlags::NEW).await.unwrap();
    a.mark_node_deleted(&mut node).await.unwrap();
    assert!(node.deleted);
    let stored: Node = a
        .gateway()
        .load_by_key(a.conn(), Some("n9"), LockMode::None)
        .await
        .unwrap()
        .unwrap();
    assert!(stored.deleted);

    assert_eq!(a.delete_node("n9").await.unwrap(), DeleteOutcome::Deleted);
    assert_eq!(store.count(ObjectType::Node).unwrap(), 0);
}

#[tokio::test]
async fn failed_update_rolls_back_and_stops() {
    let store = MemoryStore::new();
    let fatal = Arc::new(RecordingFatal::default());
    let mut a = context(FaultyConn::new(store.connect()), "svrA", &fatal);

    let mut node = Node::new(NodeName::new("n1"));
    a.save_node(&mut node, SaveFlags::NEW).await.unwrap();
    let saved = node.meta.savetm.clone();

    a.conn().fail_updates = true;
    node.quick.state = 2;
    let err = a.save_node(&mut node, SaveFlags::QUICK).await.unwrap_err();
    assert!(matches!(err, ServerError::Db { .. }));
    assert_eq!(fatal.count(), 1);
    assert_eq!(node.meta.savetm, saved);
    assert!(!a.conn().in_transaction());
}

#[tokio::test]
async fn vanished_row_is_fatal() {
    let store = MemoryStore::new();
    let fatal = Arc::new(RecordingFatal::default());
    let mut a = context(store.connect(), "svrA", &fatal);

    let mut job = Job::stored(JobId::new("77.svrA"));
    job.quick.state = JobState::Held;
    let err = a.save_job(&mut job, SaveFlags::QUICK).await.unwrap_err();
    assert!(matches!(err, ServerError::NotFound { object: "job", .. }));
    assert_eq!(fatal.count(), 1);
}
