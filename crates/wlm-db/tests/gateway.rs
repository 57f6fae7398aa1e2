//! Gateway behavior against the in-process store.
//!
//! These run without any external service. The same scenarios run against
//! `PostgreSQL` in `tests/postgres.rs`.

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

use wlm_codec::{AttrEntry, AttrList};
use wlm_db::{
    DbConn, DbError, DeleteOutcome, FatalHandler, FindFilter, Gateway, LoadOutcome, LockMode,
    MemoryStore, SaveFlags, SaveOutcome, StoredRow, TxCoordinator, TxMode, apply_row,
};
use wlm_types::attributes::{job_attr, node_attr};
use wlm_types::{Job, JobId, JobState, Node, NodeName, ObjectType};

fn node(name: &str, index: i32, host: &str) -> Node {
    let mut node = Node::new(NodeName::new(name));
    node.quick.index = index;
    node.quick.hostname = host.to_owned();
    node.attrs.set(node_attr::MOM, None, host);
    node.attrs
        .set(node_attr::RESOURCES_AVAILABLE, Some("ncpus"), "8");
    node
}

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

// =============================================================================
// Save and load
// =============================================================================

#[tokio::test]
async fn node_quick_update_keeps_attributes() {
    let store = MemoryStore::new();
    let mut conn = store.connect();
    let gateway = Gateway::new(0);

    let mut n1 = node("n1", 0, "h1");
    let outcome = gateway.save(&mut conn, &mut n1, SaveFlags::NEW).await.unwrap();
    assert_eq!(outcome, SaveOutcome::Saved);
    assert!(!n1.meta.is_new);
    assert!(!n1.attrs.is_modified());
    let first = n1.meta.savetm.clone().expect("insert returns a save timestamp");

    let mut copy = Node::stored(NodeName::new("n1"));
    assert_eq!(
        gateway.load(&mut conn, &mut copy, LockMode::None).await.unwrap(),
        LoadOutcome::Loaded
    );
    let before = copy.clone();
    let unchanged = gateway.load(&mut conn, &mut copy, LockMode::None).await.unwrap();
    assert_eq!(unchanged, LoadOutcome::Unchanged);
    assert_eq!(unchanged.code(), -2);
    assert_eq!(copy, before);

    n1.quick.state = 1;
    let outcome = gateway.save(&mut conn, &mut n1, SaveFlags::QUICK).await.unwrap();
    assert_eq!(outcome, SaveOutcome::Saved);
    assert!(n1.meta.savetm > Some(first));

    let loaded = gateway.load(&mut conn, &mut copy, LockMode::ForUpdate).await.unwrap();
    assert_eq!(loaded, LoadOutcome::Loaded);
    assert_eq!(loaded.code(), 0);
    assert_eq!(copy.quick.state, 1);
    assert_eq!(copy.attrs, before.attrs);
    assert_eq!(copy.meta.savetm, n1.meta.savetm);
}

#[tokio::test]
async fn unchanged_quick_block_is_not_written() {
    let store = MemoryStore::new();
    let mut conn = store.connect();
    let gateway = Gateway::new(0);

    let mut n1 = node("n1", 0, "h1");
    gateway.save(&mut conn, &mut n1, SaveFlags::NEW).await.unwrap();
    let stamp = n1.meta.savetm.clone();

    let outcome = gateway
        .save(&mut conn, &mut n1, SaveFlags::QUICK | SaveFlags::ATTRS)
        .await
        .unwrap();
    assert_eq!(outcome, SaveOutcome::Saved);
    assert_eq!(n1.meta.savetm, stamp);
}

#[tokio::test]
async fn attribute_save_does_not_touch_quick_columns() {
    let store = MemoryStore::new();
    let gateway = Gateway::new(0);
    let mut writer = store.connect();
    let mut other = store.connect();

    let mut mine = node("n1", 0, "h1");
    gateway.save(&mut writer, &mut mine, SaveFlags::NEW).await.unwrap();

    let mut theirs: Node = gateway
        .load_by_key(&mut other, Some("n1"), LockMode::None)
        .await
        .unwrap()
        .expect("row exists");
    theirs.quick.state = 5;
    gateway.save(&mut other, &mut theirs, SaveFlags::QUICK).await.unwrap();

    // Stale quick block, but only attributes are requested.
    mine.quick.state = 3;
    mine.attrs.set(node_attr::COMMENT, None, "drained");
    gateway.save(&mut writer, &mut mine, SaveFlags::ATTRS).await.unwrap();

    let mut reader = store.connect();
    let fresh: Node = gateway
        .load_by_key(&mut reader, Some("n1"), LockMode::None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fresh.quick.state, 5);
    assert_eq!(fresh.attrs.get(node_attr::COMMENT, None), Some("drained"));
    assert_eq!(
        fresh.attrs.get(node_attr::RESOURCES_AVAILABLE, Some("ncpus")),
        Some("8")
    );
}

#[tokio::test]
async fn save_timestamps_strictly_increase() {
    let store = MemoryStore::new();
    let mut conn = store.connect();
    let gateway = Gateway::new(0);

    let mut n1 = node("n1", 0, "h1");
    gateway.save(&mut conn, &mut n1, SaveFlags::NEW).await.unwrap();
    let mut stamps = vec![n1.meta.savetm.clone().unwrap()];
    for i in 0..5 {
        n1.attrs.set(node_attr::COMMENT, None, format!("pass {i}"));
        gateway.save(&mut conn, &mut n1, SaveFlags::ATTRS).await.unwrap();
        stamps.push(n1.meta.savetm.clone().unwrap());
    }
    assert!(stamps.windows(2).all(|w| w[0] < w[1]), "{stamps:?}");
}

#[tokio::test]
async fn removed_attributes_are_deleted_from_the_store() {
    let store = MemoryStore::new();
    let mut conn = store.connect();
    let gateway = Gateway::new(0);

    let mut n1 = node("n1", 0, "h1");
    gateway.save(&mut conn, &mut n1, SaveFlags::NEW).await.unwrap();
    n1.attrs.unset(node_attr::RESOURCES_AVAILABLE, Some("ncpus"));
    gateway.save(&mut conn, &mut n1, SaveFlags::ATTRS).await.unwrap();

    let fresh: Node = gateway
        .load_by_key(&mut conn, Some("n1"), LockMode::None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fresh.attrs.get(node_attr::RESOURCES_AVAILABLE, Some("ncpus")), None);
    assert_eq!(fresh.attrs.get(node_attr::MOM, None), Some("h1"));
}

#[tokio::test]
async fn terminal_job_replaces_stored_attributes() {
    let store = MemoryStore::new();
    let gateway = Gateway::new(3);
    let mut conn = store.connect();
    let mut side = store.connect();

    let mut job = Job::new(JobId::new("1.svr"));
    job.quick.state = JobState::Running;
    job.attrs.set(job_attr::JOB_NAME, None, "sim");
    gateway.save(&mut conn, &mut job, SaveFlags::NEW).await.unwrap();
    assert_eq!(job.quick.owner_server, 3);

    // Another writer adds an attribute this handle never sees.
    let mut stray = AttrList::new();
    stray.push(AttrEntry::set("comment", None, "stray"));
    let mut other: Job = gateway
        .load_by_key(&mut side, Some("1.svr"), LockMode::None)
        .await
        .unwrap()
        .unwrap();
    gateway
        .add_or_update_attrs(&mut side, &mut other, stray)
        .await
        .unwrap();

    job.quick.state = JobState::Finished;
    gateway
        .save(&mut conn, &mut job, SaveFlags::QUICK | SaveFlags::ATTRS)
        .await
        .unwrap();

    let fresh: Job = gateway
        .load_by_key(&mut conn, Some("1.svr"), LockMode::None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fresh.quick.state, JobState::Finished);
    assert_eq!(fresh.attrs.get(job_attr::COMMENT, None), None);
    assert_eq!(fresh.attrs.get(job_attr::JOB_NAME, None), Some("sim"));
}

#[tokio::test]
async fn duplicate_key_then_new_identity() {
    let store = MemoryStore::new();
    let mut conn = store.connect();
    let gateway = Gateway::new(0);

    let mut first = Job::new(JobId::new("job1.serverA"));
    assert_eq!(
        gateway.save(&mut conn, &mut first, SaveFlags::NEW).await.unwrap(),
        SaveOutcome::Saved
    );

    let mut second = Job::new(JobId::new("job1.serverA"));
    let outcome = gateway.save(&mut conn, &mut second, SaveFlags::NEW).await.unwrap();
    assert_eq!(outcome, SaveOutcome::DuplicateKey);
    assert!(second.meta.is_new);
    assert!(second.meta.savetm.is_none());

    second.id = JobId::new("job2.serverA");
    assert_eq!(
        gateway.save(&mut conn, &mut second, SaveFlags::NEW).await.unwrap(),
        SaveOutcome::Saved
    );
    assert_eq!(store.count(ObjectType::Job).unwrap(), 2);
}

#[tokio::test]
async fn update_of_missing_row_reports_no_rows() {
    let store = MemoryStore::new();
    let mut conn = store.connect();
    let gateway = Gateway::new(0);

    let mut ghost = Node::stored(NodeName::new("ghost"));
    ghost.attrs.set(node_attr::COMMENT, None, "x");
    let outcome = gateway.save(&mut conn, &mut ghost, SaveFlags::ATTRS).await.unwrap();
    assert_eq!(outcome, SaveOutcome::NoRows);
    assert!(ghost.attrs.is_modified());
}

#[tokio::test]
async fn mark_deleted_sets_marker() {
    let store = MemoryStore::new();
    let mut conn = store.connect();
    let gateway = Gateway::new(0);

    let mut n1 = node("n1", 0, "h1");
    gateway.save(&mut conn, &mut n1, SaveFlags::NEW).await.unwrap();
    gateway
        .save(&mut conn, &mut n1, SaveFlags::MARK_DELETED)
        .await
        .unwrap();
    assert!(n1.deleted);

    let fresh: Node = gateway
        .load_by_key(&mut conn, Some("n1"), LockMode::None)
        .await
        .unwrap()
        .unwrap();
    assert!(fresh.deleted);
}

#[tokio::test]
async fn failed_decode_leaves_target_untouched() {
    let mut n1 = node("n1", 0, "h1");
    let before = n1.clone();
    let row = StoredRow {
        key: Some("n1".to_owned()),
        quick: Vec::new(),
        ..StoredRow::default()
    };
    assert!(matches!(apply_row(&mut n1, row), Err(DbError::InvalidRow(_))));
    assert_eq!(n1, before);
}

// =============================================================================
// Delete and find
// =============================================================================

#[tokio::test]
async fn delete_reports_not_found() {
    let store = MemoryStore::new();
    let mut conn = store.connect();
    let gateway = Gateway::new(0);

    let mut n1 = node("n1", 0, "h1");
    gateway.save(&mut conn, &mut n1, SaveFlags::NEW).await.unwrap();
    assert_eq!(
        gateway.delete::<Node, _>(&mut conn, "n1").await.unwrap(),
        DeleteOutcome::Deleted
    );
    let again = gateway.delete::<Node, _>(&mut conn, "n1").await.unwrap();
    assert_eq!(again, DeleteOutcome::NotFound);
    assert_eq!(again.code(), 1);
}

#[tokio::test]
async fn find_lists_in_index_order_with_filters() {
    let store = MemoryStore::new();
    let mut conn = store.connect();
    let gateway = Gateway::new(0);

    let mut stamps = Vec::new();
    for (name, index, host) in [("n2", 2, "hb"), ("n0", 0, "ha"), ("n1", 1, "ha")] {
        let mut n = node(name, index, host);
        gateway.save(&mut conn, &mut n, SaveFlags::NEW).await.unwrap();
        stamps.push(n.meta.savetm.clone().unwrap());
    }

    let all: Vec<Node> = gateway
        .find(&mut conn, FindFilter::All)
        .await
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    let names: Vec<&str> = all.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(names, ["n0", "n1", "n2"]);
    assert!(all.iter().all(|n| !n.meta.is_new && n.meta.qs_digest.is_some()));

    let since: Vec<Node> = gateway
        .find(&mut conn, FindFilter::ChangedSince(stamps[0].clone()))
        .await
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    let names: Vec<&str> = since.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(names, ["n0", "n1"]);

    let on_host = gateway
        .find::<Node, _>(&mut conn, FindFilter::Secondary("ha".to_owned()))
        .await
        .unwrap();
    assert_eq!(on_host.len(), 2);
}

// =============================================================================
// Transactions
// =============================================================================

#[tokio::test]
async fn abort_rolls_back_and_escalates() {
    let store = MemoryStore::new();
    let mut conn = store.connect();
    let gateway = Gateway::new(0);
    let fatal = Arc::new(RecordingFatal::default());
    let coordinator = TxCoordinator::new(fatal.clone());

    let mut tx = coordinator.begin(&mut conn, TxMode::default()).await.unwrap();
    let mut job = Job::new(JobId::new("1.svr"));
    gateway.save(tx.conn(), &mut job, SaveFlags::NEW).await.unwrap();
    let err = DbError::Transaction("simulated failure".to_owned());
    coordinator.abort(tx, &err, "save job 1.svr").await;

    assert_eq!(fatal.count(), 1);
    assert_eq!(store.count(ObjectType::Job).unwrap(), 0);
    assert!(!conn.in_transaction());
}

#[tokio::test]
async fn duplicate_key_abort_is_not_fatal() {
    let store = MemoryStore::new();
    let mut conn = store.connect();
    let fatal = Arc::new(RecordingFatal::default());
    let coordinator = TxCoordinator::new(fatal.clone());

    let tx = coordinator.begin(&mut conn, TxMode::async_commit()).await.unwrap();
    let err = DbError::DuplicateKey {
        detail: "job_pkey".to_owned(),
    };
    coordinator.abort(tx, &err, "insert job").await;
    assert_eq!(fatal.count(), 0);
}

#[tokio::test]
async fn commit_keeps_writes() {
    let store = MemoryStore::new();
    let mut conn = store.connect();
    let gateway = Gateway::new(0);
    let coordinator = TxCoordinator::new(Arc::new(RecordingFatal::default()));

    let mut tx = coordinator.begin(&mut conn, TxMode::default()).await.unwrap();
    let mut n1 = node("n1", 0, "h1");
    gateway.save(tx.conn(), &mut n1, SaveFlags::NEW).await.unwrap();
    coordinator.commit(tx).await.unwrap();
    assert_eq!(store.count(ObjectType::Node).unwrap(), 1);

    let err = conn.commit().await.unwrap_err();
    assert!(matches!(err, DbError::Transaction(_)));
}
