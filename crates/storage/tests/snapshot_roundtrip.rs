//! End-to-end snapshot tests: a populated scheduler persisted through the
//! real local backend and restored into a fresh one.

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{Duration as Span, Utc};
use uuid::Uuid;

use spindle_core::Job;
use spindle_storage::{LocalBackend, SnapshotPersister, StorageBackend};
use spindle_wheel::Hub;

// ============================================================================
// Test Helpers
// ============================================================================

fn temp_persister() -> (Arc<SnapshotPersister>, PathBuf) {
    let dir = std::env::temp_dir().join(format!("spindle-roundtrip-{}", Uuid::new_v4()));
    let backend = StorageBackend::Local(LocalBackend::new(dir.clone()).unwrap());
    (Arc::new(SnapshotPersister::new(backend)), dir)
}

/// Ten future jobs spread over distinct windows plus three overdue ones,
/// each of which has already been consumed once and re-added.
fn populated_hub() -> Hub {
    let hub = Hub::unmonitored(Span::seconds(1));
    let now = Utc::now();
    for i in 0..10 {
        hub.add_job(Job::new(
            format!("future-{i}"),
            now + Span::minutes(i + 1),
            Bytes::from(format!("payload-{i}")),
        ))
        .unwrap();
    }
    for i in 0..3 {
        let job = Job::new(
            format!("overdue-{i}"),
            now - Span::minutes(i + 1),
            Bytes::from_static(b"late"),
        );
        hub.add_job(job.clone()).unwrap();
        let consumed = hub.next().expect("overdue job is ready at once");
        assert_eq!(consumed.id(), job.id());
        hub.add_job(job).unwrap();
    }
    hub
}

fn outstanding_ids(hub: &Hub) -> BTreeSet<String> {
    hub.inspect(100)
        .iter()
        .map(|job| job.id().to_string())
        .collect()
}

fn persist_and_wait(hub: &Hub, persister: &Arc<SnapshotPersister>) {
    let errs: Vec<_> = hub.persist(persister.clone()).into_iter().collect();
    assert!(errs.is_empty(), "persist reported errors: {errs:?}");
}

// ============================================================================
// Integration Tests
// ============================================================================

#[test]
fn test_snapshot_roundtrip_preserves_every_job() {
    let (persister, dir) = temp_persister();
    let hub = populated_hub();
    let before = outstanding_ids(&hub);
    assert_eq!(before.len(), 13);

    persist_and_wait(&hub, &persister);

    // Persisting walks the buckets without draining them.
    assert_eq!(hub.pending_count(), 13);

    let restored_hub = Hub::unmonitored(Span::seconds(1));
    let stats = restored_hub.restore(persister.as_ref()).unwrap();
    assert_eq!(stats.restored, 13);
    assert_eq!(stats.decode_failures, 0);
    assert_eq!(stats.add_failures, 0);

    assert_eq!(outstanding_ids(&restored_hub), before);

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_restored_overdue_jobs_drain_immediately() {
    let (persister, dir) = temp_persister();
    let hub = populated_hub();
    persist_and_wait(&hub, &persister);

    let restored_hub = Hub::unmonitored(Span::seconds(1));
    restored_hub.restore(persister.as_ref()).unwrap();

    // The overdue trio is ready right away; the future jobs are not.
    let mut drained = Vec::new();
    while let Some(job) = restored_hub.next() {
        drained.push(job.id().to_string());
    }
    drained.sort();
    assert_eq!(drained, ["overdue-0", "overdue-1", "overdue-2"]);
    assert_eq!(restored_hub.pending_count(), 10);

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_empty_hub_snapshots_and_restores_clean() {
    let (persister, dir) = temp_persister();
    let hub = Hub::unmonitored(Span::seconds(1));
    persist_and_wait(&hub, &persister);

    let restored_hub = Hub::unmonitored(Span::seconds(1));
    let stats = restored_hub.restore(persister.as_ref()).unwrap();
    assert_eq!(stats.restored, 0);
    assert_eq!(restored_hub.pending_count(), 0);

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_second_persist_cycle_replaces_the_first() {
    let (persister, dir) = temp_persister();

    let first = Hub::unmonitored(Span::seconds(1));
    first
        .add_job(Job::new("old", Utc::now() + Span::minutes(5), Bytes::from_static(b"v1")))
        .unwrap();
    persist_and_wait(&first, &persister);

    let second = Hub::unmonitored(Span::seconds(1));
    second
        .add_job(Job::new("new", Utc::now() + Span::minutes(5), Bytes::from_static(b"v2")))
        .unwrap();
    persist_and_wait(&second, &persister);

    let restored_hub = Hub::unmonitored(Span::seconds(1));
    let stats = restored_hub.restore(persister.as_ref()).unwrap();
    assert_eq!(stats.restored, 1);
    let ids = outstanding_ids(&restored_hub);
    assert!(ids.contains("new") && !ids.contains("old"), "got {ids:?}");

    fs::remove_dir_all(&dir).ok();
}
