//! Readers racing the snapshot writer never see a partial document.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lake_core::{Metrics, MetricsHandle, Snapshot, SnapshotStore};
use tempfile::TempDir;

/// Number of rewrites performed while readers poll the file
const REWRITES: usize = 500;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reader_never_sees_partial_write() {
    let dir = TempDir::new().expect("create temp dir");
    let store = SnapshotStore::in_dir(dir.path());

    let metrics = Arc::new(Metrics::new());
    let handle = MetricsHandle::from(Arc::clone(&metrics));
    handle.persist(&store).await.expect("initial persist");

    let writing = Arc::new(AtomicBool::new(true));

    let readers: Vec<_> = (0..3)
        .map(|_| {
            let path = store.path().to_path_buf();
            let writing = Arc::clone(&writing);
            tokio::spawn(async move {
                let mut reads = 0usize;
                let mut last_ingress = 0u64;
                while writing.load(Ordering::Acquire) {
                    let data = tokio::fs::read(&path).await.expect("snapshot must exist");
                    let snapshot: Snapshot =
                        serde_json::from_slice(&data).expect("snapshot must parse");
                    assert!(snapshot.message_ingress >= last_ingress);
                    last_ingress = snapshot.message_ingress;
                    reads += 1;
                }
                reads
            })
        })
        .collect();

    for _ in 0..REWRITES {
        metrics.message_ingress();
        metrics.message_egress();
        handle.persist(&store).await.expect("persist");
    }
    writing.store(false, Ordering::Release);

    for reader in readers {
        let reads = tokio::time::timeout(Duration::from_secs(10), reader)
            .await
            .expect("reader hung")
            .expect("reader panicked");
        assert!(reads > 0);
    }

    let last = store.load().await.expect("load final snapshot");
    assert_eq!(last.message_ingress, REWRITES as u64);
    assert_eq!(last.message_egress, REWRITES as u64);
}

#[tokio::test]
async fn test_counts_survive_restart() {
    let dir = TempDir::new().expect("create temp dir");
    let store = SnapshotStore::in_dir(dir.path());

    let first = MetricsHandle::new(Arc::new(Metrics::new()));
    for _ in 0..7 {
        first.message_ingress();
    }
    for _ in 0..5 {
        first.message_egress();
    }
    first.persist(&store).await.expect("persist");

    let second = MetricsHandle::new(Arc::new(Metrics::new()));
    second.hydrate(&store).await.expect("hydrate");
    second.message_ingress();

    let snapshot = second.snapshot().expect("attached");
    assert_eq!(snapshot.message_ingress, 8);
    assert_eq!(snapshot.message_egress, 5);
}
