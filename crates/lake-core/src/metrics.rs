//! Relay throughput counters.
//!
//! `Metrics` holds monotonically increasing counters updated with atomic
//! increment-by-one and read without taking a lock. One instance is shared
//! between the relay (which increments) and the metrics worker (which
//! flushes); nobody else writes the snapshot file.
//!
//! # Counter policies
//!
//! - snapshot: counters keep accumulating; [`Metrics::snapshot`] reads them.
//! - drain-on-flush: [`Metrics::drain`] reads and zeroes them in one atomic
//!   swap per counter, so no concurrent increment is lost.
//!
//! A process uses exactly one of the two, picked by its metrics backend.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::MetricsResult;
use crate::persistence::SnapshotStore;

/// Point-in-time copy of the counters.
///
/// Serialized as `{"messageEgress":..,"messageIngress":..,"memoryAllocated":..}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Messages published to subscribers
    pub message_egress: u64,

    /// Messages received from pushers
    pub message_ingress: u64,

    /// Resident memory of the process in bytes at the last sample
    #[serde(default)]
    pub memory_allocated: u64,
}

/// Lock-free counter set.
#[derive(Debug, Default)]
pub struct Metrics {
    message_ingress: AtomicU64,
    message_egress: AtomicU64,
    memory_allocated: AtomicU64,
}

impl Metrics {
    /// Creates a zeroed counter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one message received on the inbound socket.
    pub fn message_ingress(&self) {
        self.message_ingress.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts one message published on the outbound socket.
    pub fn message_egress(&self) {
        self.message_egress.fetch_add(1, Ordering::Relaxed);
    }

    /// Records the latest process memory sample.
    pub fn memory_allocated(&self, bytes: u64) {
        self.memory_allocated.store(bytes, Ordering::Relaxed);
    }

    /// Reads every counter.
    ///
    /// Each field is read atomically; a concurrent increment may land in
    /// this snapshot or the next one.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            message_egress: self.message_egress.load(Ordering::Acquire),
            message_ingress: self.message_ingress.load(Ordering::Acquire),
            memory_allocated: self.memory_allocated.load(Ordering::Acquire),
        }
    }

    /// Reads and zeroes the message counters (drain-on-flush policy).
    ///
    /// Memory is a gauge and is reported, not reset.
    pub fn drain(&self) -> Snapshot {
        Snapshot {
            message_egress: self.message_egress.swap(0, Ordering::AcqRel),
            message_ingress: self.message_ingress.swap(0, Ordering::AcqRel),
            memory_allocated: self.memory_allocated.load(Ordering::Acquire),
        }
    }

    /// Restores message counters from a persisted snapshot.
    pub fn restore(&self, snapshot: &Snapshot) {
        self.message_egress
            .store(snapshot.message_egress, Ordering::Release);
        self.message_ingress
            .store(snapshot.message_ingress, Ordering::Release);
    }
}

// ============================================================================
// Metrics Handle
// ============================================================================

/// Shared, possibly detached reference to a [`Metrics`] sink.
///
/// A detached handle (the `Default`) turns every operation into a no-op, so
/// components never need to check whether metrics were wired up.
#[derive(Debug, Clone, Default)]
pub struct MetricsHandle {
    inner: Option<Arc<Metrics>>,
}

impl MetricsHandle {
    /// Wraps a shared sink.
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            inner: Some(metrics),
        }
    }

    /// A handle that records nothing.
    pub fn detached() -> Self {
        Self::default()
    }

    /// Returns true when the handle points at a sink.
    pub fn is_attached(&self) -> bool {
        self.inner.is_some()
    }

    /// Counts one ingress; no-op when detached.
    pub fn message_ingress(&self) {
        if let Some(metrics) = &self.inner {
            metrics.message_ingress();
        }
    }

    /// Counts one egress; no-op when detached.
    pub fn message_egress(&self) {
        if let Some(metrics) = &self.inner {
            metrics.message_egress();
        }
    }

    /// Records a memory sample; no-op when detached.
    pub fn memory_allocated(&self, bytes: u64) {
        if let Some(metrics) = &self.inner {
            metrics.memory_allocated(bytes);
        }
    }

    /// Reads the counters, `None` when detached.
    pub fn snapshot(&self) -> Option<Snapshot> {
        self.inner.as_ref().map(|metrics| metrics.snapshot())
    }

    /// Reads and zeroes the message counters, `None` when detached.
    pub fn drain(&self) -> Option<Snapshot> {
        self.inner.as_ref().map(|metrics| metrics.drain())
    }

    /// Persists the current counters; no-op when detached.
    pub async fn persist(&self, store: &SnapshotStore) -> MetricsResult<()> {
        match &self.inner {
            Some(metrics) => store.persist(&metrics.snapshot()).await,
            None => Ok(()),
        }
    }

    /// Restores counters from the store; no-op when detached.
    pub async fn hydrate(&self, store: &SnapshotStore) -> MetricsResult<()> {
        match &self.inner {
            Some(metrics) => {
                let snapshot = store.load().await?;
                metrics.restore(&snapshot);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl From<Arc<Metrics>> for MetricsHandle {
    fn from(metrics: Arc<Metrics>) -> Self {
        Self::new(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ingress_counts() {
        let metrics = Metrics::new();
        assert_eq!(metrics.snapshot().message_ingress, 0);

        for _ in 0..1000 {
            metrics.message_ingress();
        }

        assert_eq!(metrics.snapshot().message_ingress, 1000);
        assert_eq!(metrics.snapshot().message_egress, 0);
    }

    #[test]
    fn test_egress_counts() {
        let metrics = Metrics::new();
        for _ in 0..1000 {
            metrics.message_egress();
        }
        assert_eq!(metrics.snapshot().message_egress, 1000);
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let metrics = Arc::new(Metrics::new());

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let metrics = Arc::clone(&metrics);
                std::thread::spawn(move || {
                    for _ in 0..10_000 {
                        metrics.message_ingress();
                        metrics.message_egress();
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.message_ingress, 80_000);
        assert_eq!(snapshot.message_egress, 80_000);
    }

    #[test]
    fn test_drain_zeroes_message_counters() {
        let metrics = Metrics::new();
        metrics.message_ingress();
        metrics.message_ingress();
        metrics.message_egress();
        metrics.memory_allocated(4096);

        let drained = metrics.drain();
        assert_eq!(drained.message_ingress, 2);
        assert_eq!(drained.message_egress, 1);
        assert_eq!(drained.memory_allocated, 4096);

        let after = metrics.snapshot();
        assert_eq!(after.message_ingress, 0);
        assert_eq!(after.message_egress, 0);
        assert_eq!(after.memory_allocated, 4096);
    }

    #[test]
    fn test_restore() {
        let metrics = Metrics::new();
        metrics.restore(&Snapshot {
            message_egress: 32,
            message_ingress: 77,
            memory_allocated: 1,
        });

        metrics.message_ingress();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.message_egress, 32);
        assert_eq!(snapshot.message_ingress, 78);
        assert_eq!(snapshot.memory_allocated, 0);
    }

    #[test]
    fn test_snapshot_json_shape() {
        let snapshot = Snapshot {
            message_egress: 10,
            message_ingress: 20,
            memory_allocated: 0,
        };
        let json = serde_json::to_string(&snapshot).unwrap();
        assert_eq!(
            json,
            r#"{"messageEgress":10,"messageIngress":20,"memoryAllocated":0}"#
        );
    }

    #[test]
    fn test_snapshot_accepts_missing_memory() {
        let snapshot: Snapshot =
            serde_json::from_str(r#"{"messageEgress":32,"messageIngress":77}"#).unwrap();
        assert_eq!(snapshot.message_egress, 32);
        assert_eq!(snapshot.message_ingress, 77);
        assert_eq!(snapshot.memory_allocated, 0);
    }

    #[test]
    fn test_snapshot_keeps_full_u64_range() {
        let json = format!(
            r#"{{"messageEgress":{},"messageIngress":1}}"#,
            u64::MAX
        );
        let snapshot: Snapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(snapshot.message_egress, u64::MAX);
    }

    #[tokio::test]
    async fn test_detached_handle_is_noop() {
        let handle = MetricsHandle::detached();
        assert!(!handle.is_attached());

        handle.message_ingress();
        handle.message_egress();
        assert!(handle.snapshot().is_none());

        let store = SnapshotStore::new("/nonexistent/dir/metrics.json");
        assert!(handle.persist(&store).await.is_ok());
        assert!(handle.hydrate(&store).await.is_ok());
    }

    #[test]
    fn test_attached_handle_counts() {
        let metrics = Arc::new(Metrics::new());
        let handle = MetricsHandle::from(Arc::clone(&metrics));

        handle.message_ingress();
        handle.message_egress();
        handle.message_egress();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.message_ingress, 1);
        assert_eq!(snapshot.message_egress, 2);
        assert_eq!(handle.snapshot(), Some(snapshot));
    }
}
