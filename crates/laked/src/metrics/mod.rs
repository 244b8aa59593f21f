//! Metrics worker: periodic flush of the shared counters.
//!
//! Runs as a scheduled daemon. Each unit of work samples process memory
//! and flushes the counters to the configured backend:
//!
//! - [`MetricsBackend::File`] keeps snapshot semantics. Counters accumulate
//!   for the life of the process and the file holds the latest totals.
//! - [`MetricsBackend::Statsd`] drains on flush. Each flush reads and zeroes
//!   the counters and pushes the deltas.
//!
//! Flush and hydrate failures are logged and absorbed; metrics never stop
//! the relay.

pub mod statsd;

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use lake_core::{MetricsConfig, MetricsHandle, SnapshotStore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::WorkerError;
use crate::monitor::ProcessMonitor;
use crate::supervisor::Worker;

pub use statsd::StatsdSink;

/// Where flushed metrics go.
#[derive(Debug)]
pub enum MetricsBackend {
    /// Snapshot file, rewritten atomically on every flush
    File(SnapshotStore),

    /// statsd agent, counters drained on every flush
    Statsd(StatsdSink),
}

impl MetricsBackend {
    /// Picks the backend for `config`. statsd wins when both are set;
    /// `None` when neither is.
    pub fn from_config(config: &MetricsConfig) -> Option<Self> {
        if let Some(endpoint) = &config.statsd_endpoint {
            return Some(Self::Statsd(StatsdSink::new(endpoint.clone())));
        }
        config
            .output
            .as_ref()
            .map(|dir| Self::File(SnapshotStore::in_dir(dir)))
    }
}

pub struct MetricsWorker {
    metrics: MetricsHandle,
    backend: MetricsBackend,
    continuous: bool,
    monitor: Mutex<ProcessMonitor>,
    finished: CancellationToken,
}

impl MetricsWorker {
    /// # Arguments
    ///
    /// * `metrics` - Counters shared with the relay
    /// * `backend` - Flush target
    /// * `continuous` - Resume from the last snapshot at setup (file only)
    pub fn new(metrics: MetricsHandle, backend: MetricsBackend, continuous: bool) -> Self {
        Self {
            metrics,
            backend,
            continuous,
            monitor: Mutex::new(ProcessMonitor::new()),
            finished: CancellationToken::new(),
        }
    }

    /// Worker for `config`, or `None` when no backend is configured.
    pub fn from_config(config: &MetricsConfig, metrics: MetricsHandle) -> Option<Self> {
        MetricsBackend::from_config(config)
            .map(|backend| Self::new(metrics, backend, config.continuous))
    }

    pub fn backend(&self) -> &MetricsBackend {
        &self.backend
    }

    fn sample_memory(&self) {
        let bytes = self
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .memory_bytes();
        self.metrics.memory_allocated(bytes);
    }

    async fn flush(&self) {
        match &self.backend {
            MetricsBackend::File(store) => {
                if let Err(e) = self.metrics.persist(store).await {
                    warn!(error = %e, "Failed to persist metrics");
                }
            }
            MetricsBackend::Statsd(sink) => {
                let Some(drained) = self.metrics.drain() else {
                    return;
                };
                if let Err(e) = sink.send(&drained).await {
                    warn!(
                        endpoint = %sink.endpoint(),
                        error = %e,
                        dropped_ingress = drained.message_ingress,
                        dropped_egress = drained.message_egress,
                        "Failed to push metrics"
                    );
                }
            }
        }
    }
}

#[async_trait]
impl Worker for MetricsWorker {
    async fn setup(&self) -> Result<(), WorkerError> {
        match &self.backend {
            MetricsBackend::File(store) => {
                info!(path = %store.path().display(), "Metrics persist to file");
                if !self.continuous {
                    return Ok(());
                }
                match self.metrics.hydrate(store).await {
                    Ok(()) => info!(path = %store.path().display(), "Metrics hydrated"),
                    Err(e) if e.is_missing() => {
                        debug!(path = %store.path().display(), "No previous metrics, starting from zero");
                    }
                    Err(e) => warn!(error = %e, "Failed to hydrate metrics, starting from zero"),
                }
            }
            MetricsBackend::Statsd(sink) => {
                info!(endpoint = %sink.endpoint(), "Metrics push to statsd");
                if self.continuous {
                    warn!("Continuous metrics ignored with statsd, counters are drained on flush");
                }
                if let Err(e) = sink.connect().await {
                    // flushes keep failing and logging until the agent resolves
                    warn!(endpoint = %sink.endpoint(), error = %e, "Failed to open statsd socket");
                }
            }
        }
        Ok(())
    }

    async fn work(&self) {
        self.sample_memory();
        if let MetricsBackend::Statsd(sink) = &self.backend {
            if let Err(e) = sink.connect().await {
                debug!(error = %e, "statsd socket still unavailable");
            }
        }
        self.flush().await;
    }

    async fn cancel(&self) {
        debug!("Metrics worker cancelled");
        self.finished.cancel();
    }

    async fn done(&self) {
        self.finished.cancelled().await;
    }
}
