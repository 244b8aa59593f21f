//! Relay worker: pull → publish forwarding with crash recovery.
//!
//! The worker owns a sequence of [`Relay`] cycles. A cycle that dies on its
//! own (transport terminated, socket closed) is replaced by a fresh one
//! bound to the same addresses; a cycle ended by cancel is not.
//!
//! Cancel sets the shared cancel token and terminates the current cycle's
//! transport context, which unblocks a receive parked in the work loop.

mod cycle;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use lake_core::{Configuration, MetricsHandle};
use lake_transport::Terminator;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{RelayError, WorkerError};
use crate::supervisor::Worker;

pub use cycle::{CycleExit, Relay, RelayState, BIND_BACKOFF};

pub struct RelayWorker {
    pull_addr: SocketAddr,
    pub_addr: SocketAddr,
    metrics: MetricsHandle,
    cancel: CancellationToken,
    finished: CancellationToken,
    prepared: tokio::sync::Mutex<Option<Relay>>,
    current: Mutex<Option<Terminator>>,
    bound: Mutex<Option<(SocketAddr, SocketAddr)>>,
    restarts: AtomicU64,
}

impl RelayWorker {
    /// Creates a worker relaying from `pull_addr` to `pub_addr`.
    pub fn new(pull_addr: SocketAddr, pub_addr: SocketAddr, metrics: MetricsHandle) -> Self {
        Self {
            pull_addr,
            pub_addr,
            metrics,
            cancel: CancellationToken::new(),
            finished: CancellationToken::new(),
            prepared: tokio::sync::Mutex::new(None),
            current: Mutex::new(None),
            bound: Mutex::new(None),
            restarts: AtomicU64::new(0),
        }
    }

    /// Creates a worker for the configured endpoints.
    pub fn from_config(config: &Configuration, metrics: MetricsHandle) -> Self {
        Self::new(config.pull_endpoint(), config.pub_endpoint(), metrics)
    }

    /// Actual (pull, publish) addresses after the first successful bind.
    pub fn local_addrs(&self) -> Option<(SocketAddr, SocketAddr)> {
        *self.bound.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of cycles started after a crash.
    pub fn restarts(&self) -> u64 {
        self.restarts.load(Ordering::Acquire)
    }

    /// Kills the current cycle's transport without requesting a stop, the
    /// way an out-of-band transport failure would. The worker recovers with
    /// a new cycle.
    pub fn terminate_transport(&self) {
        if let Some(terminator) = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            warn!("Terminating relay transport");
            terminator.terminate();
        }
    }

    fn addrs(&self) -> (SocketAddr, SocketAddr) {
        self.local_addrs().unwrap_or((self.pull_addr, self.pub_addr))
    }

    /// Builds and binds one cycle.
    async fn bind_cycle(&self) -> Result<Relay, RelayError> {
        let (pull_addr, pub_addr) = self.addrs();
        let mut relay = Relay::new(pull_addr, pub_addr, self.metrics.clone(), self.cancel.clone());

        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(relay.terminator());

        if let Err(e) = relay.setup().await {
            relay.close().await;
            return Err(e);
        }

        let mut bound = self.bound.lock().unwrap_or_else(PoisonError::into_inner);
        if bound.is_none() {
            *bound = relay.local_addrs();
        }
        Ok(relay)
    }

    /// Binds the next cycle after a crash, retrying until it binds or
    /// cancel is requested.
    async fn restart_cycle(&self) -> Option<Relay> {
        loop {
            match self.bind_cycle().await {
                Ok(relay) => return Some(relay),
                Err(RelayError::Aborted) => return None,
                Err(e) => {
                    error!(error = %e, "Failed to rebind relay, retrying");
                    tokio::select! {
                        _ = self.cancel.cancelled() => return None,
                        _ = sleep(BIND_BACKOFF) => {}
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Worker for RelayWorker {
    async fn setup(&self) -> Result<(), WorkerError> {
        let relay = self.bind_cycle().await?;
        *self.prepared.lock().await = Some(relay);
        Ok(())
    }

    async fn work(&self) {
        let mut next = self.prepared.lock().await.take();

        loop {
            let mut relay = match next.take() {
                Some(relay) => relay,
                None => match self.restart_cycle().await {
                    Some(relay) => relay,
                    None => break,
                },
            };

            match relay.work().await {
                CycleExit::Canceled => {
                    info!("Relay stopped");
                    break;
                }
                CycleExit::Crashed(e) => {
                    let restarts = self.restarts.fetch_add(1, Ordering::AcqRel) + 1;
                    warn!(error = %e, restarts, "Relay crashed, restarting");
                }
            }
        }

        self.finished.cancel();
    }

    async fn cancel(&self) {
        info!("Cancelling relay");
        self.cancel.cancel();
        if let Some(terminator) = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            terminator.terminate();
        }
    }

    async fn done(&self) {
        self.finished.cancelled().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn loopback() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    #[tokio::test]
    async fn test_setup_records_bound_addresses() {
        let worker = RelayWorker::new(loopback(), loopback(), MetricsHandle::detached());
        assert!(worker.local_addrs().is_none());

        worker.setup().await.unwrap();
        let (pull, publisher) = worker.local_addrs().unwrap();
        assert_ne!(pull.port(), 0);
        assert_ne!(publisher.port(), 0);

        worker.cancel().await;
        worker.work().await;
        tokio::time::timeout(Duration::from_secs(1), worker.done())
            .await
            .unwrap();
        assert_eq!(worker.restarts(), 0);
    }

    #[tokio::test]
    async fn test_cancel_during_setup_aborts() {
        let worker = RelayWorker::new(loopback(), loopback(), MetricsHandle::detached());
        worker.cancel().await;

        let err = worker.setup().await.unwrap_err();
        assert!(matches!(err, WorkerError::Relay(RelayError::Aborted)));
    }
}
