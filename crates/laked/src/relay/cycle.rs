//! One relay cycle: a transport session from bind to teardown.
//!
//! ```text
//! Unconfigured ──setup──▶ Binding ──both bound──▶ Ready
//!                            │ busy port: sleep, retry
//!                            │ cancel / hard bind error: setup fails
//!                            ▼
//! Ready ──work──▶ Relaying ──fatal error or cancel──▶ Draining ──▶ Closed
//! ```
//!
//! A cycle is single-use. The [`RelayWorker`](super::RelayWorker) builds a
//! new one after a crash.

use std::net::SocketAddr;

use lake_core::MetricsHandle;
use lake_transport::{Context, PubSocket, PullSocket, SocketOptions, Terminator, TransportError};
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::RelayError;

/// Pause between attempts to bind a port that is still held.
pub const BIND_BACKOFF: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Unconfigured,
    Binding,
    Ready,
    Relaying,
    Draining,
    Closed,
}

/// Why a cycle's work returned.
#[derive(Debug)]
pub enum CycleExit {
    /// Cancel was requested; do not restart
    Canceled,

    /// The transport session died on its own; restart
    Crashed(TransportError),
}

pub struct Relay {
    pull_addr: SocketAddr,
    pub_addr: SocketAddr,
    metrics: MetricsHandle,
    cancel: CancellationToken,
    state: RelayState,
    context: Context,
    pull: Option<PullSocket>,
    publisher: Option<PubSocket>,
    exit: Option<CycleExit>,
    #[cfg(test)]
    faults: tests::Faults,
}

impl Relay {
    /// Creates an unconfigured cycle. No I/O happens until [`setup`](Self::setup).
    ///
    /// # Arguments
    ///
    /// * `pull_addr` - Inbound address pushers connect to
    /// * `pub_addr` - Outbound address subscribers connect to
    /// * `metrics` - Shared counters; a detached handle counts nothing
    /// * `cancel` - Cancel request shared with the owning worker
    pub fn new(
        pull_addr: SocketAddr,
        pub_addr: SocketAddr,
        metrics: MetricsHandle,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            pull_addr,
            pub_addr,
            metrics,
            cancel,
            state: RelayState::Unconfigured,
            context: Context::new(),
            pull: None,
            publisher: None,
            exit: None,
            #[cfg(test)]
            faults: tests::Faults::default(),
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    /// Handle that terminates this cycle's transport from anywhere.
    pub fn terminator(&self) -> Terminator {
        self.context.terminator()
    }

    /// Actual (pull, publish) addresses once bound.
    pub fn local_addrs(&self) -> Option<(SocketAddr, SocketAddr)> {
        let pull = self.pull.as_ref()?.local_addr()?;
        let publisher = self.publisher.as_ref()?.local_addr()?;
        Some((pull, publisher))
    }

    /// Creates and binds both sockets.
    ///
    /// A busy port is retried every [`BIND_BACKOFF`] for as long as it takes.
    ///
    /// # Errors
    ///
    /// - `RelayError::Aborted` if cancel arrives while binding
    /// - `RelayError::Bind` for a bind error retrying cannot fix
    pub async fn setup(&mut self) -> Result<(), RelayError> {
        loop {
            match self.state {
                RelayState::Unconfigured => {
                    self.pull = Some(self.context.pull(SocketOptions::lossless()));
                    self.publisher = Some(self.context.publisher(SocketOptions::lossless()));
                    self.state = RelayState::Binding;
                }
                RelayState::Binding => {
                    self.bind_sockets().await?;
                    info!(
                        pull = %self.pull_addr,
                        publish = %self.pub_addr,
                        "Relay bound"
                    );
                    self.state = RelayState::Ready;
                }
                RelayState::Ready => return Ok(()),
                RelayState::Relaying | RelayState::Draining | RelayState::Closed => {
                    return Err(RelayError::Spent);
                }
            }
        }
    }

    /// Relays until cancel or a fatal transport error, then tears down.
    pub async fn work(&mut self) -> CycleExit {
        loop {
            match self.state {
                RelayState::Ready => {
                    info!("Relay started");
                    self.state = RelayState::Relaying;
                }
                RelayState::Relaying => {
                    self.exit = Some(self.relay().await);
                    self.state = RelayState::Draining;
                }
                RelayState::Draining => {
                    self.teardown().await;
                    self.state = RelayState::Closed;
                }
                RelayState::Closed => return self.exit.take().unwrap_or(CycleExit::Canceled),
                RelayState::Unconfigured | RelayState::Binding => {
                    debug!(state = ?self.state, "Relay work called before setup");
                    self.state = RelayState::Draining;
                }
            }
        }
    }

    /// Releases sockets of a cycle that never reached work.
    pub async fn close(&mut self) {
        if self.state != RelayState::Closed {
            self.teardown().await;
            self.state = RelayState::Closed;
        }
    }

    async fn bind_sockets(&mut self) -> Result<(), RelayError> {
        let mut attempts: u64 = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(RelayError::Aborted);
            }

            match self.try_bind().await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable_bind() => {
                    attempts += 1;
                    if attempts == 1 {
                        info!(error = %e, "Port busy, retrying bind");
                    } else {
                        debug!(error = %e, attempts, "Port still busy");
                    }
                }
                Err(e) if e.is_fatal() && self.cancel.is_cancelled() => {
                    return Err(RelayError::Aborted);
                }
                Err(e) => return Err(RelayError::Bind(e)),
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(RelayError::Aborted),
                _ = sleep(BIND_BACKOFF) => {}
            }
        }
    }

    async fn try_bind(&mut self) -> Result<(), TransportError> {
        let (Some(pull), Some(publisher)) = (self.pull.as_mut(), self.publisher.as_mut()) else {
            return Err(TransportError::SocketClosed);
        };

        if pull.local_addr().is_none() {
            self.pull_addr = pull.bind(self.pull_addr).await?;
        }
        if publisher.local_addr().is_none() {
            self.pub_addr = publisher.bind(self.pub_addr).await?;
        }
        Ok(())
    }

    async fn relay(&mut self) -> CycleExit {
        let (Some(pull), Some(publisher)) = (self.pull.as_mut(), self.publisher.as_ref()) else {
            return CycleExit::Canceled;
        };
        let cancel = &self.cancel;

        loop {
            #[cfg(test)]
            let injected = self.faults.receive.pop_front();
            #[cfg(not(test))]
            let injected: Option<TransportError> = None;

            let received = match injected {
                Some(e) => Err(e),
                None => tokio::select! {
                    biased;

                    _ = cancel.cancelled() => return CycleExit::Canceled,

                    received = pull.recv() => received,
                },
            };

            let message = match received {
                Ok(message) => message,
                Err(e) if e.is_fatal() => return exit_for(cancel, e),
                Err(e) => {
                    debug!(error = %e, "Transient receive error");
                    continue;
                }
            };

            if cancel.is_cancelled() {
                return CycleExit::Canceled;
            }
            self.metrics.message_ingress();

            #[cfg(test)]
            let sent = match self.faults.send.pop_front() {
                Some(e) => Err(e),
                None => publisher.send(message).await,
            };
            #[cfg(not(test))]
            let sent = publisher.send(message).await;

            match sent {
                Ok(()) => self.metrics.message_egress(),
                Err(e) if e.is_fatal() => return exit_for(cancel, e),
                Err(e) => debug!(error = %e, "Transient send error"),
            }
        }
    }

    async fn teardown(&mut self) {
        if let Some(pull) = self.pull.take() {
            pull.close().await;
        }
        if let Some(publisher) = self.publisher.take() {
            publisher.close().await;
        }
        self.context.terminate();
        debug!("Relay closed");
    }
}

fn exit_for(cancel: &CancellationToken, error: TransportError) -> CycleExit {
    if cancel.is_cancelled() {
        CycleExit::Canceled
    } else {
        CycleExit::Crashed(error)
    }
}
