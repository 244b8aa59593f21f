//! The pool of daemons making up one process.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::daemon::Daemon;
use crate::error::SupervisorError;
use crate::notify;

/// Named daemons sharing one lifetime.
///
/// Cancelling the shared lifetime (or any daemon finishing) stops every
/// member. [`done`](Self::done) resolves only after every member has
/// finished, and at once for an empty program.
pub struct Program {
    daemons: Vec<Arc<Daemon>>,
    lifetime: CancellationToken,
    ready_timeout: Duration,
    tasks: Vec<JoinHandle<()>>,
}

impl Program {
    pub fn new(ready_timeout: Duration) -> Self {
        Self {
            daemons: Vec::new(),
            lifetime: CancellationToken::new(),
            ready_timeout,
            tasks: Vec::new(),
        }
    }

    /// Adds a daemon. `None` is accepted and ignored, so optional daemons
    /// can be registered unconditionally.
    pub fn register(&mut self, daemon: impl Into<Option<Daemon>>) {
        if let Some(daemon) = daemon.into() {
            info!(daemon = %daemon.name(), "Daemon registered");
            self.daemons.push(Arc::new(daemon));
        }
    }

    pub fn daemons(&self) -> &[Arc<Daemon>] {
        &self.daemons
    }

    /// The lifetime shared by every daemon.
    pub fn lifetime(&self) -> CancellationToken {
        self.lifetime.clone()
    }

    /// Starts every daemon concurrently.
    pub fn start(&mut self) {
        for daemon in &self.daemons {
            let task = tokio::spawn(Arc::clone(daemon).start(self.lifetime.clone()));
            self.tasks.push(task);
        }
    }

    /// Waits until every daemon is ready.
    ///
    /// # Errors
    ///
    /// Returns `NotReady` naming the daemons still not ready after `timeout`
    /// (setup failed or is still retrying).
    pub async fn wait_ready(&self, timeout: Duration) -> Result<(), SupervisorError> {
        let all_ready = join_all(self.daemons.iter().map(|daemon| daemon.wait_ready()));
        if tokio::time::timeout(timeout, all_ready).await.is_ok() {
            return Ok(());
        }

        let names = self
            .daemons
            .iter()
            .filter(|daemon| !daemon.is_ready())
            .map(|daemon| daemon.name().to_string())
            .collect();
        Err(SupervisorError::NotReady { names })
    }

    /// Lets every daemon begin its work.
    pub fn green_light(&self) {
        for daemon in &self.daemons {
            daemon.green_light();
        }
    }

    /// Stops every daemon concurrently.
    pub async fn stop(&self) {
        self.lifetime.cancel();
        join_all(self.daemons.iter().map(|daemon| daemon.stop())).await;
    }

    /// Resolves once every daemon has finished.
    pub async fn done(&mut self) {
        join_all(self.daemons.iter().map(|daemon| daemon.done())).await;

        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                error!(error = %e, "Daemon task failed");
            }
        }
    }

    /// Runs the program until `shutdown` resolves or a daemon exits.
    ///
    /// Daemons that are not ready within the ready timeout are logged and
    /// the ready ones are released anyway. `shutdown` is watched from the
    /// start, so a shutdown while daemons are still setting up stops them
    /// without ever giving the green light.
    pub async fn run_until<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        self.start();

        let started = tokio::select! {
            biased;

            _ = &mut shutdown => {
                info!("Shutdown requested during startup");
                false
            }

            _ = self.lifetime.cancelled() => {
                warn!("A daemon exited during startup, shutting down");
                false
            }

            ready = self.wait_ready(self.ready_timeout) => {
                match ready {
                    Ok(()) => info!(daemons = self.daemons.len(), "All daemons ready"),
                    Err(e) => warn!(error = %e, "Starting without every daemon ready"),
                }
                true
            }
        };

        if started {
            self.green_light();
            notify::ready();

            tokio::select! {
                _ = &mut shutdown => info!("Shutdown requested"),
                _ = self.lifetime.cancelled() => warn!("A daemon exited, shutting down"),
            }
        }

        notify::stopping();
        self.stop().await;
        self.done().await;
        info!("All daemons stopped");
    }

    /// Runs the program until SIGTERM or SIGINT.
    ///
    /// The signal handlers are installed before any daemon starts.
    pub async fn run(&mut self) {
        let signal = shutdown_signal();
        self.run_until(signal).await;
    }
}

/// Installs the SIGTERM and SIGINT handlers and returns a future resolving
/// on the first of them.
///
/// The handlers are live as soon as this returns, before the future is
/// polled. Must be called within a tokio runtime.
pub fn shutdown_signal() -> impl Future<Output = ()> + Send + 'static {
    #[cfg(unix)]
    let handlers = {
        use tokio::signal::unix::{signal, SignalKind};

        signal(SignalKind::terminate())
            .and_then(|sigterm| signal(SignalKind::interrupt()).map(|sigint| (sigterm, sigint)))
    };

    async move {
        #[cfg(unix)]
        {
            let (mut sigterm, mut sigint) = match handlers {
                Ok(handlers) => handlers,
                Err(e) => {
                    error!(error = %e, "Error installing signal handlers");
                    std::future::pending::<()>().await;
                    return;
                }
            };

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT");
                }
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Error waiting for Ctrl+C");
                std::future::pending::<()>().await;
            }
            info!("Received Ctrl+C");
        }
    }
}
