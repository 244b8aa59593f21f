//! A [`Worker`] wrapped with identity and a two-phase start protocol.
//!
//! # Lifecycle
//!
//! ```text
//! start(parent)
//!   │
//!   ├── setup ──✗──▶ log, finished            (parent untouched)
//!   │
//!   ├── ready ──▶ wait for green light ──stop──▶ (scheduled: final work,
//!   │                                              cancel) finished, cancel parent
//!   │
//!   ├── work        pinned: once on a dedicated thread
//!   │               scheduled: every tick, once more after stop, then cancel
//!   │
//!   └── worker done ──▶ cancel parent ──▶ finished
//! ```
//!
//! Returning from `start` cancels the parent lifetime so that one daemon
//! exiting stops the whole program. A setup failure is the exception: it is
//! logged and siblings keep running.
//!
//! # Panic-Free Guarantees
//!
//! A panic inside the worker is caught at this boundary. The daemon is then
//! treated as stopped and the parent lifetime is cancelled.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::oneshot;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::gate::Gate;
use super::worker::Worker;

/// Shortest period a scheduled daemon ticks at.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// How a daemon drives its worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonKind {
    /// `work` runs once on a dedicated OS thread for the daemon's lifetime.
    Pinned,

    /// `work` runs once per `interval` until stopped, then once more, then
    /// the worker is cancelled. The final work and the cancel also happen
    /// when the daemon is stopped before its green light.
    Scheduled { interval: Duration },
}

pub struct Daemon {
    name: String,
    kind: DaemonKind,
    worker: Arc<dyn Worker>,
    ready: Gate,
    green_light: Gate,
    finished: Gate,
    stop_requested: CancellationToken,
    stopped: AtomicBool,
}

impl Daemon {
    pub fn new(name: impl Into<String>, worker: Arc<dyn Worker>, kind: DaemonKind) -> Self {
        Self {
            name: name.into(),
            kind,
            worker,
            ready: Gate::new(),
            green_light: Gate::new(),
            finished: Gate::new(),
            stop_requested: CancellationToken::new(),
            stopped: AtomicBool::new(false),
        }
    }

    /// Daemon running `worker` once on its own thread.
    pub fn pinned(name: impl Into<String>, worker: Arc<dyn Worker>) -> Self {
        Self::new(name, worker, DaemonKind::Pinned)
    }

    /// Daemon running `worker` every `interval`.
    pub fn scheduled(name: impl Into<String>, worker: Arc<dyn Worker>, interval: Duration) -> Self {
        Self::new(name, worker, DaemonKind::Scheduled { interval })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> DaemonKind {
        self.kind
    }

    /// Returns true once setup succeeded.
    pub fn is_ready(&self) -> bool {
        self.ready.is_open()
    }

    /// Waits until setup succeeded. Never resolves if setup failed.
    pub async fn wait_ready(&self) {
        self.ready.wait().await;
    }

    /// Lets a ready daemon begin its work.
    pub fn green_light(&self) {
        self.green_light.open();
    }

    /// Runs the whole lifecycle and returns when the daemon has finished.
    ///
    /// # Arguments
    ///
    /// * `parent` - Lifetime shared with sibling daemons. Its cancellation
    ///   stops this daemon; this daemon finishing cancels it.
    pub async fn start(self: Arc<Self>, parent: CancellationToken) {
        match self.kind {
            DaemonKind::Pinned => self.start_pinned(parent).await,
            DaemonKind::Scheduled { .. } => self.run(parent).await,
        }
    }

    /// Requests a stop. Only the first call has an effect.
    ///
    /// A pinned worker is cancelled right away; a scheduled one after its
    /// final unit of work.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        info!(daemon = %self.name, "Stopping daemon");
        self.stop_requested.cancel();

        if self.kind == DaemonKind::Pinned {
            self.worker.cancel().await;
        }
    }

    /// Resolves once the daemon has finished, including after a setup
    /// failure or a panic.
    pub async fn done(&self) {
        self.finished.wait().await;
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    async fn start_pinned(self: Arc<Self>, parent: CancellationToken) {
        let (report, outcome) = oneshot::channel();
        let daemon = Arc::clone(&self);
        let thread_parent = parent.clone();

        let spawned = thread::Builder::new()
            .name(format!("lake-{}", self.name))
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = report.send(Err(e));
                        return;
                    }
                };
                runtime.block_on(daemon.run(thread_parent));
                let _ = report.send(Ok(()));
            });

        if let Err(e) = spawned {
            error!(daemon = %self.name, error = %e, "Failed to spawn daemon thread");
            self.finished.open();
            return;
        }

        match outcome.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(daemon = %self.name, error = %e, "Failed to build daemon runtime");
                self.finished.open();
            }
            Err(_) => {
                error!(daemon = %self.name, "Daemon thread exited abnormally");
                parent.cancel();
                self.finished.open();
            }
        }
    }

    async fn run(self: Arc<Self>, parent: CancellationToken) {
        let watcher = {
            let daemon = Arc::clone(&self);
            let parent = parent.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = parent.cancelled() => daemon.stop().await,
                    _ = daemon.finished.wait() => {}
                }
            })
        };

        let result = AssertUnwindSafe(self.lifecycle(&parent))
            .catch_unwind()
            .await;

        if result.is_err() {
            error!(daemon = %self.name, "Daemon panicked, treating it as stopped");
            parent.cancel();
        }

        self.finished.open();
        watcher.abort();
        info!(daemon = %self.name, "Daemon stopped");
    }

    async fn lifecycle(&self, parent: &CancellationToken) {
        if let Err(e) = self.worker.setup().await {
            if self.stop_requested.is_cancelled() {
                info!(daemon = %self.name, error = %e, "Daemon stopped during setup");
            } else {
                error!(daemon = %self.name, error = %e, "Daemon setup failed");
            }
            return;
        }

        self.ready.open();
        debug!(daemon = %self.name, "Daemon ready, waiting for green light");

        tokio::select! {
            _ = self.green_light.wait() => {}
            _ = self.stop_requested.cancelled() => {
                info!(daemon = %self.name, "Daemon stopped before green light");
                if let DaemonKind::Scheduled { .. } = self.kind {
                    self.finish_schedule().await;
                }
                parent.cancel();
                return;
            }
        }

        info!(daemon = %self.name, "Daemon started");
        match self.kind {
            DaemonKind::Pinned => self.worker.work().await,
            DaemonKind::Scheduled { interval } => self.schedule(interval).await,
        }

        self.worker.done().await;
        parent.cancel();
    }

    async fn schedule(&self, period: Duration) {
        // tokio intervals reject a zero period
        let period = period.max(MIN_INTERVAL);
        let mut ticks = interval_at(Instant::now() + period, period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = self.stop_requested.cancelled() => break,

                _ = ticks.tick() => self.worker.work().await,
            }
        }

        self.finish_schedule().await;
    }

    /// Final unit of work of a scheduled daemon, then the worker's cancel.
    async fn finish_schedule(&self) {
        self.worker.work().await;
        self.worker.cancel().await;
    }
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("ready", &self.ready.is_open())
            .field("finished", &self.finished.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkerError;
    use async_trait::async_trait;
    use std::io;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    /// Worker whose work parks until cancelled, counting every call.
    #[derive(Default)]
    struct CountingWorker {
        fail_setup: bool,
        panic_in_work: bool,
        setups: AtomicUsize,
        works: AtomicUsize,
        cancels: AtomicUsize,
        released: CancellationToken,
    }

    #[async_trait]
    impl Worker for CountingWorker {
        async fn setup(&self) -> Result<(), WorkerError> {
            self.setups.fetch_add(1, Ordering::SeqCst);
            if self.fail_setup {
                return Err(io::Error::new(io::ErrorKind::Other, "no resources").into());
            }
            Ok(())
        }

        async fn work(&self) {
            self.works.fetch_add(1, Ordering::SeqCst);
            if self.panic_in_work {
                panic!("worker misbehaved");
            }
            self.released.cancelled().await;
        }

        async fn cancel(&self) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            self.released.cancel();
        }

        async fn done(&self) {
            self.released.cancelled().await;
        }
    }

    /// Worker whose work returns immediately.
    #[derive(Default)]
    struct TickWorker {
        works: AtomicUsize,
        cancels: AtomicUsize,
        works_at_cancel: AtomicUsize,
    }

    #[async_trait]
    impl Worker for TickWorker {
        async fn setup(&self) -> Result<(), WorkerError> {
            Ok(())
        }

        async fn work(&self) {
            self.works.fetch_add(1, Ordering::SeqCst);
        }

        async fn cancel(&self) {
            self.works_at_cancel
                .store(self.works.load(Ordering::SeqCst), Ordering::SeqCst);
            self.cancels.fetch_add(1, Ordering::SeqCst);
        }

        async fn done(&self) {}
    }

    fn spawn(daemon: &Arc<Daemon>, parent: &CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(Arc::clone(daemon).start(parent.clone()))
    }

    #[tokio::test]
    async fn test_work_waits_for_green_light() {
        let worker = Arc::new(CountingWorker::default());
        let daemon = Arc::new(Daemon::pinned("counting", worker.clone()));
        let parent = CancellationToken::new();
        let handle = spawn(&daemon, &parent);

        timeout(WAIT, daemon.wait_ready()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(worker.works.load(Ordering::SeqCst), 0);

        daemon.green_light();
        let deadline = Instant::now() + WAIT;
        while worker.works.load(Ordering::SeqCst) == 0 {
            assert!(Instant::now() < deadline, "work never started");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        daemon.stop().await;
        timeout(WAIT, daemon.done()).await.unwrap();
        handle.await.unwrap();
        assert!(parent.is_cancelled());
    }

    #[tokio::test]
    async fn test_concurrent_stops_cancel_once() {
        let worker = Arc::new(CountingWorker::default());
        let daemon = Arc::new(Daemon::pinned("counting", worker.clone()));
        let parent = CancellationToken::new();
        let handle = spawn(&daemon, &parent);

        timeout(WAIT, daemon.wait_ready()).await.unwrap();
        daemon.green_light();

        let stops: Vec<_> = (0..8)
            .map(|_| {
                let daemon = Arc::clone(&daemon);
                tokio::spawn(async move { daemon.stop().await })
            })
            .collect();
        for stop in stops {
            stop.await.unwrap();
        }
        parent.cancel();
        daemon.stop().await;

        timeout(WAIT, daemon.done()).await.unwrap();
        timeout(WAIT, daemon.done()).await.unwrap();
        handle.await.unwrap();
        assert_eq!(worker.cancels.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_before_green_light_skips_work() {
        let worker = Arc::new(CountingWorker::default());
        let daemon = Arc::new(Daemon::pinned("counting", worker.clone()));
        let parent = CancellationToken::new();
        let handle = spawn(&daemon, &parent);

        timeout(WAIT, daemon.wait_ready()).await.unwrap();
        daemon.stop().await;

        timeout(WAIT, daemon.done()).await.unwrap();
        handle.await.unwrap();
        assert_eq!(worker.works.load(Ordering::SeqCst), 0);
        assert_eq!(worker.cancels.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_parent_cancel_stops_daemon() {
        let worker = Arc::new(CountingWorker::default());
        let daemon = Arc::new(Daemon::pinned("counting", worker.clone()));
        let parent = CancellationToken::new();
        let handle = spawn(&daemon, &parent);

        timeout(WAIT, daemon.wait_ready()).await.unwrap();
        daemon.green_light();
        parent.cancel();

        timeout(WAIT, daemon.done()).await.unwrap();
        handle.await.unwrap();
        assert_eq!(worker.cancels.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_setup_failure_leaves_parent_running() {
        let worker = Arc::new(CountingWorker {
            fail_setup: true,
            ..Default::default()
        });
        let daemon = Arc::new(Daemon::pinned("broken", worker.clone()));
        let parent = CancellationToken::new();
        let handle = spawn(&daemon, &parent);

        timeout(WAIT, daemon.done()).await.unwrap();
        handle.await.unwrap();

        assert!(!daemon.is_ready());
        assert!(!parent.is_cancelled());
        assert_eq!(worker.setups.load(Ordering::SeqCst), 1);
        assert_eq!(worker.works.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_panic_in_work_is_contained() {
        let worker = Arc::new(CountingWorker {
            panic_in_work: true,
            ..Default::default()
        });
        let daemon = Arc::new(Daemon::pinned("panicky", worker.clone()));
        let parent = CancellationToken::new();
        let handle = spawn(&daemon, &parent);

        timeout(WAIT, daemon.wait_ready()).await.unwrap();
        daemon.green_light();

        timeout(WAIT, daemon.done()).await.unwrap();
        handle.await.unwrap();
        assert!(parent.is_cancelled());
    }

    #[tokio::test]
    async fn test_scheduled_runs_final_work_then_cancels_once() {
        let worker = Arc::new(TickWorker::default());
        let daemon = Arc::new(Daemon::scheduled(
            "ticker",
            worker.clone(),
            Duration::from_millis(10),
        ));
        let parent = CancellationToken::new();
        let handle = spawn(&daemon, &parent);

        timeout(WAIT, daemon.wait_ready()).await.unwrap();
        daemon.green_light();

        let deadline = Instant::now() + WAIT;
        while worker.works.load(Ordering::SeqCst) < 3 {
            assert!(Instant::now() < deadline, "ticks never ran");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        daemon.stop().await;
        daemon.stop().await;
        timeout(WAIT, daemon.done()).await.unwrap();
        handle.await.unwrap();

        let works = worker.works.load(Ordering::SeqCst);
        assert_eq!(worker.cancels.load(Ordering::SeqCst), 1);
        assert_eq!(worker.works_at_cancel.load(Ordering::SeqCst), works);
        assert!(works >= 4);
    }

    #[tokio::test]
    async fn test_scheduled_stopped_before_green_light_still_flushes() {
        let worker = Arc::new(TickWorker::default());
        let daemon = Arc::new(Daemon::scheduled(
            "ticker",
            worker.clone(),
            Duration::from_millis(10),
        ));
        let parent = CancellationToken::new();
        let handle = spawn(&daemon, &parent);

        timeout(WAIT, daemon.wait_ready()).await.unwrap();
        daemon.stop().await;

        timeout(WAIT, daemon.done()).await.unwrap();
        handle.await.unwrap();

        assert_eq!(worker.works.load(Ordering::SeqCst), 1);
        assert_eq!(worker.cancels.load(Ordering::SeqCst), 1);
        assert_eq!(worker.works_at_cancel.load(Ordering::SeqCst), 1);
        assert!(parent.is_cancelled());
    }

    #[tokio::test]
    async fn test_pinned_runs_on_dedicated_thread() {
        struct ThreadWorker {
            thread_name: std::sync::Mutex<Option<String>>,
        }

        #[async_trait]
        impl Worker for ThreadWorker {
            async fn setup(&self) -> Result<(), WorkerError> {
                Ok(())
            }

            async fn work(&self) {
                let name = thread::current().name().map(str::to_string);
                *self.thread_name.lock().unwrap() = name;
            }

            async fn cancel(&self) {}

            async fn done(&self) {}
        }

        let worker = Arc::new(ThreadWorker {
            thread_name: std::sync::Mutex::new(None),
        });
        let daemon = Arc::new(Daemon::pinned("relay", worker.clone()));
        let parent = CancellationToken::new();
        let handle = spawn(&daemon, &parent);

        timeout(WAIT, daemon.wait_ready()).await.unwrap();
        daemon.green_light();
        timeout(WAIT, daemon.done()).await.unwrap();
        handle.await.unwrap();

        assert_eq!(
            worker.thread_name.lock().unwrap().as_deref(),
            Some("lake-relay")
        );
        // work returning on its own is fail-fast for the whole program
        assert!(parent.is_cancelled());
    }
}
