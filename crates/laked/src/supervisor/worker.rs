//! The capability every supervised unit of work implements.

use async_trait::async_trait;

use crate::error::WorkerError;

/// A unit of work driven by a [`Daemon`](super::Daemon).
///
/// The daemon calls `setup` once, then `work` (once for pinned daemons, once
/// per tick plus a final time for scheduled ones). `cancel` may be called
/// from any task at any time and must make a running `work` return within
/// bounded time. `done` resolves once `work` has returned and resources are
/// released.
#[async_trait]
pub trait Worker: Send + Sync + 'static {
    /// Acquires resources. May retry internally.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker cannot run at all; the daemon then
    /// never calls `work`.
    async fn setup(&self) -> Result<(), WorkerError>;

    /// Main loop (pinned) or one unit of periodic work (scheduled).
    async fn work(&self);

    /// Requests a cooperative stop.
    async fn cancel(&self);

    /// Resolves once work has returned and teardown is complete.
    async fn done(&self);
}
