//! Daemon supervision: workers, daemons and the program that runs them.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        Program                           │
//! │   shared lifetime (CancellationToken), signal handling   │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  ┌──────────────────────┐     ┌──────────────────────┐   │
//! │  │ Daemon "relay"       │     │ Daemon "metrics"     │   │
//! │  │ Pinned (own thread)  │     │ Scheduled (interval) │   │
//! │  └──────────┬───────────┘     └──────────┬───────────┘   │
//! │             │ setup/work/cancel/done     │               │
//! │             ▼                            ▼               │
//! │  ┌──────────────────────┐     ┌──────────────────────┐   │
//! │  │ RelayWorker          │     │ MetricsWorker        │   │
//! │  └──────────────────────┘     └──────────────────────┘   │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Start is two-phase: every daemon first becomes ready (setup done), then
//! the program green-lights them together.

mod daemon;
mod gate;
mod program;
mod worker;

pub use daemon::{Daemon, DaemonKind};
pub use gate::Gate;
pub use program::{shutdown_signal, Program};
pub use worker::Worker;
