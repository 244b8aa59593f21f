//! lake daemon - relay, metrics and daemon supervision
//!
//! This crate provides the building blocks of the `lake` process:
//! - `supervisor` - Worker / Daemon / Program lifecycle and shutdown
//! - `relay` - pull → publish relay with crash recovery
//! - `metrics` - periodic flush of the shared counters (file or statsd)
//! - `monitor` - process memory sampling
//! - `notify` - service-manager readiness notification
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        lake process                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │   pushers ──▶ ┌──────────────┐        ┌──────────────┐      │
//! │               │ RelayWorker  │        │MetricsWorker │      │
//! │               │ pull ─▶ pub  │        │ flush / tick │      │
//! │  subscribers◀─└──────┬───────┘        └──────┬───────┘      │
//! │                      │ ingress/egress        │ snapshot     │
//! │                      ▼                       ▼              │
//! │               ┌─────────────────────────────────────┐       │
//! │               │      Metrics (atomic counters)      │       │
//! │               └─────────────────────────────────────┘       │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Poisoned locks are recovered with `PoisonError::into_inner`
//! - A panicking worker is contained at the daemon boundary

pub mod error;
pub mod metrics;
pub mod monitor;
pub mod notify;
pub mod relay;
pub mod supervisor;

pub use error::{RelayError, SupervisorError, WorkerError};
pub use metrics::{MetricsBackend, MetricsWorker, StatsdSink};
pub use relay::RelayWorker;
pub use supervisor::{Daemon, DaemonKind, Program, Worker};
