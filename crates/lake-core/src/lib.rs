//! Lake Core - Shared types for the lake relay
//!
//! This crate provides the types shared between the relay daemon (laked)
//! and the `lake` binary:
//! - `config` - the configuration value built once at process start
//! - `metrics` - lock-free throughput counters and their snapshot record
//! - `persistence` - durable, atomically replaced snapshot files
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod config;
pub mod error;
pub mod metrics;
pub mod persistence;

// Re-exports for convenience
pub use config::{parse_duration, Configuration, MetricsConfig};
pub use error::{MetricsError, MetricsResult};
pub use metrics::{Metrics, MetricsHandle, Snapshot};
pub use persistence::{SnapshotStore, SNAPSHOT_FILENAME};
