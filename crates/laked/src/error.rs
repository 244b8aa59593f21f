//! Error types for the daemon crate.

use std::io;

use lake_core::MetricsError;
use lake_transport::TransportError;
use thiserror::Error;

/// Why a relay cycle could not be set up.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Bind failed with an error retrying will not fix
    #[error("Relay bind failed: {0}")]
    Bind(#[source] TransportError),

    /// Cancel arrived while the cycle was still binding
    #[error("Relay setup aborted by cancel")]
    Aborted,

    /// The cycle already relayed once and cannot be set up again
    #[error("Relay cycle already used")]
    Spent,
}

/// Failure reported by [`Worker::setup`](crate::supervisor::Worker::setup).
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error("Metrics error: {0}")]
    Metrics(#[from] MetricsError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors reported by the [`Program`](crate::supervisor::Program).
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// Some daemons did not become ready in time
    #[error("Daemons not ready: {}", names.join(", "))]
    NotReady { names: Vec<String> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_ready_lists_names() {
        let err = SupervisorError::NotReady {
            names: vec!["relay".to_string(), "metrics".to_string()],
        };
        assert_eq!(err.to_string(), "Daemons not ready: relay, metrics");
    }

    #[test]
    fn test_relay_error_is_transparent() {
        let err = WorkerError::from(RelayError::Aborted);
        assert_eq!(err.to_string(), "Relay setup aborted by cancel");
    }
}
