//! Metrics error types following panic-free policy.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while persisting or hydrating metrics.
///
/// None of these are fatal to the relay. Callers log them and carry on.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Reading, writing or renaming the snapshot file failed
    #[error("Snapshot I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The persisted snapshot could not be parsed
    #[error("Corrupt snapshot at {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The snapshot could not be serialized
    #[error("Failed to serialize snapshot: {0}")]
    Serialize(#[source] serde_json::Error),
}

impl MetricsError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns true when the snapshot simply does not exist yet.
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

/// Result type for metrics operations.
pub type MetricsResult<T> = Result<T, MetricsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_detection() {
        let err = MetricsError::io(
            "/tmp/nope.json",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.is_missing());
        assert!(err.to_string().contains("/tmp/nope.json"));

        let err = MetricsError::io(
            "/tmp/nope.json",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(!err.is_missing());
    }
}
