//! Durable snapshot file.
//!
//! The snapshot is written to a sibling temporary file and then renamed over
//! the final name, so a concurrent reader sees either the previous document
//! or the new one, never a partial write. The file is world-readable for
//! monitoring agents.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{MetricsError, MetricsResult};
use crate::metrics::Snapshot;

/// File name of the snapshot inside the metrics output directory.
pub const SNAPSHOT_FILENAME: &str = "metrics.json";

/// Suffix appended to the snapshot path for the in-flight write.
const TEMP_SUFFIX: &str = ".tmp";

/// Location of the persisted snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    /// Store at an explicit file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store named [`SNAPSHOT_FILENAME`] inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(SNAPSHOT_FILENAME))
    }

    /// Final snapshot path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(TEMP_SUFFIX);
        PathBuf::from(name)
    }

    /// Writes `snapshot` and atomically replaces the previous file.
    pub async fn persist(&self, snapshot: &Snapshot) -> MetricsResult<()> {
        let data = serde_json::to_vec(snapshot).map_err(MetricsError::Serialize)?;
        let temp = self.temp_path();

        tokio::fs::write(&temp, &data)
            .await
            .map_err(|e| MetricsError::io(&temp, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&temp, std::fs::Permissions::from_mode(0o644))
                .await
                .map_err(|e| MetricsError::io(&temp, e))?;
        }

        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|e| MetricsError::io(&self.path, e))?;

        debug!(
            path = %self.path.display(),
            ingress = snapshot.message_ingress,
            egress = snapshot.message_egress,
            "Metrics persisted"
        );
        Ok(())
    }

    /// Reads the last persisted snapshot.
    pub async fn load(&self) -> MetricsResult<Snapshot> {
        let data = tokio::fs::read(&self.path)
            .await
            .map_err(|e| MetricsError::io(&self.path, e))?;

        serde_json::from_slice(&data).map_err(|source| MetricsError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }
}
