//! Resident memory of the daemon process.
//!
//! Sampled by the metrics worker before every flush so the persisted
//! snapshot carries the resident memory of the relay.

use std::process;

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Samples the current process with `sysinfo`.
pub struct ProcessMonitor {
    system: System,
    pid: Pid,
}

impl ProcessMonitor {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            pid: Pid::from_u32(process::id()),
        }
    }

    /// Refreshes only this process and returns its resident memory in bytes.
    ///
    /// Returns 0 when the process cannot be read.
    pub fn memory_bytes(&mut self) -> u64 {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::new().with_memory(),
        );

        self.system
            .process(self.pid)
            .map(|p| p.memory())
            .unwrap_or_default()
    }
}

impl Default for ProcessMonitor {
    fn default() -> Self {
        Self::new()
    }
}
