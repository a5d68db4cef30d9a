//! Memory monitoring
//!
//! Two concerns with different authority: the heap monitor reports this
//! process's resident memory after each batch and feeds the adaptive
//! sizer's back-pressure line, while the system monitor only warns when
//! machine-wide free memory runs low and never throttles anything.

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::warn;

/// System free memory below this mark triggers a warning.
const LOW_MEMORY_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Samples process and system memory.
pub struct MemoryMonitor {
    system: System,
    pid: Pid,
    /// Suppress repeat warnings until pressure clears
    warned: bool,
}

impl MemoryMonitor {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            pid: Pid::from_u32(std::process::id()),
            warned: false,
        }
    }

    /// Resident memory of this process in bytes.
    pub fn heap_used(&mut self) -> u64 {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );
        self.system
            .process(self.pid)
            .map(|p| p.memory())
            .unwrap_or(0)
    }

    /// Warn once when system free memory drops below 2 GiB. Returns the
    /// available bytes for stats surfaces.
    pub fn check_system_pressure(&mut self) -> u64 {
        self.system.refresh_memory();
        let available = self.system.available_memory();
        if available < LOW_MEMORY_BYTES {
            if !self.warned {
                warn!(
                    "System memory low: {} MiB available",
                    available / (1024 * 1024)
                );
                self.warned = true;
            }
        } else {
            self.warned = false;
        }
        available
    }
}

impl Default for MemoryMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_used_reports_something() {
        let mut monitor = MemoryMonitor::new();
        // A live process always has resident memory.
        assert!(monitor.heap_used() > 0);
    }

    #[test]
    fn test_system_pressure_returns_available() {
        let mut monitor = MemoryMonitor::new();
        let _available = monitor.check_system_pressure();
        // No assertion on the value: machine-dependent. The call must not
        // panic and must be repeatable.
        let _ = monitor.check_system_pressure();
    }
}
