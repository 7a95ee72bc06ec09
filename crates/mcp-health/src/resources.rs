//! Process resource usage sampling.

use sysinfo::{Pid, ProcessRefreshKind, System};
use std::sync::Mutex;
use tracing::debug;

/// Point-in-time resource usage of one process.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceUsage {
    pub cpu_percent: f32,
    pub memory_mb: u64,
}

/// Samples CPU and memory for individual processes.
pub struct ResourceMonitor {
    system: Mutex<System>,
}

impl ResourceMonitor {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    /// Sample the process, or `None` when it cannot be observed.
    pub fn sample(&self, pid: u32) -> Option<ResourceUsage> {
        let mut system = self.system.lock().unwrap_or_else(|e| e.into_inner());

        // A targeted refresh is required; without it sysinfo reports
        // stale/zero values.
        let sysinfo_pid = Pid::from_u32(pid);
        system.refresh_process_specifics(
            sysinfo_pid,
            ProcessRefreshKind::new().with_memory().with_cpu(),
        );

        let process = system.process(sysinfo_pid)?;
        let usage = ResourceUsage {
            cpu_percent: process.cpu_usage(),
            memory_mb: process.memory() / (1024 * 1024),
        };
        debug!(
            pid,
            cpu = usage.cpu_percent,
            memory_mb = usage.memory_mb,
            "sampled process resources"
        );
        Some(usage)
    }
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampling_own_process_succeeds() {
        let monitor = ResourceMonitor::new();
        let usage = monitor.sample(std::process::id()).unwrap();
        // A running test binary occupies at least some memory.
        assert!(usage.memory_mb < 1024 * 1024);
    }

    #[test]
    fn sampling_unknown_pid_returns_none() {
        let monitor = ResourceMonitor::new();
        assert!(monitor.sample(u32::MAX - 1).is_none());
    }
}
