//! Per-name process supervision.
//!
//! A [`ProcessSupervisor`] owns at most one live OS process for its logical
//! name. It performs no persistence; the orchestrator records the outcome of
//! each operation in the registry.

use crate::check;
use crate::spawn::spawn_detached;
use crate::stdio_rpc::StdioRpc;
use crate::terminate::{force_kill, terminate_gracefully};
use mcp_common::{OrchestrationError, OrchestrationResult};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long to wait between liveness polls while stopping.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Extra grace after SIGKILL before declaring the stop failed.
const KILL_SETTLE_TIMEOUT: Duration = Duration::from_secs(2);

/// Stop escalation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Termination signal first, forced kill after the graceful timeout.
    Graceful,
    /// Forced kill immediately.
    Force,
}

struct TrackedProcess {
    pid: u32,
    stdio: Option<StdioRpc>,
}

/// Supervises a single OS-level process identified by a logical name.
pub struct ProcessSupervisor {
    name: String,
    tracked: Option<TrackedProcess>,
}

impl ProcessSupervisor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tracked: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// PID of the tracked process, if one was started.
    pub fn pid(&self) -> Option<u32> {
        self.tracked.as_ref().map(|t| t.pid)
    }

    /// The stdio JSON-RPC endpoint, when the process was started with one.
    pub fn stdio(&self) -> Option<&StdioRpc> {
        self.tracked.as_ref().and_then(|t| t.stdio.as_ref())
    }

    /// Liveness probe scoped to PIDs issued by this supervisor.
    ///
    /// A PID this supervisor never issued reports `false`; the probe itself
    /// never fails.
    pub fn is_alive(&self, pid: u32) -> bool {
        match &self.tracked {
            Some(t) if t.pid == pid => check::is_alive(pid),
            _ => false,
        }
    }

    /// Spawn the process, detached from the calling task.
    ///
    /// Fails with `AlreadyRunning` when a live PID is still tracked. A stale
    /// tracked PID (process died behind our back) is discarded first.
    pub fn start(
        &mut self,
        command: &[String],
        with_stdio_rpc: bool,
    ) -> OrchestrationResult<u32> {
        if let Some(tracked) = &self.tracked {
            if check::is_alive(tracked.pid) {
                return Err(OrchestrationError::already_running(self.name.as_str(), tracked.pid));
            }
            debug!(process = %self.name, pid = tracked.pid, "discarding stale tracked pid");
            self.tracked = None;
        }

        let spawned = spawn_detached(&self.name, command, with_stdio_rpc)?;
        let pid = spawned.pid;
        self.tracked = Some(TrackedProcess {
            pid,
            stdio: spawned.stdio,
        });
        Ok(pid)
    }

    /// Stop the tracked process.
    ///
    /// Graceful mode sends the termination signal and polls for exit up to
    /// `graceful_timeout`, then escalates to a forced kill; the forced kill is
    /// mandatory, there is no indefinite wait. Stopping when nothing is
    /// tracked, or when the process already exited, is a successful no-op.
    pub async fn stop(
        &mut self,
        graceful_timeout: Duration,
        mode: StopMode,
    ) -> OrchestrationResult<()> {
        let Some(tracked) = self.tracked.take() else {
            debug!(process = %self.name, "stop requested with no tracked process");
            return Ok(());
        };
        let pid = tracked.pid;

        if !check::is_alive(pid) {
            debug!(process = %self.name, pid, "process already exited before stop");
            return Ok(());
        }

        if mode == StopMode::Graceful {
            if let Err(e) = terminate_gracefully(&self.name, pid) {
                self.tracked = Some(tracked);
                return Err(e);
            }
            if self.await_exit(pid, graceful_timeout).await {
                info!(process = %self.name, pid, "process stopped gracefully");
                return Ok(());
            }
            warn!(
                process = %self.name,
                pid,
                timeout = ?graceful_timeout,
                "graceful stop timed out, escalating to forced kill"
            );
        }

        if let Err(e) = force_kill(&self.name, pid) {
            self.tracked = Some(tracked);
            return Err(e);
        }
        if self.await_exit(pid, KILL_SETTLE_TIMEOUT).await {
            info!(process = %self.name, pid, "process force-killed");
            Ok(())
        } else {
            // Re-track so a later stop can try again.
            self.tracked = Some(tracked);
            Err(OrchestrationError::timeout(self.name.as_str(), "stop"))
        }
    }

    /// Poll until the PID disappears or the deadline passes.
    async fn await_exit(&self, pid: u32, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if !check::is_alive(pid) {
                return true;
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }
        !check::is_alive(pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_alive_for_foreign_pid_is_false() {
        let supervisor = ProcessSupervisor::new("untracked");
        // Our own PID is alive, but this supervisor never issued it.
        assert!(!supervisor.is_alive(std::process::id()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn start_stop_round_trip() {
        let mut supervisor = ProcessSupervisor::new("sleeper");
        let command = vec!["/bin/sleep".to_string(), "100".to_string()];

        let pid = supervisor.start(&command, false).unwrap();
        assert!(supervisor.is_alive(pid));

        supervisor
            .stop(Duration::from_secs(5), StopMode::Graceful)
            .await
            .unwrap();
        assert!(supervisor.pid().is_none());
        assert!(!check::is_alive(pid) || !supervisor.is_alive(pid));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn double_start_reports_already_running() {
        let mut supervisor = ProcessSupervisor::new("dup");
        let command = vec!["/bin/sleep".to_string(), "100".to_string()];

        let pid = supervisor.start(&command, false).unwrap();
        let err = supervisor.start(&command, false).unwrap_err();
        assert!(matches!(
            err,
            OrchestrationError::AlreadyRunning { pid: p, .. } if p == pid
        ));

        supervisor
            .stop(Duration::from_secs(1), StopMode::Force)
            .await
            .unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stop_is_idempotent() {
        let mut supervisor = ProcessSupervisor::new("idem");
        let command = vec!["/bin/sleep".to_string(), "100".to_string()];
        supervisor.start(&command, false).unwrap();

        supervisor
            .stop(Duration::from_secs(5), StopMode::Graceful)
            .await
            .unwrap();
        // Second stop has nothing to do and must still succeed.
        supervisor
            .stop(Duration::from_secs(5), StopMode::Graceful)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn stop_without_start_is_a_no_op() {
        let mut supervisor = ProcessSupervisor::new("never-started");
        supervisor
            .stop(Duration::from_secs(1), StopMode::Graceful)
            .await
            .unwrap();
    }
}
