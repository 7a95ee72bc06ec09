//! Process records and their status transition rules.

use chrono::{DateTime, Utc};
use mcp_common::{OrchestrationError, OrchestrationResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Status of a managed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    /// Not running; the initial and terminal resting state.
    Stopped,
    /// Start requested; spawn may still be in progress.
    Starting,
    /// Spawned and tracked with a live PID.
    Running,
    /// Stop requested; termination in progress.
    Stopping,
    /// Last operation failed; see `last_error`.
    Error,
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessStatus::Stopped => write!(f, "stopped"),
            ProcessStatus::Starting => write!(f, "starting"),
            ProcessStatus::Running => write!(f, "running"),
            ProcessStatus::Stopping => write!(f, "stopping"),
            ProcessStatus::Error => write!(f, "error"),
        }
    }
}

impl ProcessStatus {
    /// States during which a PID may be tracked.
    pub fn holds_pid(&self) -> bool {
        matches!(
            self,
            ProcessStatus::Starting | ProcessStatus::Running | ProcessStatus::Stopping
        )
    }

    /// States from which a start request is admissible.
    pub fn can_start(&self) -> bool {
        matches!(self, ProcessStatus::Stopped | ProcessStatus::Error)
    }
}

/// Compact result of the most recent health check, cached on the record.
///
/// The full layered report is ephemeral; only this summary is retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSummary {
    pub score: u8,
    pub healthy: bool,
    pub checked_at: DateTime<Utc>,
}

/// Registry entry for one logical process.
///
/// Invariant: `pid` may be set only while the status holds a PID, and is
/// always set in `Running` and `Stopping` (in `Starting` it is absent until
/// the spawn completes). The `mark_*` transition methods are the only way the
/// orchestration layer mutates status, which is what keeps the invariant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub name: String,
    pub command: Vec<String>,
    pub status: ProcessStatus,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_health_check_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub health_check_interval: Duration,
    pub restart_count: u32,
    pub last_health: Option<HealthSummary>,
}

impl ProcessRecord {
    pub fn new(
        name: impl Into<String>,
        command: Vec<String>,
        health_check_interval: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            command,
            status: ProcessStatus::Stopped,
            pid: None,
            started_at: None,
            last_health_check_at: None,
            last_error: None,
            health_check_interval,
            restart_count: 0,
            last_health: None,
        }
    }

    /// Whether `self.status -> target` is an admissible transition.
    pub fn is_valid_transition(&self, target: ProcessStatus) -> bool {
        use ProcessStatus::*;
        match (self.status, target) {
            (Stopped, Starting) => true,
            (Starting, Running) => true,
            (Starting, Stopping) => true, // cancel a start in progress
            (Starting, Error) => true,
            (Running, Stopping) => true,
            (Running, Error) => true,
            (Stopping, Stopped) => true,
            (Stopping, Error) => true,
            (Error, Starting) => true,
            (from, to) if from == to => true,
            _ => false,
        }
    }

    fn transition(&mut self, target: ProcessStatus) -> OrchestrationResult<()> {
        if !self.is_valid_transition(target) {
            return Err(OrchestrationError::invalid_transition(
                self.name.as_str(),
                self.status.to_string(),
                target.to_string(),
            ));
        }
        tracing::debug!(
            process = %self.name,
            from = %self.status,
            to = %target,
            "status transition"
        );
        self.status = target;
        Ok(())
    }

    /// Start requested; clears any stale error from a previous run.
    pub fn mark_starting(&mut self) -> OrchestrationResult<()> {
        self.transition(ProcessStatus::Starting)?;
        self.last_error = None;
        Ok(())
    }

    /// Spawn succeeded.
    pub fn mark_running(&mut self, pid: u32) -> OrchestrationResult<()> {
        self.transition(ProcessStatus::Running)?;
        self.pid = Some(pid);
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Stop requested.
    pub fn mark_stopping(&mut self) -> OrchestrationResult<()> {
        self.transition(ProcessStatus::Stopping)
    }

    /// Stop completed; the PID is released.
    pub fn mark_stopped(&mut self) -> OrchestrationResult<()> {
        self.transition(ProcessStatus::Stopped)?;
        self.pid = None;
        Ok(())
    }

    /// Operation failed; the PID (if any) is no longer considered tracked.
    pub fn mark_error(&mut self, reason: impl Into<String>) -> OrchestrationResult<()> {
        self.transition(ProcessStatus::Error)?;
        self.pid = None;
        self.last_error = Some(reason.into());
        Ok(())
    }

    /// Record the outcome of a completed health check.
    pub fn record_health(&mut self, summary: HealthSummary) {
        self.last_health_check_at = Some(summary.checked_at);
        self.last_health = Some(summary);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ProcessRecord {
        ProcessRecord::new(
            "test",
            vec!["/bin/true".to_string()],
            Duration::from_secs(60),
        )
    }

    #[test]
    fn full_lifecycle_transitions() {
        let mut r = record();
        assert_eq!(r.status, ProcessStatus::Stopped);

        r.mark_starting().unwrap();
        assert_eq!(r.status, ProcessStatus::Starting);
        assert!(r.pid.is_none());

        r.mark_running(1234).unwrap();
        assert_eq!(r.status, ProcessStatus::Running);
        assert_eq!(r.pid, Some(1234));
        assert!(r.started_at.is_some());

        r.mark_stopping().unwrap();
        assert_eq!(r.pid, Some(1234));

        r.mark_stopped().unwrap();
        assert_eq!(r.status, ProcessStatus::Stopped);
        assert!(r.pid.is_none());
    }

    #[test]
    fn invalid_transitions_are_rejected() {
        let mut r = record();

        // Stopped -> Running skips Starting.
        assert!(!r.is_valid_transition(ProcessStatus::Running));
        assert!(matches!(
            r.mark_running(1).unwrap_err(),
            OrchestrationError::InvalidTransition { .. }
        ));

        // Stopped -> Stopping has nothing to stop.
        assert!(!r.is_valid_transition(ProcessStatus::Stopping));
        assert!(r.mark_stopping().is_err());
    }

    #[test]
    fn error_clears_pid_and_records_reason() {
        let mut r = record();
        r.mark_starting().unwrap();
        r.mark_running(77).unwrap();

        r.mark_error("handshake refused").unwrap();
        assert_eq!(r.status, ProcessStatus::Error);
        assert!(r.pid.is_none());
        assert_eq!(r.last_error.as_deref(), Some("handshake refused"));

        // Error is restartable and a new start clears the error.
        r.mark_starting().unwrap();
        assert!(r.last_error.is_none());
    }

    #[test]
    fn pid_invariant_holds_across_transitions() {
        let mut r = record();
        r.mark_starting().unwrap();
        r.mark_running(10).unwrap();
        r.mark_stopping().unwrap();
        r.mark_stopped().unwrap();
        assert!(r.pid.is_none() || r.status.holds_pid());

        r.mark_starting().unwrap();
        r.mark_error("spawn failed").unwrap();
        assert!(r.pid.is_none());
    }

    #[test]
    fn record_health_updates_timestamp_and_summary() {
        let mut r = record();
        let summary = HealthSummary {
            score: 80,
            healthy: true,
            checked_at: Utc::now(),
        };
        r.record_health(summary);
        assert_eq!(r.last_health_check_at, Some(summary.checked_at));
        assert_eq!(r.last_health, Some(summary));
    }

    #[test]
    fn same_state_transition_is_a_no_op() {
        let mut r = record();
        r.mark_starting().unwrap();
        r.mark_starting().unwrap();
        assert_eq!(r.status, ProcessStatus::Starting);
    }
}
