//! Error types for MCP process orchestration.
//!
//! Expected failure paths are enum variants, not panics. The queue layer uses
//! [`OrchestrationError::is_transient`] to decide between retrying a command
//! and failing it terminally.

use thiserror::Error;

/// Result type alias for orchestration operations.
pub type OrchestrationResult<T> = std::result::Result<T, OrchestrationError>;

/// Error taxonomy for process orchestration operations.
#[derive(Error, Debug, Clone)]
pub enum OrchestrationError {
    #[error("process not found: {name}")]
    NotFound { name: String },

    #[error("process already running: {name} (pid {pid})")]
    AlreadyRunning { name: String, pid: u32 },

    #[error("spawn failed: {name} - {reason}")]
    SpawnFailed { name: String, reason: String },

    #[error("stop failed: {name} - {reason}")]
    StopFailed { name: String, reason: String },

    #[error("invalid status transition for {name}: {from} -> {to}")]
    InvalidTransition {
        name: String,
        from: String,
        to: String,
    },

    #[error("operation timed out: {name} - {operation}")]
    Timeout { name: String, operation: String },

    #[error("configuration error: {name} - {reason}")]
    Configuration { name: String, reason: String },

    #[error("operation queue full for '{name}' (limit: {limit})")]
    QueueFull { name: String, limit: usize },

    #[error("command exhausted {attempts} attempt(s) for '{name}': {reason}")]
    TaskExhausted {
        name: String,
        attempts: u32,
        reason: String,
    },

    #[error("orchestrator unavailable: {context}")]
    ChannelClosed { context: String },
}

impl OrchestrationError {
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    pub fn already_running(name: impl Into<String>, pid: u32) -> Self {
        Self::AlreadyRunning {
            name: name.into(),
            pid,
        }
    }

    pub fn spawn_failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SpawnFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn stop_failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StopFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_transition(
        name: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self::InvalidTransition {
            name: name.into(),
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn timeout(name: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Timeout {
            name: name.into(),
            operation: operation.into(),
        }
    }

    pub fn configuration(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn queue_full(name: impl Into<String>, limit: usize) -> Self {
        Self::QueueFull {
            name: name.into(),
            limit,
        }
    }

    pub fn task_exhausted(
        name: impl Into<String>,
        attempts: u32,
        reason: impl Into<String>,
    ) -> Self {
        Self::TaskExhausted {
            name: name.into(),
            attempts,
            reason: reason.into(),
        }
    }

    pub fn channel_closed(context: impl Into<String>) -> Self {
        Self::ChannelClosed {
            context: context.into(),
        }
    }

    /// Whether the queue layer should retry a command that failed with this
    /// error. Permanent errors short-circuit the remaining retry attempts.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::SpawnFailed { .. }
                | Self::StopFailed { .. }
                | Self::Timeout { .. }
                | Self::QueueFull { .. }
                | Self::ChannelClosed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructor_helpers_build_matching_variants() {
        let err = OrchestrationError::not_found("echo-server");
        assert!(matches!(err, OrchestrationError::NotFound { .. }));
        assert_eq!(err.to_string(), "process not found: echo-server");

        let err = OrchestrationError::spawn_failed("bad", "no such file");
        assert!(matches!(err, OrchestrationError::SpawnFailed { .. }));
        assert!(err.to_string().contains("no such file"));
    }

    #[test]
    fn transient_classification() {
        assert!(OrchestrationError::spawn_failed("a", "enomem").is_transient());
        assert!(OrchestrationError::timeout("a", "stop").is_transient());
        assert!(OrchestrationError::queue_full("a", 16).is_transient());

        assert!(!OrchestrationError::already_running("a", 42).is_transient());
        assert!(!OrchestrationError::not_found("a").is_transient());
        assert!(!OrchestrationError::configuration("a", "empty command").is_transient());
        assert!(!OrchestrationError::invalid_transition("a", "stopped", "stopping").is_transient());
    }
}
