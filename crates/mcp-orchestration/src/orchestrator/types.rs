//! Shared types for the orchestrator module.

use crate::config::ConnectionConfig;
use mcp_health::HealthCheckReport;
use mcp_process::ProcessSupervisor;
use mcp_registry::ProcessRecord;
use std::collections::VecDeque;
use tokio::sync::oneshot;

/// Recognized options for a start request. Unrecognized options do not exist:
/// this struct is the whole vocabulary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartOptions {
    /// Treat a start of an already-running process as success instead of an
    /// `AlreadyRunning` error.
    pub idempotent: bool,
}

impl StartOptions {
    pub fn idempotent() -> Self {
        Self { idempotent: true }
    }
}

/// What a start request accomplished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started { pid: u32 },
    /// Only produced for callers that opted into idempotent starts.
    AlreadyRunning { pid: u32 },
}

impl StartOutcome {
    pub fn pid(&self) -> u32 {
        match self {
            StartOutcome::Started { pid } | StartOutcome::AlreadyRunning { pid } => *pid,
        }
    }
}

/// Result type used throughout the orchestrator internals.
pub(crate) type Result<T> = mcp_common::OrchestrationResult<T>;

/// Kind of operation performed on one process.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum OpKind {
    Start {
        command: Option<Vec<String>>,
        options: StartOptions,
    },
    Stop {
        force_kill: bool,
    },
    Restart,
    CheckHealth,
}

impl OpKind {
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::Start { .. } => "start",
            OpKind::Stop { .. } => "stop",
            OpKind::Restart => "restart",
            OpKind::CheckHealth => "check_health",
        }
    }
}

/// Typed response channel for an operation.
pub(crate) enum OpResponder {
    Start(oneshot::Sender<Result<StartOutcome>>),
    Unit(oneshot::Sender<Result<()>>),
    Health(oneshot::Sender<Result<HealthCheckReport>>),
}

impl OpResponder {
    /// Resolve the responder with an error regardless of its payload type.
    pub fn fail(self, err: mcp_common::OrchestrationError) {
        match self {
            OpResponder::Start(tx) => {
                let _ = tx.send(Err(err));
            }
            OpResponder::Unit(tx) => {
                let _ = tx.send(Err(err));
            }
            OpResponder::Health(tx) => {
                let _ = tx.send(Err(err));
            }
        }
    }
}

/// An operation waiting for its turn on a busy connection.
pub(crate) struct OpRequest {
    pub kind: OpKind,
    pub resp: OpResponder,
}

/// Actor-side state for one managed connection.
///
/// The supervisor is `Option` because the op runner holds it while an
/// operation is in flight; a connection without its supervisor queues
/// further requests, which is what serializes operations per name.
pub(crate) struct ManagedConnection {
    pub config: ConnectionConfig,
    pub supervisor: Option<ProcessSupervisor>,
    /// Name of the in-flight operation, when busy.
    pub busy: Option<&'static str>,
    pub pending: VecDeque<OpRequest>,
}

impl ManagedConnection {
    pub fn new(config: ConnectionConfig) -> Self {
        let supervisor = ProcessSupervisor::new(config.name.clone());
        Self {
            config,
            supervisor: Some(supervisor),
            busy: None,
            pending: VecDeque::new(),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.is_some()
    }
}

/// Builds the registry record seeded for a configured connection.
pub(crate) fn seed_record(config: &ConnectionConfig) -> ProcessRecord {
    ProcessRecord::new(
        config.name.clone(),
        config.command.clone(),
        config.health.interval,
    )
}
