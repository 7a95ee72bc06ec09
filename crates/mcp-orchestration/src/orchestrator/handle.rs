//! Public orchestrator handle.
//!
//! A lightweight, cloneable handle; all mutating methods send commands to the
//! actor and await the response. Status reads go straight to the record store
//! and may return snapshots that are stale relative to in-flight operations.

use super::commands::OrchestratorCommand;
use super::types::{Result, StartOptions, StartOutcome};
use crate::queue::{CommandExecutor, CommandKind, OrchestrationCommand};
use async_trait::async_trait;
use chrono::Utc;
use mcp_common::OrchestrationError;
use mcp_health::{HealthCheckReport, HealthMonitor};
use mcp_registry::{ProcessRecord, RecordStore};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Handle to the orchestrator actor.
#[derive(Clone)]
pub struct Orchestrator {
    pub(super) cmd_tx: mpsc::Sender<OrchestratorCommand>,
    pub(super) store: Arc<dyn RecordStore>,
}

impl Orchestrator {
    fn send_err(context: &str) -> OrchestrationError {
        OrchestrationError::channel_closed(format!("{}: actor unavailable", context))
    }

    fn recv_err(context: &str) -> OrchestrationError {
        OrchestrationError::channel_closed(format!("{}: actor dropped response", context))
    }

    /// Start a named process.
    ///
    /// `command` may be omitted for names already known from configuration or
    /// a previous start. Fails with `AlreadyRunning` when the process is
    /// running or starting, unless `options.idempotent` is set.
    pub async fn start_process(
        &self,
        name: &str,
        command: Option<Vec<String>>,
        options: StartOptions,
    ) -> Result<StartOutcome> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(OrchestratorCommand::Start {
                name: name.to_string(),
                command,
                options,
                resp: tx,
            })
            .await
            .map_err(|_| Self::send_err("start_process"))?;
        rx.await.map_err(|_| Self::recv_err("start_process"))?
    }

    /// Stop a named process. Unknown names and already-stopped processes
    /// succeed as no-ops; `stop` is safe to call twice.
    pub async fn stop_process(&self, name: &str, force_kill: bool) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(OrchestratorCommand::Stop {
                name: name.to_string(),
                force_kill,
                resp: tx,
            })
            .await
            .map_err(|_| Self::send_err("stop_process"))?;
        rx.await.map_err(|_| Self::recv_err("stop_process"))?
    }

    /// Stop then start a named process, propagating whichever step fails.
    pub async fn restart_process(&self, name: &str) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(OrchestratorCommand::Restart {
                name: name.to_string(),
                resp: tx,
            })
            .await
            .map_err(|_| Self::send_err("restart_process"))?;
        rx.await.map_err(|_| Self::recv_err("restart_process"))?
    }

    /// Run a health check now, regardless of the check interval.
    ///
    /// Unlike `stop`, an unknown name here is a hard error.
    pub async fn check_health(&self, name: &str) -> Result<HealthCheckReport> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(OrchestratorCommand::CheckHealth {
                name: name.to_string(),
                resp: tx,
            })
            .await
            .map_err(|_| Self::send_err("check_health"))?;
        rx.await.map_err(|_| Self::recv_err("check_health"))?
    }

    /// Snapshot of one record, read without the per-name serialization.
    pub fn get_status(&self, name: &str) -> Result<ProcessRecord> {
        self.store
            .get(name)
            .ok_or_else(|| OrchestrationError::not_found(name))
    }

    /// Snapshots of all records.
    pub fn list_processes(&self) -> Vec<ProcessRecord> {
        self.store.list()
    }
}

/// Queued commands dispatch through the orchestrator. A queued health check
/// first consults the interval gate so coincident triggers collapse into a
/// single probe.
#[async_trait]
impl CommandExecutor for Orchestrator {
    async fn execute(&self, command: &OrchestrationCommand) -> Result<()> {
        let name = command.process_name.as_str();
        match &command.kind {
            CommandKind::Start { command, options } => self
                .start_process(name, command.clone(), *options)
                .await
                .map(|_| ()),
            CommandKind::Stop { force_kill } => self.stop_process(name, *force_kill).await,
            CommandKind::HealthCheck => {
                let record = self.get_status(name)?;
                if !HealthMonitor::needs_check(&record, Utc::now()) {
                    tracing::debug!(process = %name, "health check not due, skipping");
                    return Ok(());
                }
                self.check_health(name).await.map(|_| ())
            }
        }
    }
}
