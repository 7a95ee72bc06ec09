//! The orchestrator actor: owns connection state and serializes per-name
//! operations.
//!
//! One operation per name is in flight at a time; further requests for the
//! same name queue FIFO behind it, while other names proceed in parallel on
//! the op runner. This is what makes every record's transition sequence
//! atomic as observed by readers of the store.

use super::commands::OrchestratorCommand;
use super::ops::{Job, OpCompleted, OpRunner, JOB_QUEUE_CAPACITY};
use super::types::{ManagedConnection, OpKind, OpRequest, OpResponder};
use crate::config::ConnectionConfig;
use mcp_common::OrchestrationError;
use mcp_process::ProcessSupervisor;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Maximum queued operations per connection.
const MAX_PENDING_OPS: usize = 16;

pub(crate) struct OrchestratorActor {
    connections: HashMap<String, ManagedConnection>,
    op_runner: OpRunner,
}

impl OrchestratorActor {
    pub fn new(connections: Vec<ConnectionConfig>, op_runner: OpRunner) -> Self {
        let connections = connections
            .into_iter()
            .map(|config| (config.name.clone(), ManagedConnection::new(config)))
            .collect();
        Self {
            connections,
            op_runner,
        }
    }

    /// Event loop. Runs until the command channel closes and all in-flight
    /// work has drained, so no responder is ever left unresolved.
    pub async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<OrchestratorCommand>,
        mut completed_rx: mpsc::Receiver<OpCompleted>,
    ) {
        let mut cmd_closed = false;

        loop {
            if cmd_closed && self.is_idle() {
                break;
            }

            tokio::select! {
                biased;

                // Completions first: they clear busy state and unblock queues.
                maybe_completed = completed_rx.recv() => {
                    match maybe_completed {
                        Some(completed) => self.handle_completed(completed),
                        None => {
                            error!("completion channel closed unexpectedly");
                            break;
                        }
                    }
                }

                maybe_cmd = cmd_rx.recv(), if !cmd_closed => {
                    match maybe_cmd {
                        Some(cmd) => self.handle_command(cmd),
                        None => {
                            debug!("command channel closed, draining in-flight work");
                            cmd_closed = true;
                        }
                    }
                }
            }
        }

        info!("orchestrator actor terminated");
    }

    fn is_idle(&self) -> bool {
        self.connections
            .values()
            .all(|c| !c.is_busy() && c.pending.is_empty())
    }

    fn handle_command(&mut self, cmd: OrchestratorCommand) {
        match cmd {
            OrchestratorCommand::Start {
                name,
                command,
                options,
                resp,
            } => {
                if !self.connections.contains_key(&name) {
                    match &command {
                        Some(cmd_line) => {
                            // First start request for an unknown name creates
                            // the connection ad hoc.
                            info!(process = %name, "registering ad-hoc connection");
                            self.connections.insert(
                                name.clone(),
                                ManagedConnection::new(ConnectionConfig::adhoc(
                                    name.as_str(),
                                    cmd_line.clone(),
                                )),
                            );
                        }
                        None => {
                            let _ = resp.send(Err(OrchestrationError::configuration(
                                name.as_str(),
                                "unknown connection and no command provided",
                            )));
                            return;
                        }
                    }
                }
                self.schedule_op(
                    &name,
                    OpKind::Start { command, options },
                    OpResponder::Start(resp),
                );
            }
            OrchestratorCommand::Stop {
                name,
                force_kill,
                resp,
            } => {
                if !self.connections.contains_key(&name) {
                    // Stopping something never tracked is a benign no-op.
                    debug!(process = %name, "stop for unknown connection is a no-op");
                    let _ = resp.send(Ok(()));
                    return;
                }
                self.schedule_op(&name, OpKind::Stop { force_kill }, OpResponder::Unit(resp));
            }
            OrchestratorCommand::Restart { name, resp } => {
                if !self.connections.contains_key(&name) {
                    let _ = resp.send(Err(OrchestrationError::not_found(name.as_str())));
                    return;
                }
                self.schedule_op(&name, OpKind::Restart, OpResponder::Unit(resp));
            }
            OrchestratorCommand::CheckHealth { name, resp } => {
                if !self.connections.contains_key(&name) {
                    let _ = resp.send(Err(OrchestrationError::not_found(name.as_str())));
                    return;
                }
                self.schedule_op(&name, OpKind::CheckHealth, OpResponder::Health(resp));
            }
        }
    }

    /// Queue or immediately dispatch an operation for a known connection.
    fn schedule_op(&mut self, name: &str, kind: OpKind, resp: OpResponder) {
        let Some(connection) = self.connections.get_mut(name) else {
            resp.fail(OrchestrationError::not_found(name));
            return;
        };

        if connection.pending.len() >= MAX_PENDING_OPS {
            debug!(process = %name, op = kind.name(), "pending queue full");
            resp.fail(OrchestrationError::queue_full(name, MAX_PENDING_OPS));
            return;
        }

        if connection.is_busy() {
            debug!(
                process = %name,
                busy_with = connection.busy.unwrap_or("?"),
                queued = kind.name(),
                "connection busy, queueing operation"
            );
            connection.pending.push_back(OpRequest { kind, resp });
            return;
        }

        self.dispatch_now(name, kind, resp);
    }

    /// Hand an operation to the op runner, taking the supervisor with it.
    fn dispatch_now(&mut self, name: &str, kind: OpKind, resp: OpResponder) {
        let Some(connection) = self.connections.get_mut(name) else {
            resp.fail(OrchestrationError::not_found(name));
            return;
        };

        let Some(supervisor) = connection.supervisor.take() else {
            resp.fail(OrchestrationError::channel_closed(format!(
                "supervisor for '{}' unavailable",
                name
            )));
            return;
        };

        connection.busy = Some(kind.name());
        let job = Job {
            name: name.to_string(),
            kind,
            resp,
            supervisor,
            config: connection.config.clone(),
        };

        match self.op_runner.job_tx.try_send(job) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(job)) => {
                warn!(process = %name, "op runner job queue full");
                connection.supervisor = Some(job.supervisor);
                connection.busy = None;
                job.resp
                    .fail(OrchestrationError::queue_full(name, JOB_QUEUE_CAPACITY));
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                error!(process = %name, "op runner job channel closed");
                connection.supervisor = Some(job.supervisor);
                connection.busy = None;
                job.resp
                    .fail(OrchestrationError::channel_closed("op runner shut down"));
            }
        }
    }

    fn handle_completed(&mut self, completed: OpCompleted) {
        let OpCompleted { name, supervisor } = completed;

        let Some(connection) = self.connections.get_mut(&name) else {
            warn!(process = %name, "completion for unknown connection");
            return;
        };

        connection.busy = None;
        match supervisor {
            Some(supervisor) => connection.supervisor = Some(supervisor),
            None => {
                // Worker panicked; the old supervisor (and its pid tracking)
                // is gone. Install a fresh one and fail what was queued so
                // nothing waits forever.
                error!(process = %name, "supervisor lost, resetting connection state");
                connection.supervisor = Some(ProcessSupervisor::new(name.clone()));
                let drained: Vec<OpRequest> = connection.pending.drain(..).collect();
                for request in drained {
                    request.resp.fail(OrchestrationError::channel_closed(format!(
                        "supervisor state lost for '{}'",
                        name
                    )));
                }
                return;
            }
        }

        // Start the next queued operation, if any.
        if let Some(request) = connection.pending.pop_front() {
            debug!(
                process = %name,
                op = request.kind.name(),
                "starting queued operation"
            );
            self.dispatch_now(&name, request.kind, request.resp);
        }
    }
}
