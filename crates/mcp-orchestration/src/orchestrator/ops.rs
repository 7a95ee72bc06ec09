//! Operation runner: executes heavy per-process work off the actor loop.
//!
//! The dispatcher enforces concurrency with a semaphore and tracks worker
//! tasks in a JoinSet. Workers respond to the caller directly and always
//! report completion back to the actor so the supervisor handle is restored
//! and the next queued operation can start. A panicking worker loses the
//! supervisor; the completion then carries `None` and the actor recovers.

use super::types::{OpKind, OpResponder, Result, StartOptions, StartOutcome};
use crate::config::ConnectionConfig;
use crate::events::{EventBus, EventKind, ProcessEvent};
use futures::future::FutureExt;
use mcp_common::OrchestrationError;
use mcp_health::{CheckContext, CheckLayer, HealthCheckReport, HealthMonitor};
use mcp_process::{ProcessSupervisor, StopMode};
use mcp_registry::{ProcessRecord, ProcessStatus, RecordStore};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, warn};

/// Upper bound on any single operation, over and above its internal timeouts.
const OP_TIMEOUT: Duration = Duration::from_secs(60);

/// Capacity of the job submission channel; also surfaced in `QueueFull`
/// errors so the numbers agree.
pub(crate) const JOB_QUEUE_CAPACITY: usize = 64;

/// A unit of heavy work for one process.
pub(crate) struct Job {
    pub name: String,
    pub kind: OpKind,
    pub resp: OpResponder,
    pub supervisor: ProcessSupervisor,
    pub config: ConnectionConfig,
}

/// Completion notice sent back to the actor.
pub(crate) struct OpCompleted {
    pub name: String,
    /// `None` when the worker panicked and the supervisor was lost.
    pub supervisor: Option<ProcessSupervisor>,
}

/// Shared collaborators every worker needs.
struct OpContext {
    store: Arc<dyn RecordStore>,
    events: EventBus,
    monitor: Arc<HealthMonitor>,
}

pub(crate) struct OpRunner {
    pub job_tx: mpsc::Sender<Job>,
}

impl OpRunner {
    pub fn new(
        concurrency: usize,
        completed_tx: mpsc::Sender<OpCompleted>,
        store: Arc<dyn RecordStore>,
        events: EventBus,
        monitor: Arc<HealthMonitor>,
    ) -> Self {
        let (job_tx, job_rx) = mpsc::channel::<Job>(JOB_QUEUE_CAPACITY);
        let ctx = Arc::new(OpContext {
            store,
            events,
            monitor,
        });

        tokio::spawn(Self::dispatcher_loop(
            job_rx,
            Arc::new(Semaphore::new(concurrency)),
            completed_tx,
            ctx,
            concurrency,
        ));

        debug!(concurrency, "op runner started");
        OpRunner { job_tx }
    }

    async fn dispatcher_loop(
        mut job_rx: mpsc::Receiver<Job>,
        semaphore: Arc<Semaphore>,
        completed_tx: mpsc::Sender<OpCompleted>,
        ctx: Arc<OpContext>,
        max_in_flight: usize,
    ) {
        let mut join_set: JoinSet<()> = JoinSet::new();

        while let Some(job) = job_rx.recv().await {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };

            let completed_tx = completed_tx.clone();
            let ctx = Arc::clone(&ctx);

            join_set.spawn(async move {
                let _permit = permit;
                let completed = Self::execute_job(job, &ctx).await;
                if completed_tx.send(completed).await.is_err() {
                    error!("completion channel closed, actor unreachable");
                }
            });

            // Joined-but-unpolled tasks linger in the set; drain them down to
            // the concurrency bound so it cannot grow without limit.
            while join_set.len() > max_in_flight {
                let _ = join_set.join_next().await;
            }
        }

        while join_set.join_next().await.is_some() {}
        debug!("op runner dispatcher finished");
    }

    /// Run one job, converting a panic into a lost-supervisor completion.
    async fn execute_job(job: Job, ctx: &OpContext) -> OpCompleted {
        let name = job.name.clone();

        let result = AssertUnwindSafe(Self::run_job(job, ctx)).catch_unwind().await;
        match result {
            Ok(supervisor) => OpCompleted {
                name,
                supervisor: Some(supervisor),
            },
            Err(panic_info) => {
                let message = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    (*s).to_string()
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic".to_string()
                };
                error!(process = %name, %message, "operation panicked, supervisor lost");
                OpCompleted {
                    name,
                    supervisor: None,
                }
            }
        }
    }

    async fn run_job(mut job: Job, ctx: &OpContext) -> ProcessSupervisor {
        let name = job.name.clone();
        match (job.kind, job.resp) {
            (OpKind::Start { command, options }, OpResponder::Start(tx)) => {
                let fut = run_start(
                    &name,
                    &mut job.supervisor,
                    &job.config,
                    command,
                    options,
                    ctx,
                );
                let result = timeout(OP_TIMEOUT, fut)
                    .await
                    .unwrap_or_else(|_| Err(OrchestrationError::timeout(name.as_str(), "start")));
                let _ = tx.send(result);
            }
            (OpKind::Stop { force_kill }, OpResponder::Unit(tx)) => {
                let fut = run_stop(&name, &mut job.supervisor, &job.config, force_kill, ctx);
                let result = timeout(OP_TIMEOUT, fut)
                    .await
                    .unwrap_or_else(|_| Err(OrchestrationError::timeout(name.as_str(), "stop")));
                let _ = tx.send(result);
            }
            (OpKind::Restart, OpResponder::Unit(tx)) => {
                let fut = run_restart(&name, &mut job.supervisor, &job.config, ctx);
                let result = timeout(OP_TIMEOUT, fut)
                    .await
                    .unwrap_or_else(|_| Err(OrchestrationError::timeout(name.as_str(), "restart")));
                let _ = tx.send(result);
            }
            (OpKind::CheckHealth, OpResponder::Health(tx)) => {
                let fut = run_health_check(&name, &job.supervisor, &job.config, ctx);
                let result = timeout(OP_TIMEOUT, fut)
                    .await
                    .unwrap_or_else(|_| Err(OrchestrationError::timeout(name.as_str(), "check_health")));
                let _ = tx.send(result);
            }
            (kind, resp) => {
                error!(process = %name, op = kind.name(), "mismatched op responder");
                resp.fail(OrchestrationError::channel_closed(format!(
                    "mismatched responder for {}",
                    kind.name()
                )));
            }
        }
        job.supervisor
    }
}

/// Start: admission check against the record, then `Starting -> spawn ->
/// Running|Error`, persisting each transition.
async fn run_start(
    name: &str,
    supervisor: &mut ProcessSupervisor,
    config: &ConnectionConfig,
    command_override: Option<Vec<String>>,
    options: StartOptions,
    ctx: &OpContext,
) -> Result<StartOutcome> {
    let mut record = match ctx.store.get(name) {
        Some(record) => record,
        None => ProcessRecord::new(
            name,
            command_override.clone().unwrap_or_default(),
            config.health.interval,
        ),
    };

    match record.status {
        ProcessStatus::Running | ProcessStatus::Starting => {
            let pid = record.pid.unwrap_or_default();
            if options.idempotent {
                debug!(process = %name, pid, "already running, idempotent start");
                return Ok(StartOutcome::AlreadyRunning { pid });
            }
            return Err(OrchestrationError::already_running(name, pid));
        }
        _ => {}
    }

    if let Some(command) = command_override {
        record.command = command;
    }
    if record.command.is_empty() {
        return Err(OrchestrationError::configuration(name, "no command known"));
    }

    record.mark_starting()?;
    ctx.store.put(record.clone());

    match supervisor.start(&record.command, config.transport.is_stdio()) {
        Ok(pid) => {
            record.mark_running(pid)?;
            ctx.store.put(record);
            info!(process = %name, pid, "process started");
            ctx.events
                .emit(ProcessEvent::new(EventKind::ProcessStarted, name).with("pid", pid));
            Ok(StartOutcome::Started { pid })
        }
        Err(e) => {
            record.mark_error(e.to_string())?;
            ctx.store.put(record);
            warn!(process = %name, error = %e, "process start failed");
            ctx.events
                .emit(ProcessEvent::new(EventKind::ProcessError, name).with("error", &e));
            Err(e)
        }
    }
}

/// Stop: missing, stopped, and errored records hold no PID and succeed as
/// no-ops; otherwise `Stopping -> Stopped|Error` with the configured
/// graceful/forced policy.
async fn run_stop(
    name: &str,
    supervisor: &mut ProcessSupervisor,
    config: &ConnectionConfig,
    force_kill: bool,
    ctx: &OpContext,
) -> Result<()> {
    let Some(mut record) = ctx.store.get(name) else {
        debug!(process = %name, "stop for unknown record is a no-op");
        return Ok(());
    };

    if matches!(record.status, ProcessStatus::Stopped | ProcessStatus::Error) {
        // Still ask the supervisor to clean up a stray child it may track.
        supervisor
            .stop(config.graceful_timeout, StopMode::Force)
            .await?;
        debug!(process = %name, status = %record.status, "stop is a no-op");
        return Ok(());
    }

    record.mark_stopping()?;
    ctx.store.put(record.clone());

    let mode = if force_kill {
        StopMode::Force
    } else {
        StopMode::Graceful
    };

    match supervisor.stop(config.graceful_timeout, mode).await {
        Ok(()) => {
            record.mark_stopped()?;
            ctx.store.put(record);
            info!(process = %name, forced = force_kill, "process stopped");
            ctx.events.emit(
                ProcessEvent::new(EventKind::ProcessStopped, name).with("forced", force_kill),
            );
            Ok(())
        }
        Err(e) => {
            record.mark_error(e.to_string())?;
            ctx.store.put(record);
            warn!(process = %name, error = %e, "process stop failed");
            ctx.events
                .emit(ProcessEvent::new(EventKind::ProcessError, name).with("error", &e));
            Err(e)
        }
    }
}

/// Restart: stop-then-start with the record's known command; failures
/// propagate from whichever step failed.
async fn run_restart(
    name: &str,
    supervisor: &mut ProcessSupervisor,
    config: &ConnectionConfig,
    ctx: &OpContext,
) -> Result<()> {
    run_stop(name, supervisor, config, false, ctx).await?;
    run_start(name, supervisor, config, None, StartOptions::default(), ctx).await?;

    if let Some(mut record) = ctx.store.get(name) {
        record.restart_count += 1;
        ctx.store.put(record);
    }
    Ok(())
}

/// Health check: run the layered check, persist timestamp + summary, emit
/// events, and transition a crashed process to `Error`.
async fn run_health_check(
    name: &str,
    supervisor: &ProcessSupervisor,
    config: &ConnectionConfig,
    ctx: &OpContext,
) -> Result<HealthCheckReport> {
    let Some(mut record) = ctx.store.get(name) else {
        return Err(OrchestrationError::not_found(name));
    };

    let settings = config.health.settings();
    let check_ctx = CheckContext {
        transport: &config.transport,
        auth: config.auth.as_ref(),
        stdio: supervisor.stdio(),
        settings: &settings,
    };

    let report = ctx.monitor.perform_check(&record, &check_ctx).await;
    let was_running = record.status == ProcessStatus::Running;
    record.record_health(report.summary());

    // Degradation only matters for a process that is supposed to be up; an
    // explicit check against a stopped record is informational.
    if !report.overall_healthy && was_running {
        let reason = report
            .failure_reason()
            .unwrap_or_else(|| format!("health score {} below threshold", report.score));

        let process_dead = report
            .layer(CheckLayer::ProcessAlive)
            .map(|l| !l.passed)
            .unwrap_or(false);

        if process_dead {
            record.mark_error(reason.clone())?;
        } else {
            record.last_error = Some(reason.clone());
        }

        warn!(process = %name, score = report.score, %reason, "health check unhealthy");
        ctx.events.emit(
            ProcessEvent::new(EventKind::ProcessError, name)
                .with("error", &reason)
                .with("score", report.score),
        );
    }

    ctx.store.put(record);
    ctx.events.emit(
        ProcessEvent::new(EventKind::HealthCheckCompleted, name)
            .with("score", report.score)
            .with("healthy", report.overall_healthy),
    );

    Ok(report)
}
