//! Background schedulers: periodic health checks and crash restarts.

use crate::config::{ConnectionConfig, RestartConfig, UnhealthyAction};
use crate::events::{EventBus, EventKind};
use crate::queue::{OrchestrationCommand, TaskQueue};
use mcp_registry::{ProcessStatus, RecordStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Periodically enqueue health checks for every running record.
///
/// The tick can be much shorter than any record's check interval: the queued
/// command consults the interval gate before probing, so extra ticks are
/// cheap no-ops.
pub fn spawn_health_scheduler(
    queue: TaskQueue,
    store: Arc<dyn RecordStore>,
    tick: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            for record in store.list() {
                if record.status != ProcessStatus::Running {
                    continue;
                }
                if let Err(e) =
                    queue.enqueue(OrchestrationCommand::health_check(record.name.as_str()))
                {
                    debug!(process = %record.name, error = %e, "could not enqueue health check");
                }
            }
        }
    })
}

struct RestartPolicyState {
    action: UnhealthyAction,
    restart: RestartConfig,
    attempts: u32,
}

/// Watch the event bus and enqueue restarts for crashed or unhealthy
/// connections that opted into `on_unhealthy: restart`.
///
/// Each connection has a restart budget with exponential backoff; a
/// successful start resets it.
pub fn spawn_crash_restarter(
    queue: TaskQueue,
    events: EventBus,
    connections: &[ConnectionConfig],
) -> JoinHandle<()> {
    let mut policies: HashMap<String, RestartPolicyState> = connections
        .iter()
        .map(|c| {
            (
                c.name.clone(),
                RestartPolicyState {
                    action: c.on_unhealthy,
                    restart: c.restart.clone(),
                    attempts: 0,
                },
            )
        })
        .collect();
    let mut rx = events.subscribe();

    tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "crash restarter lagged behind the event bus");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            let Some(state) = policies.get_mut(&event.process_name) else {
                continue;
            };

            match event.kind {
                EventKind::ProcessStarted => {
                    state.attempts = 0;
                }
                EventKind::ProcessError => {
                    if state.action != UnhealthyAction::Restart {
                        continue;
                    }
                    if state.attempts >= state.restart.max_restarts {
                        warn!(
                            process = %event.process_name,
                            attempts = state.attempts,
                            "restart budget exhausted, leaving process down"
                        );
                        continue;
                    }
                    state.attempts += 1;
                    let delay = state.restart.delay_for_attempt(state.attempts);
                    info!(
                        process = %event.process_name,
                        attempt = state.attempts,
                        max = state.restart.max_restarts,
                        delay = ?delay,
                        "scheduling automatic restart"
                    );

                    let queue = queue.clone();
                    let name = event.process_name.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        if let Err(e) =
                            queue.enqueue(OrchestrationCommand::start_idempotent(name.as_str()))
                        {
                            warn!(process = %name, error = %e, "could not enqueue restart");
                        }
                    });
                }
                _ => {}
            }
        }
        debug!("crash restarter finished");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ProcessEvent;
    use crate::queue::{CommandExecutor, CommandKind, RetryPolicy};
    use async_trait::async_trait;
    use mcp_common::OrchestrationResult;
    use mcp_registry::{MemoryStore, ProcessRecord};
    use std::sync::Mutex;

    /// Records every command it executes.
    #[derive(Default)]
    struct RecordingExecutor {
        seen: Mutex<Vec<OrchestrationCommand>>,
    }

    #[async_trait]
    impl CommandExecutor for RecordingExecutor {
        async fn execute(&self, command: &OrchestrationCommand) -> OrchestrationResult<()> {
            self.seen.lock().unwrap().push(command.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn health_scheduler_targets_running_records_only() {
        let store = Arc::new(MemoryStore::new());

        let mut running = ProcessRecord::new(
            "up",
            vec!["/bin/true".to_string()],
            Duration::from_secs(60),
        );
        running.mark_starting().unwrap();
        running.mark_running(123).unwrap();
        store.put(running);
        store.put(ProcessRecord::new(
            "down",
            vec!["/bin/true".to_string()],
            Duration::from_secs(60),
        ));

        let executor = Arc::new(RecordingExecutor::default());
        let queue = TaskQueue::start(
            Arc::clone(&executor) as Arc<dyn CommandExecutor>,
            RetryPolicy::default(),
            2,
            EventBus::new(),
        );

        let handle = spawn_health_scheduler(
            queue,
            store as Arc<dyn RecordStore>,
            Duration::from_millis(10),
        );
        tokio::time::sleep(Duration::from_millis(80)).await;
        handle.abort();

        let seen = executor.seen.lock().unwrap();
        assert!(!seen.is_empty());
        assert!(seen
            .iter()
            .all(|c| c.kind == CommandKind::HealthCheck && c.process_name == "up"));
    }

    #[tokio::test]
    async fn crash_restarter_enqueues_start_after_error() {
        let executor = Arc::new(RecordingExecutor::default());
        let events = EventBus::new();
        let queue = TaskQueue::start(
            Arc::clone(&executor) as Arc<dyn CommandExecutor>,
            RetryPolicy::default(),
            2,
            events.clone(),
        );

        let connection = ConnectionConfig {
            restart: RestartConfig {
                max_restarts: 2,
                delay: Duration::from_millis(10),
                backoff_rate: 1.0,
            },
            ..ConnectionConfig::adhoc("svc", vec!["/bin/true".to_string()])
        };
        // adhoc defaults to Ignore; this test wants restarts.
        let connection = ConnectionConfig {
            on_unhealthy: UnhealthyAction::Restart,
            ..connection
        };

        let handle = spawn_crash_restarter(queue, events.clone(), &[connection]);
        events.emit(ProcessEvent::new(EventKind::ProcessError, "svc").with("error", "crashed"));

        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.abort();

        let seen = executor.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].process_name, "svc");
        assert!(matches!(seen[0].kind, CommandKind::Start { options, .. } if options.idempotent));
    }

    #[tokio::test]
    async fn crash_restarter_respects_ignore_policy() {
        let executor = Arc::new(RecordingExecutor::default());
        let events = EventBus::new();
        let queue = TaskQueue::start(
            Arc::clone(&executor) as Arc<dyn CommandExecutor>,
            RetryPolicy::default(),
            2,
            events.clone(),
        );

        let connection = ConnectionConfig::adhoc("svc", vec!["/bin/true".to_string()]);
        assert_eq!(connection.on_unhealthy, UnhealthyAction::Ignore);

        let handle = spawn_crash_restarter(queue, events.clone(), &[connection]);
        events.emit(ProcessEvent::new(EventKind::ProcessError, "svc"));

        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        assert!(executor.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn crash_restarter_exhausts_its_budget() {
        let executor = Arc::new(RecordingExecutor::default());
        let events = EventBus::new();
        let queue = TaskQueue::start(
            Arc::clone(&executor) as Arc<dyn CommandExecutor>,
            RetryPolicy::default(),
            2,
            events.clone(),
        );

        let connection = ConnectionConfig {
            on_unhealthy: UnhealthyAction::Restart,
            restart: RestartConfig {
                max_restarts: 1,
                delay: Duration::from_millis(5),
                backoff_rate: 1.0,
            },
            ..ConnectionConfig::adhoc("svc", vec!["/bin/true".to_string()])
        };

        let handle = spawn_crash_restarter(queue, events.clone(), &[connection]);
        events.emit(ProcessEvent::new(EventKind::ProcessError, "svc"));
        events.emit(ProcessEvent::new(EventKind::ProcessError, "svc"));
        events.emit(ProcessEvent::new(EventKind::ProcessError, "svc"));

        tokio::time::sleep(Duration::from_millis(150)).await;
        handle.abort();

        // Only the first error fit in the budget.
        assert_eq!(executor.seen.lock().unwrap().len(), 1);
    }
}
