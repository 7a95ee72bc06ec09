//! Retryable background execution of orchestration commands.
//!
//! The queue is broker-agnostic: it dispatches through the [`CommandExecutor`]
//! trait and applies an explicit [`RetryPolicy`], so the retry behavior is
//! independent of both the orchestrator and any particular backing queue.
//! Once picked up, a command runs to terminal success or failure; there is no
//! external cancellation.

use crate::events::{EventBus, EventKind, ProcessEvent};
use crate::orchestrator::StartOptions;
use async_trait::async_trait;
use mcp_common::{OrchestrationError, OrchestrationResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

/// Queue admission depth; enqueue fails with `QueueFull` beyond it.
const TASK_QUEUE_CAPACITY: usize = 256;

/// What a queued command asks the orchestrator to do.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandKind {
    Start {
        command: Option<Vec<String>>,
        options: StartOptions,
    },
    Stop {
        force_kill: bool,
    },
    HealthCheck,
}

impl CommandKind {
    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::Start { .. } => "start",
            CommandKind::Stop { .. } => "stop",
            CommandKind::HealthCheck => "health_check",
        }
    }
}

/// A queued orchestration command targeting one named process.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestrationCommand {
    pub process_name: String,
    pub kind: CommandKind,
}

impl OrchestrationCommand {
    pub fn start(name: impl Into<String>, command: Option<Vec<String>>) -> Self {
        Self {
            process_name: name.into(),
            kind: CommandKind::Start {
                command,
                options: StartOptions::default(),
            },
        }
    }

    pub fn start_idempotent(name: impl Into<String>) -> Self {
        Self {
            process_name: name.into(),
            kind: CommandKind::Start {
                command: None,
                options: StartOptions::idempotent(),
            },
        }
    }

    pub fn stop(name: impl Into<String>, force_kill: bool) -> Self {
        Self {
            process_name: name.into(),
            kind: CommandKind::Stop { force_kill },
        }
    }

    pub fn health_check(name: impl Into<String>) -> Self {
        Self {
            process_name: name.into(),
            kind: CommandKind::HealthCheck,
        }
    }
}

/// Executes one command attempt. Implemented by the orchestrator handle;
/// tests substitute scripted executors.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, command: &OrchestrationCommand) -> OrchestrationResult<()>;
}

/// Attempt count and backoff schedule for queued commands.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before retry N is `backoff[N-1]`; the last entry repeats when
    /// attempts outnumber the schedule.
    pub backoff: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: vec![
                Duration::from_secs(30),
                Duration::from_secs(60),
                Duration::from_secs(120),
            ],
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let index = (attempt.saturating_sub(1) as usize).min(self.backoff.len().saturating_sub(1));
        self.backoff.get(index).copied().unwrap_or_default()
    }
}

/// Terminal result of a queued command.
#[derive(Debug)]
pub enum TaskOutcome {
    Completed {
        attempts: u32,
    },
    Failed {
        attempts: u32,
        error: OrchestrationError,
    },
}

/// Handle returned by `enqueue`; the command keeps running whether or not the
/// handle is awaited.
pub struct TaskHandle {
    pub id: u64,
    rx: oneshot::Receiver<TaskOutcome>,
}

impl TaskHandle {
    /// Await the terminal outcome.
    pub async fn outcome(self) -> OrchestrationResult<TaskOutcome> {
        self.rx
            .await
            .map_err(|_| OrchestrationError::channel_closed("task worker dropped outcome"))
    }
}

struct QueuedTask {
    id: u64,
    command: OrchestrationCommand,
    done: oneshot::Sender<TaskOutcome>,
}

/// Cloneable producer half of the task queue.
#[derive(Clone)]
pub struct TaskQueue {
    task_tx: mpsc::Sender<QueuedTask>,
    next_id: Arc<AtomicU64>,
}

impl TaskQueue {
    /// Spawn the worker pool and return the queue handle.
    pub fn start(
        executor: Arc<dyn CommandExecutor>,
        policy: RetryPolicy,
        workers: usize,
        events: EventBus,
    ) -> Self {
        let (task_tx, task_rx) = mpsc::channel::<QueuedTask>(TASK_QUEUE_CAPACITY);

        tokio::spawn(Self::dispatcher_loop(
            task_rx,
            Arc::new(Semaphore::new(workers.max(1))),
            executor,
            policy,
            events,
            workers.max(1),
        ));

        debug!(workers, "task queue started");
        Self {
            task_tx,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Admit a command for asynchronous execution; returns immediately.
    pub fn enqueue(&self, command: OrchestrationCommand) -> OrchestrationResult<TaskHandle> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (done, rx) = oneshot::channel();
        let task = QueuedTask { id, command, done };

        match self.task_tx.try_send(task) {
            Ok(()) => Ok(TaskHandle { id, rx }),
            Err(mpsc::error::TrySendError::Full(task)) => Err(OrchestrationError::queue_full(
                task.command.process_name,
                TASK_QUEUE_CAPACITY,
            )),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(OrchestrationError::channel_closed("task queue shut down"))
            }
        }
    }

    async fn dispatcher_loop(
        mut task_rx: mpsc::Receiver<QueuedTask>,
        semaphore: Arc<Semaphore>,
        executor: Arc<dyn CommandExecutor>,
        policy: RetryPolicy,
        events: EventBus,
        max_in_flight: usize,
    ) {
        let mut join_set: JoinSet<()> = JoinSet::new();

        while let Some(task) = task_rx.recv().await {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };

            let executor = Arc::clone(&executor);
            let policy = policy.clone();
            let events = events.clone();

            join_set.spawn(async move {
                let _permit = permit;
                Self::run_task(task, executor.as_ref(), &policy, &events).await;
            });

            while join_set.len() > max_in_flight {
                let _ = join_set.join_next().await;
            }
        }

        while join_set.join_next().await.is_some() {}
        debug!("task queue dispatcher finished");
    }

    /// Attempt loop for one command.
    async fn run_task(
        task: QueuedTask,
        executor: &dyn CommandExecutor,
        policy: &RetryPolicy,
        events: &EventBus,
    ) {
        let QueuedTask { id, command, done } = task;
        let name = command.process_name.clone();
        let op = command.kind.name();

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match executor.execute(&command).await {
                Ok(()) => {
                    debug!(task = id, process = %name, op, attempt, "task completed");
                    let _ = done.send(TaskOutcome::Completed { attempts: attempt });
                    return;
                }
                Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                    let delay = policy.delay_after(attempt);
                    warn!(
                        task = id,
                        process = %name,
                        op,
                        attempt,
                        max_attempts = policy.max_attempts,
                        error = %e,
                        retry_in = ?delay,
                        "task attempt failed, will retry"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    let error = if e.is_transient() {
                        // Retries exhausted on a transient failure.
                        OrchestrationError::task_exhausted(name.as_str(), attempt, e.to_string())
                    } else {
                        // Permanent failure short-circuits remaining attempts.
                        e
                    };
                    error!(
                        task = id,
                        process = %name,
                        op,
                        attempts = attempt,
                        error = %error,
                        "task terminally failed"
                    );
                    events.emit(
                        ProcessEvent::new(EventKind::TaskFailed, name.as_str())
                            .with("op", op)
                            .with("attempts", attempt)
                            .with("error", &error),
                    );
                    let _ = done.send(TaskOutcome::Failed {
                        attempts: attempt,
                        error,
                    });
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Instant;

    /// Executor that fails a scripted number of times before succeeding.
    struct FlakyExecutor {
        failures: u32,
        calls: AtomicU32,
        error: fn() -> OrchestrationError,
    }

    impl FlakyExecutor {
        fn new(failures: u32, error: fn() -> OrchestrationError) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
                error,
            }
        }
    }

    #[async_trait]
    impl CommandExecutor for FlakyExecutor {
        async fn execute(&self, _command: &OrchestrationCommand) -> OrchestrationResult<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err((self.error)())
            } else {
                Ok(())
            }
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff: vec![Duration::from_millis(30), Duration::from_millis(60)],
        }
    }

    #[tokio::test]
    async fn succeeds_on_third_attempt_with_two_retries() {
        let executor = Arc::new(FlakyExecutor::new(2, || {
            OrchestrationError::spawn_failed("svc", "transient")
        }));
        let queue = TaskQueue::start(executor, fast_policy(), 2, EventBus::new());

        let started = Instant::now();
        let handle = queue
            .enqueue(OrchestrationCommand::health_check("svc"))
            .unwrap();

        match handle.outcome().await.unwrap() {
            TaskOutcome::Completed { attempts } => assert_eq!(attempts, 3),
            other => panic!("expected completion, got {:?}", other),
        }

        // Two retries: 30ms + 60ms of backoff, within scheduler slack.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(90), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(5), "elapsed {:?}", elapsed);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_with_task_exhausted() {
        let executor = Arc::new(FlakyExecutor::new(u32::MAX, || {
            OrchestrationError::spawn_failed("svc", "still broken")
        }));
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let queue = TaskQueue::start(executor, fast_policy(), 2, events.clone());

        let handle = queue
            .enqueue(OrchestrationCommand::start("svc", None))
            .unwrap();

        match handle.outcome().await.unwrap() {
            TaskOutcome::Failed { attempts, error } => {
                assert_eq!(attempts, 3);
                assert!(matches!(error, OrchestrationError::TaskExhausted { .. }));
            }
            other => panic!("expected failure, got {:?}", other),
        }

        // The terminal failure is announced, not silently dropped.
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::TaskFailed);
        assert_eq!(event.process_name, "svc");
        assert_eq!(event.payload.get("attempts").unwrap(), "3");
    }

    #[tokio::test]
    async fn permanent_errors_short_circuit_retries() {
        let executor = Arc::new(FlakyExecutor::new(u32::MAX, || {
            OrchestrationError::already_running("svc", 42)
        }));
        let queue = TaskQueue::start(executor, fast_policy(), 2, EventBus::new());

        let handle = queue
            .enqueue(OrchestrationCommand::start("svc", None))
            .unwrap();

        // A single attempt proves no backoff was taken.
        match handle.outcome().await.unwrap() {
            TaskOutcome::Failed { attempts, error } => {
                assert_eq!(attempts, 1);
                assert!(matches!(error, OrchestrationError::AlreadyRunning { .. }));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn distinct_names_run_concurrently() {
        struct SlowExecutor;

        #[async_trait]
        impl CommandExecutor for SlowExecutor {
            async fn execute(&self, _command: &OrchestrationCommand) -> OrchestrationResult<()> {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(())
            }
        }

        let queue = TaskQueue::start(
            Arc::new(SlowExecutor),
            RetryPolicy::default(),
            4,
            EventBus::new(),
        );

        let started = Instant::now();
        let handles: Vec<TaskHandle> = (0..4)
            .map(|i| {
                queue
                    .enqueue(OrchestrationCommand::health_check(format!("svc-{}", i)))
                    .unwrap()
            })
            .collect();
        for handle in handles {
            assert!(matches!(
                handle.outcome().await.unwrap(),
                TaskOutcome::Completed { .. }
            ));
        }

        // Four 100ms tasks across four workers take ~100ms, not ~400ms.
        assert!(started.elapsed() < Duration::from_millis(350));
    }

    #[test]
    fn delay_schedule_repeats_last_entry() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(30));
        assert_eq!(policy.delay_after(2), Duration::from_secs(60));
        assert_eq!(policy.delay_after(3), Duration::from_secs(120));
        assert_eq!(policy.delay_after(9), Duration::from_secs(120));
    }
}
