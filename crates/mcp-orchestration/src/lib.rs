//! # MCP Orchestration
//!
//! The coordination layer of the MCP process orchestrator:
//! - [`Orchestrator`]: the single entry point for start/stop/restart/health
//!   operations, serialized per process name
//! - [`TaskQueue`]: broker-agnostic background command execution with an
//!   explicit retry policy
//! - [`EventBus`]: broadcast of status-change and health events
//! - Typed YAML configuration with validation
//! - Background schedulers (periodic health checks, crash restarts)

pub mod config;
pub mod events;
pub mod orchestrator;
pub mod queue;
pub mod scheduler;

pub use config::{ConnectionConfig, OrchestratorConfig, RestartConfig, UnhealthyAction};
pub use events::{EventBus, EventKind, ProcessEvent};
pub use orchestrator::{Orchestrator, StartOptions, StartOutcome};
pub use queue::{
    CommandExecutor, CommandKind, OrchestrationCommand, RetryPolicy, TaskHandle, TaskOutcome,
    TaskQueue,
};
