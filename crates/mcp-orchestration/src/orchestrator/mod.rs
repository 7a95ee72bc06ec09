//! Orchestrator - actor-based coordination of supervisors, registry, and
//! health monitoring.
//!
//! Layout:
//! - A single actor owns all connection state and serializes operations per
//!   process name; commands reach it over a channel.
//! - Heavy work (spawning, graceful stops, handshake probes) runs on the
//!   op runner's worker pool, so operations on distinct names overlap.
//! - The cloneable [`Orchestrator`] handle is the public API; it is built by
//!   the host's composition root and passed around explicitly.
//!
//! Persisted status transitions always happen inside the per-name critical
//! section, so a reader of the store never observes an interleaved partial
//! transition for one name.

mod actor;
mod commands;
mod handle;
mod ops;
mod types;


pub use handle::Orchestrator;
pub use types::{StartOptions, StartOutcome};

use crate::config::ConnectionConfig;
use crate::events::EventBus;
use actor::OrchestratorActor;
use commands::OrchestratorCommand;
use mcp_health::HealthMonitor;
use mcp_registry::RecordStore;
use ops::{OpCompleted, OpRunner};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

/// Command channel depth between handles and the actor.
const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// Completion channel depth between the op runner and the actor.
const COMPLETION_CHANNEL_CAPACITY: usize = 256;

/// Concurrent heavy operations across all connections.
const OP_RUNNER_CONCURRENCY: usize = 8;

impl Orchestrator {
    /// Build the orchestrator and spawn its actor.
    ///
    /// Records for the given connections are seeded into the store as
    /// `Stopped` so status queries and health scheduling can see them before
    /// the first start.
    pub fn new(
        store: Arc<dyn RecordStore>,
        events: EventBus,
        connections: Vec<ConnectionConfig>,
    ) -> Self {
        info!(connections = connections.len(), "creating orchestrator");

        for config in &connections {
            if store.get(&config.name).is_none() {
                store.put(types::seed_record(config));
            }
        }

        let monitor = Arc::new(HealthMonitor::new());
        let (completed_tx, completed_rx) = mpsc::channel::<OpCompleted>(COMPLETION_CHANNEL_CAPACITY);
        let op_runner = OpRunner::new(
            OP_RUNNER_CONCURRENCY,
            completed_tx,
            Arc::clone(&store),
            events,
            monitor,
        );

        let (cmd_tx, cmd_rx) = mpsc::channel::<OrchestratorCommand>(COMMAND_CHANNEL_CAPACITY);
        let actor = OrchestratorActor::new(connections, op_runner);
        tokio::spawn(actor.run(cmd_rx, completed_rx));

        Orchestrator { cmd_tx, store }
    }
}
