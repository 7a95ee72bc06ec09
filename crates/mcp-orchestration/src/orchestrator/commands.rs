//! Commands sent from the [`Orchestrator`](super::Orchestrator) handle to the
//! actor.

use super::types::{Result, StartOptions, StartOutcome};
use mcp_health::HealthCheckReport;
use tokio::sync::oneshot;

pub(crate) enum OrchestratorCommand {
    Start {
        name: String,
        /// Explicit command line; absent means "use the known command".
        command: Option<Vec<String>>,
        options: StartOptions,
        resp: oneshot::Sender<Result<StartOutcome>>,
    },
    Stop {
        name: String,
        force_kill: bool,
        resp: oneshot::Sender<Result<()>>,
    },
    Restart {
        name: String,
        resp: oneshot::Sender<Result<()>>,
    },
    CheckHealth {
        name: String,
        resp: oneshot::Sender<Result<HealthCheckReport>>,
    },
}
