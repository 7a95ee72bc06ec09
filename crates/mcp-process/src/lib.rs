//! # MCP Process
//!
//! Low-level process operations for the MCP orchestrator:
//! - Liveness probing (`is_alive`)
//! - Detached process spawning with log forwarding
//! - Graceful and forced termination
//! - JSON-RPC over child stdio (used by the stdio handshake probe)
//! - The per-name [`ProcessSupervisor`]
//!
//! Nothing in this crate touches the process registry; the orchestrator
//! persists the outcome of every operation performed here.

pub mod check;
pub mod spawn;
pub mod stdio_rpc;
pub mod supervisor;
pub mod terminate;

pub use check::is_alive;
pub use spawn::{spawn_detached, SpawnedProcess};
pub use stdio_rpc::StdioRpc;
pub use supervisor::{ProcessSupervisor, StopMode};
pub use terminate::{force_kill, terminate_gracefully};
