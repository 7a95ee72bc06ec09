//! # MCP Common
//!
//! Shared foundations for the MCP process orchestrator:
//! - The [`OrchestrationError`] taxonomy used across all crates
//! - Transport and auth descriptors shared by configuration and health probes

pub mod errors;
pub mod types;

pub use errors::{OrchestrationError, OrchestrationResult};
pub use types::{AuthConfig, Transport};
