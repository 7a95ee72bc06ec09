//! # MCP Registry
//!
//! The persisted view of every managed process: [`ProcessRecord`] with its
//! status transition rules, and the [`RecordStore`] the rest of the system
//! treats as the source of truth. Pure data and transition logic; no I/O.

pub mod record;
pub mod store;

pub use record::{HealthSummary, ProcessRecord, ProcessStatus};
pub use store::{MemoryStore, RecordStore};
