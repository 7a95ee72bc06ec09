//! Status-change and health events.
//!
//! Events carry a flat string payload so external broadcasters can forward
//! them without knowing internal types. Emission never blocks orchestration:
//! the bus is a broadcast channel and slow subscribers lose old events rather
//! than applying backpressure.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tokio::sync::broadcast;
use tracing::debug;

const DEFAULT_BUS_CAPACITY: usize = 256;

/// Kinds of events the core emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ProcessStarted,
    ProcessStopped,
    ProcessError,
    HealthCheckCompleted,
    TaskFailed,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::ProcessStarted => write!(f, "process_started"),
            EventKind::ProcessStopped => write!(f, "process_stopped"),
            EventKind::ProcessError => write!(f, "process_error"),
            EventKind::HealthCheckCompleted => write!(f, "health_check_completed"),
            EventKind::TaskFailed => write!(f, "task_failed"),
        }
    }
}

/// One emitted event.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessEvent {
    pub kind: EventKind,
    pub process_name: String,
    pub timestamp: DateTime<Utc>,
    pub payload: BTreeMap<String, String>,
}

impl ProcessEvent {
    pub fn new(kind: EventKind, process_name: impl Into<String>) -> Self {
        Self {
            kind,
            process_name: process_name.into(),
            timestamp: Utc::now(),
            payload: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.payload.insert(key.into(), value.to_string());
        self
    }
}

/// Cloneable handle to the event broadcast channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ProcessEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProcessEvent> {
        self.tx.subscribe()
    }

    /// Emit an event. Having no subscribers is not an error.
    pub fn emit(&self, event: ProcessEvent) {
        debug!(
            kind = %event.kind,
            process = %event.process_name,
            payload = ?event.payload,
            "event emitted"
        );
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(ProcessEvent::new(EventKind::ProcessStarted, "a").with("pid", 42));
        bus.emit(ProcessEvent::new(EventKind::ProcessStopped, "a"));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.kind, EventKind::ProcessStarted);
        assert_eq!(first.payload.get("pid").unwrap(), "42");

        let second = rx.recv().await.unwrap();
        assert_eq!(second.kind, EventKind::ProcessStopped);
    }

    #[test]
    fn emitting_without_subscribers_does_not_fail() {
        let bus = EventBus::new();
        bus.emit(ProcessEvent::new(EventKind::ProcessError, "lonely"));
    }
}
