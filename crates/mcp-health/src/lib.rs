//! # MCP Health
//!
//! Layered health evaluation for managed MCP server processes:
//! - `process_alive`: signal-0 liveness (short-circuits everything else)
//! - `handshake`: transport-appropriate JSON-RPC ping with a bounded timeout
//! - `resource_usage`: CPU/memory sampling scored with partial credit
//!
//! A check never fails as a call: faults degrade into an unhealthy
//! [`HealthCheckReport`].

pub mod http;
pub mod monitor;
pub mod resources;
pub mod websocket;

use chrono::{DateTime, Utc};
use mcp_registry::HealthSummary;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub use monitor::{CheckContext, HealthMonitor};
pub use resources::{ResourceMonitor, ResourceUsage};

/// Score contribution of the liveness layer.
pub const ALIVE_WEIGHT: u8 = 40;
/// Score contribution of the handshake layer.
pub const HANDSHAKE_WEIGHT: u8 = 40;
/// Score contribution of the resource layer.
pub const RESOURCE_WEIGHT: u8 = 20;

/// The check layers, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckLayer {
    ProcessAlive,
    Handshake,
    ResourceUsage,
}

impl fmt::Display for CheckLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckLayer::ProcessAlive => write!(f, "process_alive"),
            CheckLayer::Handshake => write!(f, "handshake"),
            CheckLayer::ResourceUsage => write!(f, "resource_usage"),
        }
    }
}

/// Outcome of a single check layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerResult {
    pub layer: CheckLayer,
    pub passed: bool,
    pub detail: String,
}

/// Aggregated result of one health check pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckReport {
    pub process_name: String,
    pub timestamp: DateTime<Utc>,
    /// Weighted aggregate, 0-100.
    pub score: u8,
    pub overall_healthy: bool,
    /// Layer results in execution order; short-circuited layers are absent.
    pub layers: Vec<LayerResult>,
}

impl HealthCheckReport {
    /// Compact summary for caching on the process record.
    pub fn summary(&self) -> HealthSummary {
        HealthSummary {
            score: self.score,
            healthy: self.overall_healthy,
            checked_at: self.timestamp,
        }
    }

    /// Result for one layer, when it ran.
    pub fn layer(&self, layer: CheckLayer) -> Option<&LayerResult> {
        self.layers.iter().find(|l| l.layer == layer)
    }

    /// Detail of the first failing layer, if any.
    pub fn failure_reason(&self) -> Option<String> {
        self.layers
            .iter()
            .find(|l| !l.passed)
            .map(|l| format!("{}: {}", l.layer, l.detail))
    }
}

/// Per-connection health evaluation settings.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthSettings {
    /// Minimum score considered healthy.
    pub healthy_score: u8,
    /// Bound on the handshake probe; must stay below the check interval.
    pub handshake_timeout: Duration,
    /// Memory threshold for the resource layer, when enforced.
    pub memory_limit_mb: Option<u64>,
    /// CPU threshold for the resource layer, when enforced.
    pub cpu_limit_percent: Option<f32>,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            healthy_score: 60,
            handshake_timeout: Duration::from_secs(5),
            memory_limit_mb: None,
            cpu_limit_percent: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report_with(layers: Vec<LayerResult>, score: u8) -> HealthCheckReport {
        HealthCheckReport {
            process_name: "p".to_string(),
            timestamp: Utc::now(),
            score,
            overall_healthy: score >= 60,
            layers,
        }
    }

    #[test]
    fn failure_reason_picks_first_failing_layer() {
        let report = report_with(
            vec![
                LayerResult {
                    layer: CheckLayer::ProcessAlive,
                    passed: true,
                    detail: "pid 12 alive".to_string(),
                },
                LayerResult {
                    layer: CheckLayer::Handshake,
                    passed: false,
                    detail: "ping timed out".to_string(),
                },
            ],
            40,
        );
        assert_eq!(
            report.failure_reason().unwrap(),
            "handshake: ping timed out"
        );
    }

    #[test]
    fn summary_mirrors_score_and_verdict() {
        let report = report_with(vec![], 75);
        let summary = report.summary();
        assert_eq!(summary.score, 75);
        assert!(summary.healthy);
        assert_eq!(summary.checked_at, report.timestamp);
    }

    #[test]
    fn layer_names_are_stable() {
        assert_eq!(CheckLayer::ProcessAlive.to_string(), "process_alive");
        assert_eq!(CheckLayer::Handshake.to_string(), "handshake");
        assert_eq!(CheckLayer::ResourceUsage.to_string(), "resource_usage");
    }
}
