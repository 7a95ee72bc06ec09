//! Layered health evaluation.

use crate::resources::{ResourceMonitor, ResourceUsage};
use crate::{
    CheckLayer, HealthCheckReport, HealthSettings, LayerResult, ALIVE_WEIGHT, HANDSHAKE_WEIGHT,
    RESOURCE_WEIGHT,
};
use chrono::{DateTime, Utc};
use mcp_common::{AuthConfig, Transport};
use mcp_process::StdioRpc;
use mcp_registry::{ProcessRecord, ProcessStatus};
use tracing::debug;

/// Everything the handshake layer needs to reach one process.
pub struct CheckContext<'a> {
    pub transport: &'a Transport,
    pub auth: Option<&'a AuthConfig>,
    /// The retained stdio endpoint, for stdio-transport processes.
    pub stdio: Option<&'a StdioRpc>,
    pub settings: &'a HealthSettings,
}

/// Runs layered checks against running processes.
pub struct HealthMonitor {
    resources: ResourceMonitor,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self {
            resources: ResourceMonitor::new(),
        }
    }

    /// Whether a check is due for this record at `now`.
    ///
    /// Pure and cheap: callers use it to gate the expensive probes, so
    /// coincident triggers collapse into one check per interval.
    pub fn needs_check(record: &ProcessRecord, now: DateTime<Utc>) -> bool {
        if record.status != ProcessStatus::Running {
            return false;
        }
        match record.last_health_check_at {
            None => true,
            Some(last) => match (now - last).to_std() {
                Ok(elapsed) => elapsed >= record.health_check_interval,
                // `now` earlier than the last check (clock skew): not due.
                Err(_) => false,
            },
        }
    }

    /// Evaluate all layers for `record`.
    ///
    /// Always returns a report. A dead (or untracked) process short-circuits
    /// after the liveness layer with score 0; probe faults become layer
    /// failures rather than propagating.
    pub async fn perform_check(
        &self,
        record: &ProcessRecord,
        ctx: &CheckContext<'_>,
    ) -> HealthCheckReport {
        let mut layers = Vec::with_capacity(3);

        let pid = record.pid;
        let alive = match pid {
            Some(pid) => mcp_process::is_alive(pid),
            None => false,
        };
        layers.push(LayerResult {
            layer: CheckLayer::ProcessAlive,
            passed: alive,
            detail: match pid {
                Some(pid) if alive => format!("pid {} alive", pid),
                Some(pid) => format!("pid {} not running", pid),
                None => "no tracked pid".to_string(),
            },
        });

        if !alive {
            debug!(process = %record.name, "process dead, short-circuiting health check");
            return self.finish(record, layers, 0, ctx.settings);
        }
        let pid = pid.unwrap_or_default();
        let mut score = ALIVE_WEIGHT;

        let handshake = self.handshake_layer(ctx).await;
        if handshake.passed {
            score += HANDSHAKE_WEIGHT;
        }
        layers.push(handshake);

        let (credit, resource) = self.resource_layer(pid, ctx.settings);
        score += credit;
        layers.push(resource);

        self.finish(record, layers, score, ctx.settings)
    }

    fn finish(
        &self,
        record: &ProcessRecord,
        layers: Vec<LayerResult>,
        score: u8,
        settings: &HealthSettings,
    ) -> HealthCheckReport {
        HealthCheckReport {
            process_name: record.name.clone(),
            timestamp: Utc::now(),
            score,
            overall_healthy: score >= settings.healthy_score,
            layers,
        }
    }

    async fn handshake_layer(&self, ctx: &CheckContext<'_>) -> LayerResult {
        let timeout = ctx.settings.handshake_timeout;
        let outcome = match ctx.transport {
            Transport::Stdio => match ctx.stdio {
                Some(rpc) => rpc
                    .ping(timeout)
                    .await
                    .map(|_| "stdio ping answered".to_string())
                    .map_err(|e| e.to_string()),
                None => Err("stdio endpoint unavailable".to_string()),
            },
            Transport::Http { endpoint } => crate::http::probe_http(endpoint, ctx.auth, timeout).await,
            Transport::Websocket { endpoint } => {
                crate::websocket::probe_websocket(endpoint, timeout).await
            }
        };

        match outcome {
            Ok(detail) => LayerResult {
                layer: CheckLayer::Handshake,
                passed: true,
                detail,
            },
            Err(detail) => LayerResult {
                layer: CheckLayer::Handshake,
                passed: false,
                detail,
            },
        }
    }

    /// Resource layer with partial credit: each configured limit that holds
    /// earns its share of the weight. No configured limits, or a process we
    /// cannot sample, passes by default; absence of evidence is not a
    /// violation.
    fn resource_layer(&self, pid: u32, settings: &HealthSettings) -> (u8, LayerResult) {
        let usage = self.resources.sample(pid);
        let (credit, passed, detail) = resource_credit(usage, settings);
        (
            credit,
            LayerResult {
                layer: CheckLayer::ResourceUsage,
                passed,
                detail,
            },
        )
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

fn resource_credit(
    usage: Option<ResourceUsage>,
    settings: &HealthSettings,
) -> (u8, bool, String) {
    let Some(usage) = usage else {
        return (
            RESOURCE_WEIGHT,
            true,
            "sample unavailable, not counted against".to_string(),
        );
    };

    let mut checks = 0u8;
    let mut violations: Vec<String> = Vec::new();

    if let Some(limit) = settings.memory_limit_mb {
        checks += 1;
        if usage.memory_mb > limit {
            violations.push(format!("memory {}MB > limit {}MB", usage.memory_mb, limit));
        }
    }
    if let Some(limit) = settings.cpu_limit_percent {
        checks += 1;
        if usage.cpu_percent > limit {
            violations.push(format!(
                "cpu {:.1}% > limit {:.1}%",
                usage.cpu_percent, limit
            ));
        }
    }

    if checks == 0 {
        return (
            RESOURCE_WEIGHT,
            true,
            format!(
                "no limits configured (cpu {:.1}%, memory {}MB)",
                usage.cpu_percent, usage.memory_mb
            ),
        );
    }

    let passing = checks - violations.len() as u8;
    let credit = RESOURCE_WEIGHT * passing / checks;
    if violations.is_empty() {
        (
            credit,
            true,
            format!(
                "within limits (cpu {:.1}%, memory {}MB)",
                usage.cpu_percent, usage.memory_mb
            ),
        )
    } else {
        (credit, false, violations.join("; "))
    }
}
