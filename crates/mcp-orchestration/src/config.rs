//! Typed configuration for the orchestrator daemon.
//!
//! Durations are written as human-friendly strings (`"500ms"`, `"30s"`,
//! `"2m"`). Unknown keys are rejected by serde so a typo in a config file
//! fails loudly at load time instead of silently changing behavior.

use anyhow::{bail, Context, Result};
use mcp_common::{AuthConfig, Transport};
use mcp_health::HealthSettings;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub orchestrator: OrchestratorOptions,
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
}

/// Daemon-wide options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrchestratorOptions {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Worker count for the orchestration task queue.
    #[serde(default = "default_queue_workers")]
    pub queue_workers: usize,

    /// Cadence of the scheduler that enqueues due health checks.
    #[serde(default = "default_health_tick", with = "duration_serde")]
    pub health_tick: Duration,

    /// Upper bound on stopping all processes at daemon shutdown.
    #[serde(default = "default_shutdown_timeout", with = "duration_serde")]
    pub shutdown_timeout: Duration,

    /// Retry policy for queued orchestration commands.
    #[serde(default)]
    pub retry: RetryOptions,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            queue_workers: default_queue_workers(),
            health_tick: default_health_tick(),
            shutdown_timeout: default_shutdown_timeout(),
            retry: RetryOptions::default(),
        }
    }
}

/// Retry schedule for queued commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryOptions {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff", with = "duration_vec_serde")]
    pub backoff: Vec<Duration>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: default_backoff(),
        }
    }
}

/// One managed MCP server connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    pub name: String,

    /// Executable and arguments.
    pub command: Vec<String>,

    #[serde(default)]
    pub transport: Transport,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,

    /// Start this connection when the daemon boots.
    #[serde(default = "default_true")]
    pub autostart: bool,

    #[serde(default = "default_graceful_timeout", with = "duration_serde")]
    pub graceful_timeout: Duration,

    #[serde(default)]
    pub health: HealthOptions,

    /// Reaction to an unhealthy report / crash.
    #[serde(default)]
    pub on_unhealthy: UnhealthyAction,

    #[serde(default)]
    pub restart: RestartConfig,
}

impl ConnectionConfig {
    /// Minimal connection for a name first seen through a start request.
    pub fn adhoc(name: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command,
            transport: Transport::default(),
            auth: None,
            autostart: false,
            graceful_timeout: default_graceful_timeout(),
            health: HealthOptions::default(),
            on_unhealthy: UnhealthyAction::Ignore,
            restart: RestartConfig::default(),
        }
    }
}

/// Health check options for one connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HealthOptions {
    #[serde(default = "default_health_interval", with = "duration_serde")]
    pub interval: Duration,
    #[serde(default = "default_handshake_timeout", with = "duration_serde")]
    pub handshake_timeout: Duration,
    #[serde(default = "default_healthy_score")]
    pub healthy_score: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit_mb: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_limit_percent: Option<f32>,
}

impl HealthOptions {
    pub fn settings(&self) -> HealthSettings {
        HealthSettings {
            healthy_score: self.healthy_score,
            handshake_timeout: self.handshake_timeout,
            memory_limit_mb: self.memory_limit_mb,
            cpu_limit_percent: self.cpu_limit_percent,
        }
    }
}

impl Default for HealthOptions {
    fn default() -> Self {
        Self {
            interval: default_health_interval(),
            handshake_timeout: default_handshake_timeout(),
            healthy_score: default_healthy_score(),
            memory_limit_mb: None,
            cpu_limit_percent: None,
        }
    }
}

/// What to do when a connection's process turns unhealthy or crashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnhealthyAction {
    #[default]
    Restart,
    Ignore,
}

/// Automatic restart budget and backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RestartConfig {
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    #[serde(default = "default_restart_delay", with = "duration_serde")]
    pub delay: Duration,
    #[serde(default = "default_backoff_rate")]
    pub backoff_rate: f32,
}

impl RestartConfig {
    /// Delay before restart attempt `attempt` (1-based), with exponential
    /// backoff capped at five minutes.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let factor = f64::from(self.backoff_rate).powi(exponent as i32);
        let secs = (self.delay.as_secs_f64() * factor).min(300.0);
        Duration::from_secs_f64(secs)
    }
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            max_restarts: default_max_restarts(),
            delay: default_restart_delay(),
            backoff_rate: default_backoff_rate(),
        }
    }
}

impl OrchestratorConfig {
    /// Load and validate a YAML config file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file: {}", path.as_ref().display()))?;
        Self::load_from_string(&content)
    }

    /// Load and validate a YAML config string.
    pub fn load_from_string(content: &str) -> Result<Self> {
        let config: OrchestratorConfig =
            serde_yaml::from_str(content).context("failed to parse YAML configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.orchestrator.queue_workers == 0 {
            bail!("orchestrator.queue_workers must be at least 1");
        }
        if self.orchestrator.retry.max_attempts == 0 {
            bail!("orchestrator.retry.max_attempts must be at least 1");
        }
        if self.orchestrator.retry.backoff.is_empty() {
            bail!("orchestrator.retry.backoff must list at least one delay");
        }
        if self.orchestrator.health_tick.is_zero() {
            bail!("orchestrator.health_tick must be positive");
        }

        let mut seen = HashSet::new();
        for connection in &self.connections {
            let name = &connection.name;
            if name.is_empty() {
                bail!("connection name must not be empty");
            }
            if !seen.insert(name.clone()) {
                bail!("duplicate connection name: {}", name);
            }
            if connection.command.is_empty() {
                bail!("connection '{}': command must not be empty", name);
            }
            if connection.health.healthy_score > 100 {
                bail!(
                    "connection '{}': health.healthy_score must be 0-100",
                    name
                );
            }
            // Probe overlap guard: a handshake still in flight when the next
            // check is due would stack probes.
            if connection.health.handshake_timeout >= connection.health.interval {
                bail!(
                    "connection '{}': health.handshake_timeout must be shorter than health.interval",
                    name
                );
            }
            if connection.graceful_timeout.is_zero() {
                bail!("connection '{}': graceful_timeout must be positive", name);
            }
        }

        Ok(())
    }

    pub fn connection(&self, name: &str) -> Option<&ConnectionConfig> {
        self.connections.iter().find(|c| c.name == name)
    }
}

// Default value functions

fn default_log_level() -> String {
    "info".to_string()
}

fn default_queue_workers() -> usize {
    4
}

fn default_health_tick() -> Duration {
    Duration::from_secs(10)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff() -> Vec<Duration> {
    vec![
        Duration::from_secs(30),
        Duration::from_secs(60),
        Duration::from_secs(120),
    ]
}

fn default_true() -> bool {
    true
}

fn default_graceful_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_health_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_handshake_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_healthy_score() -> u8 {
    60
}

fn default_max_restarts() -> u32 {
    5
}

fn default_restart_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_backoff_rate() -> f32 {
    2.0
}

/// Serde support for durations written as `"500ms"`, `"30s"`, or `"2m"`.
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(crate) fn format_duration(duration: &Duration) -> String {
        if duration.subsec_millis() > 0 {
            format!("{}ms", duration.as_millis())
        } else {
            format!("{}s", duration.as_secs())
        }
    }

    pub(crate) fn parse_duration(s: &str) -> Result<Duration, String> {
        // "ms" must be checked before "s" and "m".
        if let Some(num) = s.strip_suffix("ms") {
            let millis: u64 = num
                .parse()
                .map_err(|_| format!("invalid duration: {}", s))?;
            Ok(Duration::from_millis(millis))
        } else if let Some(num) = s.strip_suffix('s') {
            let secs: u64 = num
                .parse()
                .map_err(|_| format!("invalid duration: {}", s))?;
            Ok(Duration::from_secs(secs))
        } else if let Some(num) = s.strip_suffix('m') {
            let mins: u64 = num
                .parse()
                .map_err(|_| format!("invalid duration: {}", s))?;
            Ok(Duration::from_secs(mins * 60))
        } else {
            Err(format!("duration must end with 'ms', 's', or 'm': {}", s))
        }
    }
}

/// Serde support for lists of duration strings.
pub(crate) mod duration_vec_serde {
    use super::duration_serde::{format_duration, parse_duration};
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(durations: &[Duration], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(durations.iter().map(format_duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Vec<String> = Vec::deserialize(deserializer)?;
        raw.iter()
            .map(|s| parse_duration(s).map_err(serde::de::Error::custom))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
orchestrator:
  queue_workers: 2
  health_tick: 5s
  retry:
    max_attempts: 3
    backoff: ["30s", "60s", "120s"]
connections:
  - name: echo-server
    command: ["/usr/local/bin/mcp-echo", "--stdio"]
    transport:
      kind: stdio
    health:
      interval: 60s
      handshake_timeout: 5s
  - name: search
    command: ["/usr/local/bin/mcp-search"]
    transport:
      kind: http
      endpoint: http://localhost:8931/mcp
    on_unhealthy: ignore
"#;

    #[test]
    fn sample_config_parses() {
        let config = OrchestratorConfig::load_from_string(SAMPLE).unwrap();
        assert_eq!(config.orchestrator.queue_workers, 2);
        assert_eq!(config.orchestrator.health_tick, Duration::from_secs(5));
        assert_eq!(config.connections.len(), 2);

        let echo = config.connection("echo-server").unwrap();
        assert_eq!(echo.health.interval, Duration::from_secs(60));
        assert!(echo.autostart);
        assert_eq!(echo.on_unhealthy, UnhealthyAction::Restart);

        let search = config.connection("search").unwrap();
        assert_eq!(search.on_unhealthy, UnhealthyAction::Ignore);
        assert!(matches!(search.transport, Transport::Http { .. }));
    }

    #[test]
    fn default_retry_schedule_matches_policy() {
        let options = RetryOptions::default();
        assert_eq!(options.max_attempts, 3);
        assert_eq!(
            options.backoff,
            vec![
                Duration::from_secs(30),
                Duration::from_secs(60),
                Duration::from_secs(120)
            ]
        );
    }

    #[test]
    fn duration_strings_parse() {
        use super::duration_serde::parse_duration;
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("abcs").is_err());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let yaml = r#"
connections:
  - name: a
    command: ["/bin/true"]
  - name: a
    command: ["/bin/true"]
"#;
        let err = OrchestratorConfig::load_from_string(yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate connection name"));
    }

    #[test]
    fn empty_command_is_rejected() {
        let yaml = r#"
connections:
  - name: a
    command: []
"#;
        let err = OrchestratorConfig::load_from_string(yaml).unwrap_err();
        assert!(err.to_string().contains("command must not be empty"));
    }

    #[test]
    fn handshake_timeout_must_stay_below_interval() {
        let yaml = r#"
connections:
  - name: a
    command: ["/bin/true"]
    health:
      interval: 5s
      handshake_timeout: 5s
"#;
        let err = OrchestratorConfig::load_from_string(yaml).unwrap_err();
        assert!(err.to_string().contains("handshake_timeout"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let yaml = r#"
connections:
  - name: a
    command: ["/bin/true"]
    restart_polcy: always
"#;
        assert!(OrchestratorConfig::load_from_string(yaml).is_err());
    }

    #[test]
    fn restart_backoff_grows_and_caps() {
        let restart = RestartConfig {
            max_restarts: 5,
            delay: Duration::from_secs(2),
            backoff_rate: 2.0,
        };
        assert_eq!(restart.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(restart.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(restart.delay_for_attempt(3), Duration::from_secs(8));
        // Far attempts hit the cap.
        assert_eq!(restart.delay_for_attempt(16), Duration::from_secs(300));
    }
}
