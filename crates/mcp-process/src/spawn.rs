//! Detached process spawning with log forwarding.
//!
//! Spawned children are independent of the spawning task: the child handle is
//! never configured to kill on drop, and a background reaper task collects the
//! exit status so a dead child cannot linger as a zombie and fool the
//! signal-0 liveness probe.

use crate::stdio_rpc::StdioRpc;
use mcp_common::{OrchestrationError, OrchestrationResult};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

/// Handle to a freshly spawned process.
pub struct SpawnedProcess {
    pub pid: u32,
    /// JSON-RPC endpoint over the child's pipes; present only when requested
    /// (stdio transport).
    pub stdio: Option<StdioRpc>,
}

impl std::fmt::Debug for SpawnedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnedProcess")
            .field("pid", &self.pid)
            .field("stdio", &self.stdio.is_some())
            .finish()
    }
}

/// Spawn `command` detached from the caller's lifetime.
///
/// stdout and stderr are piped and forwarded line-by-line into the tracing
/// sink, tagged with the process name. When `with_stdio_rpc` is set, stdin is
/// piped as well and stdout is owned by a [`StdioRpc`] endpoint instead of the
/// plain forwarder (the endpoint still forwards non-RPC output).
pub fn spawn_detached(
    name: &str,
    command: &[String],
    with_stdio_rpc: bool,
) -> OrchestrationResult<SpawnedProcess> {
    let (executable, args) = command
        .split_first()
        .ok_or_else(|| OrchestrationError::configuration(name, "empty command"))?;

    let mut cmd = Command::new(executable);
    cmd.args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if with_stdio_rpc {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .kill_on_drop(false);

    let mut child = cmd
        .spawn()
        .map_err(|e| OrchestrationError::spawn_failed(name, format!("{}: {}", executable, e)))?;

    let pid = child.id().ok_or_else(|| {
        OrchestrationError::spawn_failed(name, format!("{}: exited before pid capture", executable))
    })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stdin = child.stdin.take();

    if let Some(stderr) = stderr {
        forward_lines(name.to_string(), "stderr", stderr);
    }

    let stdio = if with_stdio_rpc {
        match (stdin, stdout) {
            (Some(stdin), Some(stdout)) => Some(StdioRpc::new(name.to_string(), stdin, stdout)),
            _ => {
                return Err(OrchestrationError::spawn_failed(
                    name,
                    "stdio pipes unavailable for rpc endpoint",
                ))
            }
        }
    } else {
        if let Some(stdout) = stdout {
            forward_lines(name.to_string(), "stdout", stdout);
        }
        None
    };

    // Reaper: collect the exit status so the kernel can release the pid.
    let reap_name = name.to_string();
    tokio::spawn(async move {
        match child.wait().await {
            Ok(status) => info!(process = %reap_name, %status, "child exited"),
            Err(e) => warn!(process = %reap_name, error = %e, "failed to await child exit"),
        }
    });

    info!(process = %name, pid, "spawned process");
    Ok(SpawnedProcess { pid, stdio })
}

/// Forward a child output stream into the tracing sink, one line at a time.
fn forward_lines<R>(name: String, stream: &'static str, reader: R)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            info!(target: "mcp_process::child", process = %name, stream, "{}", line);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_missing_binary_fails() {
        let command = vec!["/no/such/binary".to_string()];
        let err = spawn_detached("bad", &command, false).unwrap_err();
        assert!(matches!(err, OrchestrationError::SpawnFailed { .. }));
        assert!(err.to_string().contains("/no/such/binary"));
    }

    #[tokio::test]
    async fn spawn_empty_command_is_a_configuration_error() {
        let err = spawn_detached("empty", &[], false).unwrap_err();
        assert!(matches!(err, OrchestrationError::Configuration { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn spawn_captures_a_live_pid() {
        let command = vec!["/bin/sleep".to_string(), "5".to_string()];
        let spawned = spawn_detached("sleeper", &command, false).unwrap();
        assert!(crate::check::is_alive(spawned.pid));

        crate::terminate::force_kill("sleeper", spawned.pid).unwrap();
    }
}
