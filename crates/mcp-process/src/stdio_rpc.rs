//! JSON-RPC endpoint over a child process's stdio pipes.
//!
//! The writer task serializes requests onto the child's stdin; the reader
//! task consumes stdout lines, routes JSON-RPC responses to pending callers,
//! and forwards anything else to the log sink. The health layer uses this for
//! the stdio-transport handshake (`ping`).

use mcp_common::{OrchestrationError, OrchestrationResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

const REQUEST_CHANNEL_CAPACITY: usize = 32;
const MAX_PENDING_REQUESTS: usize = 64;

#[derive(Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: i64,
    method: &'a str,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    id: Option<Value>,
    #[allow(dead_code)]
    result: Option<Value>,
    error: Option<JsonRpcErrorBody>,
}

#[derive(Deserialize)]
struct JsonRpcErrorBody {
    code: i64,
    message: String,
}

type PendingMap = Arc<Mutex<HashMap<i64, oneshot::Sender<Result<(), String>>>>>;

/// JSON-RPC client half bound to one child's pipes.
pub struct StdioRpc {
    name: String,
    sender: mpsc::Sender<String>,
    pending: PendingMap,
    next_id: AtomicI64,
    writer_task: tokio::task::JoinHandle<()>,
    reader_task: tokio::task::JoinHandle<()>,
}

impl StdioRpc {
    pub fn new(name: String, stdin: ChildStdin, stdout: ChildStdout) -> Self {
        let (tx, rx) = mpsc::channel::<String>(REQUEST_CHANNEL_CAPACITY);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        let writer_task = tokio::spawn(Self::writer_loop(stdin, rx));
        let reader_task = tokio::spawn(Self::reader_loop(
            name.clone(),
            stdout,
            Arc::clone(&pending),
        ));

        Self {
            name,
            sender: tx,
            pending,
            next_id: AtomicI64::new(1),
            writer_task,
            reader_task,
        }
    }

    /// Send a JSON-RPC `ping` and wait for any response carrying its id.
    ///
    /// An error response still proves the server end is parsing and answering
    /// requests, so only transport failures and timeouts count against it.
    pub async fn ping(&self, timeout: Duration) -> OrchestrationResult<()> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method: "ping",
        };
        let line = serde_json::to_string(&request)
            .map_err(|e| OrchestrationError::spawn_failed(self.name.as_str(), e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        {
            let mut map = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            if map.len() >= MAX_PENDING_REQUESTS {
                return Err(OrchestrationError::queue_full(
                    self.name.as_str(),
                    MAX_PENDING_REQUESTS,
                ));
            }
            map.insert(id, tx);
        }

        if self.sender.send(line).await.is_err() {
            self.pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&id);
            return Err(OrchestrationError::channel_closed(format!(
                "stdin closed for '{}'",
                self.name
            )));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(rpc_err))) => {
                // The server answered; log the error but treat the transport
                // as healthy.
                debug!(process = %self.name, error = %rpc_err, "ping answered with rpc error");
                Ok(())
            }
            Ok(Err(_)) => Err(OrchestrationError::channel_closed(format!(
                "stdout closed for '{}'",
                self.name
            ))),
            Err(_) => {
                self.pending
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&id);
                Err(OrchestrationError::timeout(self.name.as_str(), "stdio ping"))
            }
        }
    }

    /// Whether the write half of the pipe has been torn down.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    async fn writer_loop(mut stdin: ChildStdin, mut rx: mpsc::Receiver<String>) {
        while let Some(mut line) = rx.recv().await {
            line.push('\n');
            if stdin.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if stdin.flush().await.is_err() {
                break;
            }
        }
    }

    async fn reader_loop(name: String, stdout: ChildStdout, pending: PendingMap) {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match serde_json::from_str::<JsonRpcResponse>(&line) {
                    Ok(response) if response.id.is_some() => {
                        let id = response.id.and_then(|v| v.as_i64());
                        if let Some(id) = id {
                            let waiter = pending
                                .lock()
                                .unwrap_or_else(|e| e.into_inner())
                                .remove(&id);
                            if let Some(tx) = waiter {
                                let outcome = match response.error {
                                    Some(err) => Err(format!("{} ({})", err.message, err.code)),
                                    None => Ok(()),
                                };
                                let _ = tx.send(outcome);
                            } else {
                                debug!(process = %name, id, "response for unknown request id");
                            }
                        }
                    }
                    // Notifications and non-JSON output go to the log sink.
                    _ => {
                        info!(target: "mcp_process::child", process = %name, stream = "stdout", "{}", line)
                    }
                },
                Ok(None) | Err(_) => break,
            }
        }

        // Pipe closed: fail every waiter so no ping hangs until its timeout.
        let mut map = pending.lock().unwrap_or_else(|e| e.into_inner());
        for (_, tx) in map.drain() {
            let _ = tx.send(Err("process stdout closed".to_string()));
        }
        debug!(process = %name, "stdio rpc reader finished");
    }
}

impl Drop for StdioRpc {
    fn drop(&mut self) {
        self.writer_task.abort();
        self.reader_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spawn::spawn_detached;

    #[cfg(unix)]
    #[tokio::test]
    async fn ping_against_cat_echo_server() {
        // `cat` echoes our request verbatim; the echoed line is a valid
        // JSON-RPC message carrying our id, which satisfies the ping.
        let command = vec!["/bin/cat".to_string()];
        let spawned = spawn_detached("cat-rpc", &command, true).unwrap();
        let rpc = spawned.stdio.expect("stdio endpoint requested");

        rpc.ping(Duration::from_secs(2)).await.unwrap();

        crate::terminate::force_kill("cat-rpc", spawned.pid).unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn ping_times_out_against_silent_process() {
        let command = vec!["/bin/sleep".to_string(), "10".to_string()];
        let spawned = spawn_detached("silent", &command, true).unwrap();
        let rpc = spawned.stdio.expect("stdio endpoint requested");

        let err = rpc.ping(Duration::from_millis(100)).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::Timeout { .. }));

        crate::terminate::force_kill("silent", spawned.pid).unwrap();
    }
}
