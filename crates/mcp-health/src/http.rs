//! HTTP handshake probe.
//!
//! POSTs a JSON-RPC `ping` to the configured endpoint. Any 2xx answer counts
//! as a completed handshake; the body is not interpreted because non-MCP
//! reverse proxies in front of a server may rewrite it.

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Method, Request, Uri};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use mcp_common::AuthConfig;
use serde_json::json;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// Probe `endpoint` within `probe_timeout`.
///
/// Returns a human-readable detail on success and the failure reason
/// otherwise; the caller folds either into the handshake layer result.
pub async fn probe_http(
    endpoint: &str,
    auth: Option<&AuthConfig>,
    probe_timeout: Duration,
) -> Result<String, String> {
    let started = std::time::Instant::now();

    let uri: Uri = endpoint
        .parse()
        .map_err(|e| format!("invalid endpoint '{}': {}", endpoint, e))?;

    let payload = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "ping",
    });

    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("Content-Type", "application/json")
        .header("Accept", "application/json");

    if let Some(token) = auth.and_then(|a| a.bearer_token.as_deref()) {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }

    let request = builder
        .body(Full::new(Bytes::from(payload.to_string())))
        .map_err(|e| format!("failed to build request: {}", e))?;

    let client = Client::builder(TokioExecutor::new()).build_http();

    let response = match timeout(probe_timeout, client.request(request)).await {
        Ok(Ok(resp)) => resp,
        Ok(Err(e)) => return Err(format!("connection failed: {}", e)),
        Err(_) => return Err(format!("timed out after {:?}", probe_timeout)),
    };

    let status = response.status();
    let elapsed = started.elapsed().as_millis();
    debug!(endpoint, %status, elapsed_ms = elapsed, "http handshake probe");

    if status.is_success() {
        Ok(format!("status {} in {}ms", status.as_u16(), elapsed))
    } else {
        Err(format!("unexpected status {}", status.as_u16()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn invalid_endpoint_is_an_error() {
        let err = probe_http("not a uri", None, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.contains("invalid endpoint"));
    }

    #[tokio::test]
    async fn unreachable_endpoint_fails_within_timeout() {
        // Port 9 (discard) is almost never bound; connection is refused fast.
        let err = probe_http("http://127.0.0.1:9/mcp", None, Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(err.contains("connection failed") || err.contains("timed out"));
    }
}
