//! WebSocket handshake probe.
//!
//! Connects to the endpoint and exchanges one ping/pong frame. Endpoints that
//! complete the upgrade and answer the ping are considered handshake-healthy.

use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::connect_async;
use tracing::debug;

/// Probe `endpoint` within `probe_timeout`.
pub async fn probe_websocket(endpoint: &str, probe_timeout: Duration) -> Result<String, String> {
    let started = std::time::Instant::now();

    match timeout(probe_timeout, probe_inner(endpoint)).await {
        Ok(Ok(())) => {
            let elapsed = started.elapsed().as_millis();
            debug!(endpoint, elapsed_ms = elapsed, "websocket handshake probe");
            Ok(format!("pong in {}ms", elapsed))
        }
        Ok(Err(reason)) => Err(reason),
        Err(_) => Err(format!("timed out after {:?}", probe_timeout)),
    }
}

async fn probe_inner(endpoint: &str) -> Result<(), String> {
    let (ws_stream, _) = connect_async(endpoint)
        .await
        .map_err(|e| format!("connect failed: {}", e))?;

    let (mut write, mut read) = ws_stream.split();

    write
        .send(Message::Ping(Vec::new().into()))
        .await
        .map_err(|e| format!("ping send failed: {}", e))?;

    while let Some(frame) = read.next().await {
        match frame {
            Ok(Message::Pong(_)) => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(());
            }
            // Anything else the server pushes before answering the ping is
            // ignored; we only care that the control channel works.
            Ok(_) => continue,
            Err(e) => return Err(format!("stream error: {}", e)),
        }
    }

    Err("connection closed before pong".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_endpoint_fails() {
        let err = probe_websocket("ws://127.0.0.1:9/", Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(err.contains("connect failed") || err.contains("timed out"));
    }

    #[tokio::test]
    async fn pong_from_local_server_passes() {
        use tokio::net::TcpListener;

        // tokio-tungstenite answers pings automatically on accept side.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await {
                if let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await {
                    // Drive the connection so the pong gets flushed.
                    while let Some(Ok(_)) = ws.next().await {}
                }
            }
        });

        let detail = probe_websocket(&format!("ws://{}/", addr), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(detail.contains("pong"));
    }
}
