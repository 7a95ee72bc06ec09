//! Value types shared between configuration and the health layer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How an MCP server process is reached for protocol-level probing.
///
/// The transport does not change how the process is spawned or signalled,
/// only how the handshake health layer talks to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Transport {
    /// JSON-RPC over the child's stdin/stdout pipes.
    Stdio,
    /// JSON-RPC POSTed to an HTTP endpoint.
    Http { endpoint: String },
    /// Ping/pong frames over a WebSocket connection.
    Websocket { endpoint: String },
}

impl Transport {
    pub fn is_stdio(&self) -> bool {
        matches!(self, Transport::Stdio)
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Stdio => write!(f, "stdio"),
            Transport::Http { endpoint } => write!(f, "http ({})", endpoint),
            Transport::Websocket { endpoint } => write!(f, "websocket ({})", endpoint),
        }
    }
}

impl Default for Transport {
    fn default() -> Self {
        Transport::Stdio
    }
}

/// Auth settings attached to a connection descriptor, read-only to this core.
///
/// Only bearer tokens are recognized; the HTTP probe sends the token as an
/// `Authorization: Bearer` header when present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_deserializes_from_tagged_yaml() {
        let t: Transport = serde_yaml::from_str("kind: stdio").unwrap();
        assert_eq!(t, Transport::Stdio);

        let t: Transport =
            serde_yaml::from_str("kind: http\nendpoint: http://localhost:8080/mcp").unwrap();
        assert_eq!(
            t,
            Transport::Http {
                endpoint: "http://localhost:8080/mcp".to_string()
            }
        );
    }

    #[test]
    fn transport_display() {
        assert_eq!(Transport::Stdio.to_string(), "stdio");
        assert_eq!(
            Transport::Websocket {
                endpoint: "ws://localhost:9000".to_string()
            }
            .to_string(),
            "websocket (ws://localhost:9000)"
        );
    }
}
