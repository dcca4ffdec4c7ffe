//! Client configuration.

use std::time::Duration;

/// What happens to the collaborator registry when the channel drops
/// without an explicit `disconnect()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StalePolicy {
    /// Keep the last known collaborators until the next resync or
    /// explicit disconnect.
    #[default]
    Freeze,
    /// Empty the registry as soon as the channel closes or fails.
    Clear,
}

/// Session store configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Collaboration endpoint, without trailing slash
    pub server_url: String,
    /// Upper bound on the WebSocket handshake
    pub connect_timeout: Duration,
    /// Capacity of the forwarded session-event buffer
    pub event_capacity: usize,
    /// Registry handling on remote close / transport error
    pub on_unexpected_close: StalePolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:9090".to_string(),
            connect_timeout: Duration::from_secs(10),
            event_capacity: 256,
            on_unexpected_close: StalePolicy::Freeze,
        }
    }
}

impl ClientConfig {
    pub fn with_server_url(mut self, server_url: impl Into<String>) -> Self {
        self.server_url = server_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_stale_policy(mut self, policy: StalePolicy) -> Self {
        self.on_unexpected_close = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.server_url, "ws://127.0.0.1:9090");
        assert_eq!(config.event_capacity, 256);
        assert_eq!(config.on_unexpected_close, StalePolicy::Freeze);
    }

    #[test]
    fn test_server_url_trailing_slash_trimmed() {
        let config = ClientConfig::default().with_server_url("wss://collab.example.com/ws/");
        assert_eq!(config.server_url, "wss://collab.example.com/ws");
    }
}
