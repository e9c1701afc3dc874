//! Server configuration.

use std::time::Duration;

/// Configuration for the in-memory control plane.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Number of events retained for watchers. Older cursors get `Expired`.
    pub history_limit: usize,
    /// Lifetime of a single watch before the server closes it.
    pub watch_timeout: Duration,
}

impl ServerConfig {
    /// Creates a configuration with default limits.
    pub fn new() -> Self {
        Self {
            history_limit: 1000,
            watch_timeout: Duration::from_secs(300),
        }
    }

    /// Sets the history limit.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    /// Sets the watch timeout.
    pub fn with_watch_timeout(mut self, timeout: Duration) -> Self {
        self.watch_timeout = timeout;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.history_limit, 1000);
        assert_eq!(config.watch_timeout, Duration::from_secs(300));
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::new()
            .with_history_limit(0)
            .with_watch_timeout(Duration::from_millis(250));

        assert_eq!(config.history_limit, 1);
        assert_eq!(config.watch_timeout, Duration::from_millis(250));
    }
}
