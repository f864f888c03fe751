use std::time::Duration;

/// Server configuration.
///
/// Controls per-connection ring buffer capacity, listen backlog and socket
/// options. Use [`ServerConfig::builder`] for ergonomic construction.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Capacity of each connection's input and output ring buffer.
    pub buffer_size: usize,
    /// Listen backlog applied to every listening socket.
    pub backlog: i32,
    /// Enable TCP_NODELAY on accepted connections.
    pub no_delay: bool,
    /// SO_KEEPALIVE idle time for accepted connections.
    pub keep_alive: Option<Duration>,
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            buffer_size: 1024 * 1024,
            backlog: 1024,
            no_delay: true,
            keep_alive: Some(Duration::from_secs(60)),
        }
    }
}

#[derive(Default)]
pub struct ServerConfigBuilder {
    buffer_size: Option<usize>,
    backlog: Option<i32>,
    no_delay: Option<bool>,
    keep_alive: Option<Option<Duration>>,
}

impl ServerConfigBuilder {
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = Some(size);
        self
    }

    pub fn backlog(mut self, backlog: i32) -> Self {
        self.backlog = Some(backlog);
        self
    }

    pub fn no_delay(mut self, enabled: bool) -> Self {
        self.no_delay = Some(enabled);
        self
    }

    pub fn keep_alive(mut self, duration: Option<Duration>) -> Self {
        self.keep_alive = Some(duration);
        self
    }

    pub fn build(self) -> ServerConfig {
        let default = ServerConfig::default();
        ServerConfig {
            buffer_size: self.buffer_size.unwrap_or(default.buffer_size),
            backlog: self.backlog.unwrap_or(default.backlog),
            no_delay: self.no_delay.unwrap_or(default.no_delay),
            keep_alive: self.keep_alive.unwrap_or(default.keep_alive),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let config = ServerConfig::builder()
            .buffer_size(64)
            .backlog(16)
            .no_delay(false)
            .keep_alive(None)
            .build();

        assert_eq!(config.buffer_size, 64);
        assert_eq!(config.backlog, 16);
        assert!(!config.no_delay);
        assert!(config.keep_alive.is_none());
    }

    #[test]
    fn builder_keeps_defaults_when_unset() {
        let config = ServerConfig::builder().build();
        let default = ServerConfig::default();
        assert_eq!(config.buffer_size, default.buffer_size);
        assert_eq!(config.backlog, default.backlog);
    }
}
