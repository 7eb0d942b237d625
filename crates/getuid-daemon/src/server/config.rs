//! Server configuration.

use std::net::SocketAddr;

use getuid_core::protocol::ENDPOINT_PATH;

use super::ServerError;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP bind address.
    pub addr: SocketAddr,

    /// HTTP path of the WebSocket endpoint.
    pub path: String,

    /// Capacity of the inbound request channel.
    pub queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
            path: ENDPOINT_PATH.to_string(),
            queue_capacity: 64,
        }
    }
}

impl ServerConfig {
    /// Create a new server config listening on `addr`.
    pub fn tcp(addr: SocketAddr) -> Self {
        Self {
            addr,
            ..Default::default()
        }
    }

    /// Set the endpoint path.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Set the inbound queue capacity.
    #[must_use]
    pub const fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Check values that would otherwise fail later at runtime.
    pub fn validate(&self) -> Result<(), ServerError> {
        if !self.path.starts_with('/') {
            return Err(ServerError::Config(format!(
                "endpoint path must start with '/': {:?}",
                self.path
            )));
        }
        if self.queue_capacity == 0 {
            return Err(ServerError::Config(
                "queue capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
