//! Session configuration.

use muxrpc::CorrelationId;
use muxrpc::MIN_VERSION;
use muxrpc::PROTOCOL_VERSION;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Attached to every log event of the session.
    pub peer_name: String,
    /// Written into every outbound request.
    pub version: String,
    /// Largest id the allocator hands out before wrapping to 1.
    pub max_correlation_id: CorrelationId,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            peer_name: "client".into(),
            version: PROTOCOL_VERSION.into(),
            max_correlation_id: CorrelationId::MAX,
        }
    }
}

impl ClientConfig {
    pub fn with_peer_name(mut self, peer_name: impl Into<String>) -> Self {
        self.peer_name = peer_name.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_max_correlation_id(mut self, max: CorrelationId) -> Self {
        self.max_correlation_id = max;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub peer_name: String,
    /// Written into every outbound response.
    pub version: String,
    /// Requests with an older version are rejected.
    pub min_version: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            peer_name: "server".into(),
            version: PROTOCOL_VERSION.into(),
            min_version: MIN_VERSION,
        }
    }
}

impl ServerConfig {
    pub fn with_peer_name(mut self, peer_name: impl Into<String>) -> Self {
        self.peer_name = peer_name.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_min_version(mut self, min_version: f64) -> Self {
        self.min_version = min_version;
        self
    }
}
