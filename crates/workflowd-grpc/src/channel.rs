// ABOUTME: gRPC channel creation for agents dialing the dispatcher.
// ABOUTME: Normalizes bare host:port addresses and applies keep-alive and connect timeouts.

use std::time::Duration;
use tonic::transport::{Channel, Endpoint};

use crate::error::GrpcClientError;

/// Keep-alive pings for the long-lived command/status stream.
#[derive(Debug, Clone)]
pub struct KeepAliveConfig {
    /// Interval between keep-alive pings when the connection is idle.
    pub interval: Duration,
    /// Timeout waiting for keep-alive response before considering connection dead.
    pub timeout: Duration,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(20),
        }
    }
}

/// Where and how to dial the dispatcher.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Dispatcher address, always carrying a scheme after construction.
    pub address: String,
    /// Keep-alive configuration. If None, keep-alive is disabled.
    pub keep_alive: Option<KeepAliveConfig>,
    /// Bound on establishing the TCP/HTTP2 connection.
    pub connect_timeout: Option<Duration>,
}

impl ChannelConfig {
    pub fn new(address: impl AsRef<str>) -> Self {
        Self {
            address: normalize_address(address.as_ref()),
            keep_alive: Some(KeepAliveConfig::default()),
            connect_timeout: Some(Duration::from_secs(10)),
        }
    }

    pub fn without_keep_alive(mut self) -> Self {
        self.keep_alive = None;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }
}

/// Accept `host:port` as well as full URLs; a missing scheme means plain `http://`.
pub fn normalize_address(addr: &str) -> String {
    let addr = addr.trim();
    if addr.is_empty() || addr.contains("://") {
        addr.to_string()
    } else {
        format!("http://{addr}")
    }
}

/// Dial the dispatcher. The returned channel is ready for `ExecuteWorkflow`.
pub async fn connect(config: &ChannelConfig) -> Result<Channel, GrpcClientError> {
    let mut endpoint = Endpoint::from_shared(config.address.clone())
        .map_err(|e| GrpcClientError::InvalidAddress(format!("{}: {e}", config.address)))?;

    if let Some(ka) = &config.keep_alive {
        endpoint = endpoint
            .http2_keep_alive_interval(ka.interval)
            .keep_alive_timeout(ka.timeout)
            .keep_alive_while_idle(true);
    }

    if let Some(timeout) = config.connect_timeout {
        endpoint = endpoint.connect_timeout(timeout);
    }

    let channel = endpoint
        .connect()
        .await
        .map_err(|e| GrpcClientError::ConnectionFailed(format!("{}: {e}", config.address)))?;

    tracing::debug!(
        address = %config.address,
        keep_alive = config.keep_alive.is_some(),
        "gRPC channel connected"
    );

    Ok(channel)
}
