// ABOUTME: workflowd dispatcher - pushes commands to connected agents and tracks their status
// ABOUTME: Registry, command channels, sender/receiver loops, gRPC service and configuration

pub mod channel;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod ids;
pub mod ledger;
pub mod registry;
pub mod sender;
pub mod server;
pub mod service;

pub use channel::{command_channel, CommandReceiver, CommandSender};
pub use config::Config;
pub use connection::{ConnectionOutcome, ConnectionState};
pub use dispatcher::{CommandSpec, DispatchSettings, Dispatcher};
pub use error::{ConnectionError, DispatchError};
pub use registry::ConnectionRegistry;

use anyhow::Result;

/// Everything the server needs once configuration has been resolved.
#[derive(Debug, Clone)]
pub struct ServeConfig {
    /// gRPC listen address (default: 0.0.0.0:50051)
    pub listen_addr: String,
    pub cluster_id: String,
    pub settings: DispatchSettings,
}

impl From<&Config> for ServeConfig {
    fn from(config: &Config) -> Self {
        Self {
            listen_addr: config.server.port.clone(),
            cluster_id: config.server.cluster_id.clone(),
            settings: config.dispatch.to_settings(),
        }
    }
}

/// Run the dispatcher
pub async fn run(config: ServeConfig) -> Result<()> {
    server::run(config).await
}
