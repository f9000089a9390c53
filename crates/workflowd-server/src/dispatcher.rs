// ABOUTME: Dispatcher owning the connection registry, id generators and shutdown token.
// ABOUTME: Entry point for accepted agent streams and for external command dispatch.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio_util::sync::CancellationToken;
use tonic::Status;
use tracing::{info, warn};
use workflowd_proto::{Command, TaskStatus};

use crate::connection::{self, ConnectionOutcome};
use crate::error::{ConnectionError, DispatchError};
use crate::ids::IdGenerator;
use crate::registry::ConnectionRegistry;
use crate::sender::Outbound;

/// Executable and arguments of a command, before a task id is assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub executable: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(executable: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            executable: executable.into(),
            args,
        }
    }

    pub(crate) fn into_start(self, task_id: String) -> Command {
        Command::start(task_id, self.executable, self.args)
    }
}

/// Tunables for connection handling.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Slots in each connection's command channel.
    pub command_buffer: usize,
    /// How long an external dispatch may wait for channel space.
    pub dispatch_timeout: Duration,
    /// Command queued on every new connection.
    pub initial_command: CommandSpec,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            command_buffer: 16,
            dispatch_timeout: Duration::from_secs(1),
            initial_command: CommandSpec::new(
                "sh",
                vec![
                    "-c".to_string(),
                    "for i in 1 2 3; do echo 'Processing step' $i; sleep 1; done".to_string(),
                ],
            ),
        }
    }
}

/// One dispatcher instance. Cheap to share behind an `Arc`.
#[derive(Debug)]
pub struct Dispatcher {
    settings: DispatchSettings,
    registry: ConnectionRegistry,
    connection_ids: IdGenerator,
    task_ids: IdGenerator,
    shutdown: CancellationToken,
}

impl Dispatcher {
    pub fn new(settings: DispatchSettings) -> Arc<Self> {
        Arc::new(Self {
            settings,
            registry: ConnectionRegistry::new(),
            connection_ids: IdGenerator::new("Conn"),
            task_ids: IdGenerator::new("TASK"),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn next_connection_id(&self) -> String {
        self.connection_ids.next_id()
    }

    pub fn next_task_id(&self) -> String {
        self.task_ids.next_id()
    }

    /// Queue a START command on a live connection. Returns the new task id.
    ///
    /// Fails with `NotFound` if the connection is not registered and with
    /// `Timeout` if its channel stays full for `dispatch_timeout`.
    pub async fn send_command(
        &self,
        connection_id: &str,
        spec: CommandSpec,
    ) -> Result<String, DispatchError> {
        let Some(sender) = self.registry.lookup(connection_id) else {
            warn!(connection_id = %connection_id, "Agent connection not found");
            return Err(DispatchError::NotFound(connection_id.to_string()));
        };

        let task_id = self.next_task_id();
        let command = spec.into_start(task_id.clone());
        match sender
            .enqueue_timeout(command, self.settings.dispatch_timeout)
            .await
        {
            Ok(()) => {
                info!(connection_id = %connection_id, task_id = %task_id, "Queued command");
                Ok(task_id)
            }
            Err(e) => {
                warn!(connection_id = %connection_id, task_id = %task_id, error = %e, "Failed to queue command");
                Err(e)
            }
        }
    }

    /// Registered connection ids.
    pub fn connections(&self) -> Vec<String> {
        self.registry.connection_ids()
    }

    /// Cancel every connection. New streams are refused afterwards.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Run one agent connection to completion.
    ///
    /// `inbound` is the agent's status stream, `outbound` feeds the command
    /// stream returned to the agent.
    pub async fn handle_connection<S>(
        &self,
        connection_id: String,
        peer: Option<SocketAddr>,
        inbound: S,
        outbound: Outbound,
    ) -> Result<ConnectionOutcome, ConnectionError>
    where
        S: Stream<Item = Result<TaskStatus, Status>> + Unpin + Send,
    {
        let peer = peer
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "unknown peer".to_string());
        info!(connection_id = %connection_id, peer = %peer, "New agent connected");

        connection::run(
            self,
            connection_id,
            self.shutdown.child_token(),
            inbound,
            outbound,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::command_channel;

    fn settings() -> DispatchSettings {
        DispatchSettings {
            command_buffer: 1,
            dispatch_timeout: Duration::from_millis(50),
            ..DispatchSettings::default()
        }
    }

    #[tokio::test]
    async fn test_send_command_not_found() {
        let dispatcher = Dispatcher::new(settings());
        let err = tokio::time::timeout(
            Duration::from_secs(1),
            dispatcher.send_command("Conn-missing", CommandSpec::new("true", vec![])),
        )
        .await
        .unwrap()
        .unwrap_err();
        assert_eq!(err, DispatchError::NotFound("Conn-missing".to_string()));
    }

    #[tokio::test]
    async fn test_send_command_queues_with_fresh_task_id() {
        let dispatcher = Dispatcher::new(settings());
        let (tx, mut rx) = command_channel("Conn-a", 4);
        dispatcher.registry().register("Conn-a", tx);

        let first = dispatcher
            .send_command("Conn-a", CommandSpec::new("echo", vec!["hi".to_string()]))
            .await
            .unwrap();
        let second = dispatcher
            .send_command("Conn-a", CommandSpec::new("echo", vec!["again".to_string()]))
            .await
            .unwrap();
        assert_ne!(first, second);

        let cmd = rx.next().await.unwrap();
        assert_eq!(cmd.task_id, first);
        assert_eq!(cmd.executable, "echo");
        assert_eq!(cmd.args, vec!["hi".to_string()]);
    }

    #[tokio::test]
    async fn test_send_command_times_out_on_unresponsive_connection() {
        let dispatcher = Dispatcher::new(settings());
        let (tx, _rx) = command_channel("Conn-stuck", 1);
        dispatcher.registry().register("Conn-stuck", tx);

        dispatcher
            .send_command("Conn-stuck", CommandSpec::new("true", vec![]))
            .await
            .unwrap();
        let err = dispatcher
            .send_command("Conn-stuck", CommandSpec::new("true", vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_send_command_to_closed_connection() {
        let dispatcher = Dispatcher::new(settings());
        let (tx, _rx) = command_channel("Conn-closing", 4);
        dispatcher.registry().register("Conn-closing", tx.clone());
        tx.close();

        let err = dispatcher
            .send_command("Conn-closing", CommandSpec::new("true", vec![]))
            .await
            .unwrap_err();
        assert_eq!(err, DispatchError::Closed("Conn-closing".to_string()));
    }

    #[test]
    fn test_shutdown_flag() {
        let dispatcher = Dispatcher::new(settings());
        assert!(!dispatcher.is_shutting_down());
        dispatcher.shutdown();
        assert!(dispatcher.is_shutting_down());
    }

    #[test]
    fn test_default_initial_command() {
        let settings = DispatchSettings::default();
        assert_eq!(settings.initial_command.executable, "sh");
        assert_eq!(settings.initial_command.args[0], "-c");
        assert_eq!(settings.dispatch_timeout, Duration::from_secs(1));
    }
}
