// ABOUTME: Per-connection command channel between dispatch callers and the sender loop.
// ABOUTME: A bounded FIFO with an explicit close that wakes both ends immediately.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use workflowd_proto::Command;

use crate::error::DispatchError;

/// Create the command channel for one connection.
///
/// `capacity` is clamped to at least one slot.
pub fn command_channel(
    connection_id: impl Into<String>,
    capacity: usize,
) -> (CommandSender, CommandReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let closed = CancellationToken::new();
    let connection_id: Arc<str> = Arc::from(connection_id.into());
    (
        CommandSender {
            connection_id,
            tx,
            closed: closed.clone(),
        },
        CommandReceiver { rx, closed },
    )
}

/// Enqueue side. Cloned into the registry and handed to dispatch callers.
#[derive(Debug, Clone)]
pub struct CommandSender {
    connection_id: Arc<str>,
    tx: mpsc::Sender<Command>,
    closed: CancellationToken,
}

impl CommandSender {
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Queue a command, waiting for space. Fails once the channel is closed.
    pub async fn enqueue(&self, command: Command) -> Result<(), DispatchError> {
        if self.closed.is_cancelled() {
            return Err(self.closed_error());
        }
        tokio::select! {
            biased;
            () = self.closed.cancelled() => Err(self.closed_error()),
            sent = self.tx.send(command) => sent.map_err(|_| self.closed_error()),
        }
    }

    /// Queue a command, giving up after `timeout`.
    pub async fn enqueue_timeout(
        &self,
        command: Command,
        timeout: Duration,
    ) -> Result<(), DispatchError> {
        match tokio::time::timeout(timeout, self.enqueue(command)).await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::Timeout {
                connection_id: self.connection_id.to_string(),
                timeout,
            }),
        }
    }

    /// Close the channel. The sender loop stops without draining what is left.
    pub(crate) fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }

    fn closed_error(&self) -> DispatchError {
        DispatchError::Closed(self.connection_id.to_string())
    }
}

/// Dequeue side, owned by the connection's sender loop.
#[derive(Debug)]
pub struct CommandReceiver {
    rx: mpsc::Receiver<Command>,
    closed: CancellationToken,
}

impl CommandReceiver {
    /// Next command in enqueue order, or `None` once the channel is closed.
    pub async fn next(&mut self) -> Option<Command> {
        tokio::select! {
            biased;
            () = self.closed.cancelled() => None,
            command = self.rx.recv() => command,
        }
    }

    /// Resolves when the channel is closed from either side.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    pub fn close(&mut self) {
        self.closed.cancel();
        self.rx.close();
    }
}
