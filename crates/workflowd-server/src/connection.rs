// ABOUTME: Receiver/orchestration loop for one agent connection.
// ABOUTME: ESTABLISHING -> AWAIT_STATUS -> DONE | FAILED, always stopping the sender before returning.

use futures::{Stream, StreamExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::Status;
use tracing::{debug, info, warn};
use workflowd_proto::task_status::State;
use workflowd_proto::TaskStatus;

use crate::channel::{command_channel, CommandSender};
use crate::dispatcher::Dispatcher;
use crate::error::ConnectionError;
use crate::ledger::{self, shared_ledger, SharedLedger};
use crate::sender::{run_sender, Outbound, SenderExit};

/// Orchestration states of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Establishing,
    AwaitStatus,
    Done,
    Failed,
}

/// How a connection reached DONE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// The tracked task (and every other task issued here) reached a terminal state.
    Completed,
    /// The agent closed its status stream.
    PeerClosed,
    /// Dispatcher shutdown, or the agent dropped the command stream.
    Cancelled,
}

/// Per-connection resources, owned exclusively by the connection's handler.
struct Connection {
    id: String,
    state: ConnectionState,
    commands: CommandSender,
    ledger: SharedLedger,
    tracked_task: String,
}

impl Connection {
    fn transition(&mut self, next: ConnectionState) {
        debug!(connection_id = %self.id, from = ?self.state, to = ?next, "Connection state");
        self.state = next;
    }

    /// Log and apply one status. Returns true once the connection's work is done.
    fn observe(&self, status: &TaskStatus) -> bool {
        let Ok(state) = State::try_from(status.state) else {
            warn!(
                connection_id = %self.id,
                task_id = %status.task_id,
                state = status.state,
                "Protocol violation: unknown status state, ignoring"
            );
            return false;
        };

        info!(
            connection_id = %self.id,
            task_id = %status.task_id,
            state = state.as_str_name(),
            timestamp = status.timestamp,
            "Status: {}",
            status.message.trim_end()
        );

        let mut ledger = ledger::lock(&self.ledger);
        let observation = ledger.observe(&status.task_id, state);
        if observation.is_violation() {
            warn!(
                connection_id = %self.id,
                task_id = %status.task_id,
                state = state.as_str_name(),
                violation = ?observation,
                "Protocol violation, ignoring status"
            );
            return false;
        }
        if !state.is_terminal() {
            return false;
        }

        info!(connection_id = %self.id, task_id = %status.task_id, state = state.as_str_name(), "Task finished");
        if status.task_id != self.tracked_task {
            return false;
        }

        let outstanding = ledger.outstanding();
        if outstanding > 0 {
            info!(connection_id = %self.id, outstanding, "Tracked task finished, abandoning other open tasks");
        }
        true
    }
}

/// Drive one connection through its state machine.
///
/// Registers the connection, starts its sender loop, queues the initial
/// command and then waits on status, cancellation and sender failure. On the
/// way out the connection is unregistered, its channel closed, and the sender
/// loop awaited, so no task outlives the connection.
pub(crate) async fn run<S>(
    dispatcher: &Dispatcher,
    connection_id: String,
    cancel: CancellationToken,
    mut inbound: S,
    outbound: Outbound,
) -> Result<ConnectionOutcome, ConnectionError>
where
    S: Stream<Item = Result<TaskStatus, Status>> + Unpin + Send,
{
    let settings = dispatcher.settings();
    let registry = dispatcher.registry();

    // ESTABLISHING
    let (commands, receiver) = command_channel(connection_id.clone(), settings.command_buffer);
    let ledger = shared_ledger();
    registry.register(connection_id.clone(), commands.clone());

    let mut sender_task: JoinHandle<SenderExit> = tokio::spawn(run_sender(
        connection_id.clone(),
        receiver,
        outbound.clone(),
        ledger.clone(),
    ));

    let tracked_task = dispatcher.next_task_id();
    let mut conn = Connection {
        id: connection_id,
        state: ConnectionState::Establishing,
        commands,
        ledger,
        tracked_task: tracked_task.clone(),
    };

    info!(connection_id = %conn.id, task_id = %tracked_task, "Queueing initial START command");
    let initial = settings.initial_command.clone().into_start(tracked_task);
    let queued = conn
        .commands
        .enqueue_timeout(initial, settings.dispatch_timeout)
        .await
        .map_err(ConnectionError::InitialCommand);

    let mut sender_exit: Option<SenderExit> = None;
    let mut trailing: Option<Status> = None;
    let result = match queued {
        Err(e) => Err(e),
        Ok(()) => {
            conn.transition(ConnectionState::AwaitStatus);
            loop {
                tokio::select! {
                    biased;

                    () = cancel.cancelled() => {
                        info!(connection_id = %conn.id, "Dispatcher shutting down, closing connection");
                        trailing = Some(Status::unavailable("dispatcher shutting down"));
                        break Ok(ConnectionOutcome::Cancelled);
                    }

                    // Before the outbound branches, so a crashed agent reports its read error.
                    msg = inbound.next() => match msg {
                        Some(Ok(status)) => {
                            if conn.observe(&status) {
                                break Ok(ConnectionOutcome::Completed);
                            }
                        }
                        Some(Err(status)) => {
                            warn!(connection_id = %conn.id, error = %status, "Error receiving status");
                            break Err(ConnectionError::Receive(status));
                        }
                        None => {
                            info!(connection_id = %conn.id, "Agent closed the status stream");
                            break Ok(ConnectionOutcome::PeerClosed);
                        }
                    },

                    exit = &mut sender_task => {
                        let exit = exit.unwrap_or(SenderExit::WriteFailed);
                        sender_exit = Some(exit);
                        warn!(connection_id = %conn.id, exit = ?exit, "Command sender stopped unexpectedly");
                        break Err(ConnectionError::SendFailed);
                    }

                    () = outbound.closed() => {
                        info!(connection_id = %conn.id, "Agent dropped the command stream");
                        break Ok(ConnectionOutcome::Cancelled);
                    }
                }
            }
        }
    };

    conn.transition(if result.is_ok() {
        ConnectionState::Done
    } else {
        ConnectionState::Failed
    });

    // Unregister before closing so a racing dispatch sees NotFound or Closed, never a hang.
    registry.unregister(&conn.id);
    conn.commands.close();
    let exit = match sender_exit {
        Some(exit) => exit,
        None => sender_task.await.unwrap_or(SenderExit::WriteFailed),
    };
    debug!(connection_id = %conn.id, exit = ?exit, "Command sender confirmed stopped");

    // The sender is gone, so this is now the only writer.
    if let Err(e) = &result {
        trailing = Some(e.to_status());
    }
    if let Some(status) = trailing {
        if let Err(e) = outbound.try_send(Err(status)) {
            debug!(connection_id = %conn.id, error = %e, "Trailing status not delivered");
        }
    }

    info!(
        connection_id = %conn.id,
        outcome = ?result.as_ref().ok(),
        remaining = registry.len(),
        "Agent disconnected"
    );
    result
}
