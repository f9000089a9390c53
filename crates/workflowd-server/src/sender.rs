// ABOUTME: Sender loop draining a connection's command channel onto the outbound stream.
// ABOUTME: Single writer per connection; reports whether it stopped cleanly or on a write failure.

use tokio::sync::mpsc;
use tonic::Status;
use tracing::{debug, warn};
use workflowd_proto::Command;

use crate::channel::CommandReceiver;
use crate::ledger::{self, SharedLedger};

/// Outbound half of the RPC: what the tonic response stream is fed from.
pub type Outbound = mpsc::Sender<Result<Command, Status>>;

/// How the sender loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderExit {
    /// The command channel was closed.
    Closed,
    /// The outbound stream is gone; queued commands were not sent.
    WriteFailed,
}

/// Drain `commands` onto `outbound` in enqueue order until closed or a write fails.
///
/// Each task id is recorded in the ledger before its command is written, so a
/// status that races the write is still correlated.
pub async fn run_sender(
    connection_id: String,
    mut commands: CommandReceiver,
    outbound: Outbound,
    ledger: SharedLedger,
) -> SenderExit {
    let exit = loop {
        let Some(command) = commands.next().await else {
            break SenderExit::Closed;
        };

        // Reserve first: a close while the agent is not reading abandons the
        // write instead of leaving it half done.
        let permit = tokio::select! {
            biased;
            () = commands.closed() => {
                debug!(connection_id = %connection_id, task_id = %command.task_id, "channel closed before command was written");
                break SenderExit::Closed;
            }
            permit = outbound.reserve() => permit,
        };

        match permit {
            Ok(permit) => {
                debug!(
                    connection_id = %connection_id,
                    task_id = %command.task_id,
                    kind = command.kind().as_str_name(),
                    "Sending command"
                );
                ledger::lock(&ledger).issue(command.task_id.clone());
                permit.send(Ok(command));
            }
            Err(_) => {
                warn!(
                    connection_id = %connection_id,
                    task_id = %command.task_id,
                    "Failed to send command: outbound stream closed"
                );
                commands.close();
                break SenderExit::WriteFailed;
            }
        }
    };

    debug!(connection_id = %connection_id, exit = ?exit, "Command sender finished");
    exit
}
