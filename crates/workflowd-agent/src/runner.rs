// ABOUTME: Per-task runner turning executor events into status reports.
// ABOUTME: PENDING first, RUNNING while working, then exactly one terminal status.

use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, info, warn};
use workflowd_grpc::GrpcClientError;
use workflowd_proto::task_status::State;
use workflowd_proto::Command;

use crate::executor::{ExecEvent, ExecSpec, Executor};
use crate::status::StatusSender;

pub const RECEIVED_MESSAGE: &str = "Workflow received and starting...";
pub const STARTED_MESSAGE: &str = "Command process started.";

/// Run one START command to completion, reporting as it goes.
///
/// Returns the terminal state that was reported. Fails only when the status
/// stream is gone, in which case nothing more can be reported anyway.
pub async fn run_task(
    executor: Arc<dyn Executor>,
    command: Command,
    statuses: StatusSender,
) -> Result<State, GrpcClientError> {
    let task_id = command.task_id;
    info!(task_id = %task_id, executable = %command.executable, "Starting task");

    statuses
        .report(&task_id, State::Pending, RECEIVED_MESSAGE)
        .await?;

    let spec = ExecSpec {
        executable: command.executable,
        args: command.args,
    };
    let mut events = executor.execute(&spec).await;

    while let Some(event) = events.next().await {
        match event {
            ExecEvent::Started => {
                statuses
                    .report(&task_id, State::Running, STARTED_MESSAGE)
                    .await?;
            }
            ExecEvent::Output(chunk) => {
                debug!(task_id = %task_id, bytes = chunk.len(), "Output");
                statuses.report(&task_id, State::Running, chunk).await?;
            }
            ExecEvent::Finished { success, message } => {
                let state = if success { State::Completed } else { State::Failed };
                info!(task_id = %task_id, state = state.as_str_name(), "{message}");
                statuses.report(&task_id, state, message).await?;
                return Ok(state);
            }
        }
    }

    warn!(task_id = %task_id, executor = executor.name(), "Executor ended without a result");
    statuses
        .report(&task_id, State::Failed, "Execution failed: executor ended without a result")
        .await?;
    Ok(State::Failed)
}
