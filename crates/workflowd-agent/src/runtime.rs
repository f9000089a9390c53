// ABOUTME: Agent runtime: dials the dispatcher, receives commands, runs them concurrently.
// ABOUTME: All runners report through one status queue; cancellation stops everything promptly.

use std::collections::HashSet;
use std::sync::Arc;

use futures::Stream;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use workflowd_grpc::{connect, ChannelConfig, GrpcClientError, OutboundStream, StreamReceiver};
use workflowd_proto::client::WorkflowServiceClient;
use workflowd_proto::command::Kind;
use workflowd_proto::task_status::State;
use workflowd_proto::Command;

use crate::error::AgentError;
use crate::executor::Executor;
use crate::runner::run_task;
use crate::status::StatusSender;

/// Why the runtime stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeExit {
    /// The dispatcher closed the command stream and every task finished.
    StreamClosed,
    /// The cancellation token fired.
    Cancelled,
}

pub struct AgentRuntime {
    executor: Arc<dyn Executor>,
}

impl AgentRuntime {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self { executor }
    }

    /// Connect to the dispatcher and serve commands until the stream ends or
    /// `cancel` fires.
    pub async fn run(
        &self,
        config: &ChannelConfig,
        cancel: CancellationToken,
    ) -> Result<RuntimeExit, AgentError> {
        info!(server = %config.address, executor = self.executor.name(), "Connecting to dispatcher");
        let channel = connect(config).await.map_err(AgentError::Connect)?;
        let mut client = WorkflowServiceClient::new(channel);

        let OutboundStream { sender, stream } = OutboundStream::with_default_buffer();
        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(RuntimeExit::Cancelled),
            response = client.execute_workflow(stream) => {
                response.map_err(AgentError::OpenStream)?
            }
        };
        info!("Workflow stream established");

        self.serve(response.into_inner(), StatusSender::new(sender), cancel)
            .await
    }

    /// Serve an already open command stream.
    ///
    /// Each START command gets its own runner. A repeated task id is ignored,
    /// as are command kinds this agent does not know.
    pub async fn serve<S>(
        &self,
        inbound: S,
        statuses: StatusSender,
        cancel: CancellationToken,
    ) -> Result<RuntimeExit, AgentError>
    where
        S: Stream<Item = Result<Command, tonic::Status>> + Unpin,
    {
        let mut receiver = StreamReceiver::new(inbound);
        let mut runners = JoinSet::new();
        // Every task id seen on this stream. Kept for the stream's lifetime so a
        // late duplicate is still recognised; the stream is per connection.
        let mut seen = HashSet::new();

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    info!(running = runners.len(), "Cancelled, abandoning running tasks");
                    runners.abort_all();
                    return Ok(RuntimeExit::Cancelled);
                }

                Some(joined) = runners.join_next(), if !runners.is_empty() => {
                    log_runner_exit(joined);
                }

                msg = receiver.recv() => match msg {
                    Ok(Some(command)) => {
                        if statuses.is_closed() {
                            warn!(task_id = %command.task_id, "Status stream closed, cannot report on new command");
                            runners.abort_all();
                            return Err(AgentError::Receive(GrpcClientError::StreamClosed));
                        }
                        if !seen.insert(command.task_id.clone()) {
                            warn!(task_id = %command.task_id, "Duplicate task id, ignoring command");
                            continue;
                        }
                        match Kind::try_from(command.kind) {
                            Ok(Kind::Start) => {
                                runners.spawn(run_task(
                                    self.executor.clone(),
                                    command,
                                    statuses.clone(),
                                ));
                            }
                            Err(_) => {
                                warn!(task_id = %command.task_id, kind = command.kind, "Unknown command kind, ignoring");
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!(error = %e, "Command stream failed");
                        runners.abort_all();
                        return Err(AgentError::Receive(e));
                    }
                }
            }
        }

        info!(running = runners.len(), "Command stream closed, waiting for running tasks");
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    runners.abort_all();
                    return Ok(RuntimeExit::Cancelled);
                }
                joined = runners.join_next() => match joined {
                    Some(joined) => log_runner_exit(joined),
                    None => break,
                }
            }
        }

        Ok(RuntimeExit::StreamClosed)
    }
}

fn log_runner_exit(joined: Result<Result<State, GrpcClientError>, JoinError>) {
    match joined {
        Ok(Ok(state)) => debug!(state = state.as_str_name(), "Task runner finished"),
        Ok(Err(e)) => warn!(error = %e, "Task runner could not report status"),
        Err(e) if e.is_cancelled() => {}
        Err(e) => error!(error = %e, "Task runner panicked"),
    }
}
