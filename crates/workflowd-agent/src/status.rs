// ABOUTME: Status reporting half of the agent's stream.
// ABOUTME: Stamps each report with the agent-local time and queues it on the single writer.

use workflowd_grpc::{GrpcClientError, StreamSender};
use workflowd_proto::task_status::State;
use workflowd_proto::TaskStatus;

/// Shared by every task runner. Reports from concurrent runners are queued
/// whole, so messages never interleave on the wire.
#[derive(Debug, Clone)]
pub struct StatusSender {
    inner: StreamSender<TaskStatus>,
}

impl StatusSender {
    pub fn new(inner: StreamSender<TaskStatus>) -> Self {
        Self { inner }
    }

    pub async fn report(
        &self,
        task_id: &str,
        state: State,
        message: impl Into<String>,
    ) -> Result<(), GrpcClientError> {
        let status = TaskStatus::new(task_id, state, message, chrono::Utc::now().timestamp());
        self.inner.send(status).await
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}
