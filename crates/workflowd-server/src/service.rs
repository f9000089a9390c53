// ABOUTME: WorkflowService gRPC implementation accepting agent streams.
// ABOUTME: Each accepted stream gets an id and a connection handler task; commands flow back through the response.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};
use tracing::{info, warn};
use workflowd_proto::server::WorkflowService;
use workflowd_proto::{Command, TaskStatus};

use crate::dispatcher::Dispatcher;

/// Buffer between the sender loop and the transport.
const OUTBOUND_BUFFER: usize = 32;

pub struct WorkflowServiceImpl {
    dispatcher: Arc<Dispatcher>,
}

impl WorkflowServiceImpl {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[tonic::async_trait]
impl WorkflowService for WorkflowServiceImpl {
    type ExecuteWorkflowStream = ReceiverStream<Result<Command, Status>>;

    async fn execute_workflow(
        &self,
        request: Request<Streaming<TaskStatus>>,
    ) -> Result<Response<Self::ExecuteWorkflowStream>, Status> {
        if self.dispatcher.is_shutting_down() {
            return Err(Status::unavailable("dispatcher shutting down"));
        }

        let peer = request.remote_addr();
        let inbound = request.into_inner();
        let connection_id = self.dispatcher.next_connection_id();
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);

        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            match dispatcher
                .handle_connection(connection_id.clone(), peer, inbound, tx)
                .await
            {
                Ok(outcome) => {
                    info!(connection_id = %connection_id, outcome = ?outcome, "Connection finished")
                }
                Err(e) => warn!(connection_id = %connection_id, error = %e, "Connection failed"),
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}
