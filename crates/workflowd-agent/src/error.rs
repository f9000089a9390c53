// ABOUTME: Error types for the agent runtime.
// ABOUTME: Setup failures are fatal to the process; executor failures never surface here.

use thiserror::Error;
use workflowd_grpc::GrpcClientError;

#[derive(Error, Debug)]
pub enum AgentError {
    /// Could not reach the dispatcher.
    #[error("connecting to dispatcher: {0}")]
    Connect(#[source] GrpcClientError),

    /// The dispatcher refused the ExecuteWorkflow stream.
    #[error("opening stream to dispatcher: {0}")]
    OpenStream(tonic::Status),

    /// The command stream failed after it was established.
    #[error("receiving command: {0}")]
    Receive(#[source] GrpcClientError),
}
