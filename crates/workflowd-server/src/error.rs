// ABOUTME: Error types for dispatch requests and per-connection orchestration.
// ABOUTME: Dispatch errors go to the external caller, connection errors end one connection.

use std::time::Duration;
use thiserror::Error;

/// Why an external dispatch did not reach the target connection's queue.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// No registered connection with this id (never existed, or already gone).
    #[error("connection not found: {0}")]
    NotFound(String),

    /// The connection's command channel stayed full for the whole wait.
    #[error("timed out after {timeout:?} queuing command for connection {connection_id}")]
    Timeout {
        connection_id: String,
        timeout: Duration,
    },

    /// The connection shut down while the command was being queued.
    #[error("command channel closed for connection {0}")]
    Closed(String),
}

/// Why a connection ended in the FAILED state.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Reading the agent's status stream failed mid-stream.
    #[error("receiving status: {0}")]
    Receive(tonic::Status),

    /// Writing a command to the agent failed; remaining commands were not sent.
    #[error("sending commands failed")]
    SendFailed,

    /// The initial command could not be queued.
    #[error("queuing initial command: {0}")]
    InitialCommand(#[source] DispatchError),
}

impl ConnectionError {
    /// Trailing status reported to the agent when the connection fails.
    pub fn to_status(&self) -> tonic::Status {
        match self {
            ConnectionError::Receive(status) => {
                tonic::Status::aborted(format!("status stream failed: {}", status.message()))
            }
            other => tonic::Status::internal(other.to_string()),
        }
    }
}
