// ABOUTME: Error types for the workflowd-grpc crate.
// ABOUTME: Separates connection setup failures from mid-stream failures.

use thiserror::Error;

/// Errors that can occur on the client side of a workflowd stream.
#[derive(Error, Debug)]
pub enum GrpcClientError {
    /// Invalid server address format.
    #[error("invalid server address: {0}")]
    InvalidAddress(String),

    /// Failed to connect to the server. Fatal to the connection attempt.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The local half of the stream was closed; nothing more can be sent.
    #[error("stream closed")]
    StreamClosed,

    /// Read or write failure after the stream was established.
    #[error("stream error: {0}")]
    StreamError(String),
}

impl From<tonic::Status> for GrpcClientError {
    fn from(status: tonic::Status) -> Self {
        GrpcClientError::StreamError(status.to_string())
    }
}

impl From<tonic::transport::Error> for GrpcClientError {
    fn from(err: tonic::transport::Error) -> Self {
        GrpcClientError::ConnectionFailed(err.to_string())
    }
}
