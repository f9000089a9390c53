// ABOUTME: Typed halves of a bidirectional gRPC stream.
// ABOUTME: The sender is the single serialized write path; the receiver maps transport errors.

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::GrpcClientError;

/// Default buffer size for outbound message channels.
pub const DEFAULT_CHANNEL_BUFFER: usize = 64;

/// Sender half of a bidirectional stream.
///
/// Every clone feeds the same queue, and the transport drains that queue onto
/// the wire one message at a time, so concurrent producers never interleave
/// writes.
#[derive(Debug)]
pub struct StreamSender<T> {
    inner: mpsc::Sender<T>,
}

impl<T> Clone for StreamSender<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> StreamSender<T> {
    pub fn new(sender: mpsc::Sender<T>) -> Self {
        Self { inner: sender }
    }

    /// Queue a message, waiting for room if the queue is full.
    pub async fn send(&self, msg: T) -> Result<(), GrpcClientError> {
        self.inner
            .send(msg)
            .await
            .map_err(|_| GrpcClientError::StreamClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Resolves once the transport has dropped the other end.
    pub async fn closed(&self) {
        self.inner.closed().await
    }
}

/// Receiver half of a bidirectional stream.
///
/// Wraps anything yielding `Result<T, tonic::Status>` (a `tonic::Streaming<T>`
/// in production, an in-memory stream in tests).
pub struct StreamReceiver<S> {
    inner: S,
}

impl<S, T> StreamReceiver<S>
where
    S: Stream<Item = Result<T, tonic::Status>> + Unpin,
{
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    /// Next message; `Ok(None)` means the peer closed its direction cleanly.
    pub async fn recv(&mut self) -> Result<Option<T>, GrpcClientError> {
        match self.inner.next().await {
            Some(Ok(msg)) => Ok(Some(msg)),
            Some(Err(status)) => Err(status.into()),
            None => Ok(None),
        }
    }
}

/// A sender paired with the stream handed to the generated gRPC client method.
pub struct OutboundStream<T> {
    pub sender: StreamSender<T>,
    pub stream: ReceiverStream<T>,
}

impl<T> OutboundStream<T> {
    pub fn new(buffer_size: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer_size);
        Self {
            sender: StreamSender::new(tx),
            stream: ReceiverStream::new(rx),
        }
    }

    pub fn with_default_buffer() -> Self {
        Self::new(DEFAULT_CHANNEL_BUFFER)
    }
}
