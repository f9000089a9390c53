// ABOUTME: Shared gRPC client utilities for the workflowd agent.
// ABOUTME: Provides channel creation and the typed halves of a bidirectional stream.

pub mod channel;
pub mod error;
pub mod stream;

// Channel creation
pub use channel::{connect, normalize_address, ChannelConfig, KeepAliveConfig};

// Error types
pub use error::GrpcClientError;

// Stream management
pub use stream::{OutboundStream, StreamReceiver, StreamSender, DEFAULT_CHANNEL_BUFFER};
